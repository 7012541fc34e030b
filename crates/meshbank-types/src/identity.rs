//! Identity types for MeshBank
//!
//! All identity types are strongly typed wrappers around UUIDs to prevent
//! accidental mixing of different ID types. Accounts are the exception: an
//! account is identified by its unique name.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Macro to generate ID types with common implementations
macro_rules! define_id_type {
    ($name:ident, $prefix:literal, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new random ID
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Parse from a string (with or without prefix)
            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                let s = s.strip_prefix(concat!($prefix, "_")).unwrap_or(s);
                Ok(Self(Uuid::parse_str(s)?))
            }

            /// Get the inner UUID
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}_{}", $prefix, self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

// Lending identity types
define_id_type!(LoanId, "loan", "Unique identifier for an issued loan");
define_id_type!(ApplicationId, "app", "Unique identifier for a pending loan application");
define_id_type!(PaymentId, "pay", "Unique identifier for a single loan payment");

// Messaging identity types
define_id_type!(CorrelationId, "req", "Correlates a request with its reply across relay hops");
define_id_type!(LinkId, "link", "Identifies one private link between a client and a relay");

/// Role a private link declares when it registers with a relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkRole {
    /// Banking terminal talking to the ledger
    BankClient,
    /// Loan terminal talking to the loan service
    LoanClient,
    /// Controller-style peer (admin console)
    Controller,
}

impl fmt::Display for LinkRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkRole::BankClient => "bank_client",
            LinkRole::LoanClient => "loan_client",
            LinkRole::Controller => "controller",
        };
        f.write_str(s)
    }
}

/// Backend service kinds reachable through a relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    Ledger,
    Loan,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 2] = [ServiceKind::Ledger, ServiceKind::Loan];
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceKind::Ledger => f.write_str("ledger"),
            ServiceKind::Loan => f.write_str("loan"),
        }
    }
}
