//! MeshBank Lending - the Loan/Credit Service
//!
//! Per loan: **pending application** → **active** → **paid** | **default**.
//! Denied applications end at "denied" without becoming a loan.
//!
//! Every balance-affecting step goes through the [`LedgerGateway`]; the
//! ledger is the only owner of balances. Local state (loans, applications,
//! credit profiles) is persisted as three datasets after each mutation.
//!
//! # Modules
//!
//! - [`credit`]: tier table and the pure scoring function
//! - [`profile`]: per-account payment history
//! - [`loan`]: loan and application records
//! - [`service`]: eligibility, apply, approve, deny, pay
//! - [`monitor`]: late fees, auto-lock and default

pub mod config;
pub mod credit;
pub mod gateway;
pub mod handler;
pub mod loan;
pub mod monitor;
pub mod profile;
pub mod service;

#[cfg(test)]
mod testing;

pub use config::*;
pub use credit::*;
pub use gateway::*;
pub use handler::LoanHandler;
pub use loan::*;
pub use monitor::*;
pub use profile::*;
pub use service::LoanService;

/// Dataset names
pub mod datasets {
    pub const LOANS: &str = "loans";
    pub const APPLICATIONS: &str = "applications";
    pub const CREDIT_PROFILES: &str = "credit_profiles";
}
