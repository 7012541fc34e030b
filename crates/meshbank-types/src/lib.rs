//! MeshBank Types - Canonical domain types shared by every MeshBank service
//!
//! This crate contains the foundational types with zero dependencies on
//! other meshbank crates:
//!
//! - Identity types (LoanId, ApplicationId, CorrelationId, ...)
//! - Money helpers over `rust_decimal::Decimal`
//! - The error taxonomy shared by the ledger, loan service and relay

pub mod identity;
pub mod money;
pub mod error;

pub use identity::*;
pub use money::*;
pub use error::*;

/// Version of the MeshBank wire/type schema
pub const TYPES_VERSION: &str = "0.1.0";
