//! Money helpers
//!
//! Balances, principals and fees are signed decimals. Arithmetic keeps full
//! precision internally; values are rounded to cents only for display and for
//! the "fully paid" comparison.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

use crate::{BankError, Result};

/// Signed decimal money value
pub type Money = Decimal;

/// Remaining balance at or below which a loan counts as fully repaid
pub const PAID_EPSILON: Money = dec!(0.01);

/// Round to cents using banker's rounding
pub fn round_cents(value: Money) -> Money {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven)
}

/// Returns true for strictly positive amounts
pub fn is_positive(value: Money) -> bool {
    value > Decimal::ZERO
}

/// Accept a strictly positive amount with at most two decimal places
pub fn validate_amount(value: Money) -> Result<Money> {
    if !is_positive(value) {
        return Err(BankError::validation(format!(
            "Amount must be positive, got {value}"
        )));
    }
    if value.normalize().scale() > 2 {
        return Err(BankError::validation(format!(
            "Amount {value} has more than two decimal places"
        )));
    }
    Ok(value)
}
