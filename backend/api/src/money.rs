//! Conversions between API decimals and the integer cents kept in storage.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::errors::{AppError, Result};

/// Cents are the only representation that reaches the database.
pub fn to_cents(amount: Decimal) -> Result<i64> {
    if amount.normalize().scale() > 2 {
        return Err(AppError::Validation(format!(
            "amount {amount} has more than two decimal places"
        )));
    }
    (amount * Decimal::ONE_HUNDRED)
        .to_i64()
        .ok_or_else(|| AppError::Validation(format!("amount {amount} is out of range")))
}

pub fn from_cents(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

/// `min(raised / goal * 100, 100)`, or zero when there is no goal.
pub fn progress_percentage(raised_cents: i64, goal_cents: i64) -> Decimal {
    if goal_cents <= 0 {
        return Decimal::ZERO;
    }
    let pct = Decimal::from(raised_cents) * Decimal::ONE_HUNDRED / Decimal::from(goal_cents);
    pct.min(Decimal::ONE_HUNDRED).round_dp(2)
}
