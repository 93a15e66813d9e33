//! Bounds and checked arithmetic for money, quantities and rates.
//!
//! Money is stored as `NUMERIC(18, 2)`, quantities as `NUMERIC(18, 3)` and
//! rates as `NUMERIC(5, 2)`. Values are checked against those columns before
//! any arithmetic, so both stores hold exactly what the rules computed.

use rust_decimal::prelude::*;
use rust_decimal_macros::dec;
use service_core::error::AppError;

/// Largest magnitude a money column can hold.
pub const MAX_MONEY: Decimal = dec!(9999999999999999.99);

/// Largest magnitude a quantity column can hold.
pub const MAX_QUANTITY: Decimal = dec!(999999999999999.999);

/// Round a money amount to 2 decimal places, midpoint away from zero.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

fn check_bounded(
    field: &str,
    value: Decimal,
    places: u32,
    max: Decimal,
) -> Result<Decimal, AppError> {
    if value.round_dp(places) != value {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "{} must have at most {} decimal places, got {}",
            field,
            places,
            value
        )));
    }
    if value.abs() > max {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "{} {} is out of range (limit {})",
            field,
            value,
            max
        )));
    }
    Ok(value)
}

/// Paise precision and within the money column range. Sign is not checked.
pub fn check_money(field: &str, value: Decimal) -> Result<Decimal, AppError> {
    check_bounded(field, value, 2, MAX_MONEY)
}

/// At most 3 decimal places and within the quantity column range.
pub fn check_quantity(field: &str, value: Decimal) -> Result<Decimal, AppError> {
    check_bounded(field, value, 3, MAX_QUANTITY)
}

/// A percentage between 0 and `max` with at most 2 decimal places.
pub fn check_rate(field: &str, value: Decimal, max: Decimal) -> Result<Decimal, AppError> {
    if value < Decimal::ZERO || value > max {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "{} must be between 0 and {}, got {}",
            field,
            max,
            value
        )));
    }
    check_bounded(field, value, 2, max)
}

pub fn checked_mul(field: &str, a: Decimal, b: Decimal) -> Result<Decimal, AppError> {
    a.checked_mul(b).ok_or_else(|| {
        AppError::BadRequest(anyhow::anyhow!("{} overflows: {} x {}", field, a, b))
    })
}

pub fn checked_add(field: &str, a: Decimal, b: Decimal) -> Result<Decimal, AppError> {
    a.checked_add(b).ok_or_else(|| {
        AppError::BadRequest(anyhow::anyhow!("{} overflows: {} + {}", field, a, b))
    })
}
