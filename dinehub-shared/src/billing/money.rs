/// Money and rate bounds
///
/// Amounts are stored as `NUMERIC(12, 2)` (payments), `NUMERIC(10, 2)` (plan
/// prices) and rates as `NUMERIC(12, 4)`. Values are checked against those
/// columns before any arithmetic, so nothing is rounded by the database after
/// the local-currency figure was computed.

use crate::error::{EngineError, EngineResult};
use rust_decimal::{Decimal, RoundingStrategy};

/// Decimal places of USD amounts and prices
pub const MONEY_SCALE: u32 = 2;

/// Decimal places of exchange rates
pub const RATE_SCALE: u32 = 4;

/// Largest payment or refund amount (9,999,999,999.99)
pub const MAX_PAYMENT_AMOUNT: Decimal = Decimal::from_parts(3_567_587_327, 232, 0, false, 2);

/// Largest plan price (99,999,999.99)
pub const MAX_PLAN_PRICE: Decimal = Decimal::from_parts(1_410_065_407, 2, 0, false, 2);

/// Rejects amounts with sub-cent digits or a magnitude above `max`
pub fn validate_amount(label: &str, amount: Decimal, max: Decimal) -> EngineResult<()> {
    if amount.normalize().scale() > MONEY_SCALE {
        return Err(EngineError::validation(format!(
            "{} must have at most {} decimal places",
            label, MONEY_SCALE
        )));
    }
    if amount.abs() > max {
        return Err(EngineError::validation(format!(
            "{} must not exceed {}",
            label, max
        )));
    }
    Ok(())
}

/// Rejects rates with more than [`RATE_SCALE`] decimal places
pub fn validate_rate_scale(rate: Decimal) -> EngineResult<()> {
    if rate.normalize().scale() > RATE_SCALE {
        return Err(EngineError::validation(format!(
            "exchange rate must have at most {} decimal places",
            RATE_SCALE
        )));
    }
    Ok(())
}

/// `amount * rate` rounded to cents, half away from zero
///
/// # Errors
///
/// `Validation` when the product does not fit a decimal.
pub fn multiply_to_cents(amount: Decimal, rate: Decimal) -> EngineResult<Decimal> {
    amount
        .checked_mul(rate)
        .map(|local| local.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero))
        .ok_or_else(|| {
            EngineError::validation(format!("amount {} is too large to convert", amount))
        })
}
