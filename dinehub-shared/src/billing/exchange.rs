/// Exchange rate ledger
///
/// Maintains the USD to local-currency multiplier, system-wide and per
/// business, with full history. Writes to one scope serialize on an advisory
/// lock and the swap (deactivate old, insert or activate new) happens in a
/// single transaction, so readers never observe zero or two active rates.
///
/// Rate lookup must never block a payment: when no rate is configured the
/// ledger falls back to [`FALLBACK_EXCHANGE_RATE`] and logs a warning.
///
/// # Example
///
/// ```no_run
/// use dinehub_shared::billing::exchange::ExchangeRateLedger;
/// use dinehub_shared::models::exchange_rate::RateScope;
/// use rust_decimal::Decimal;
/// use sqlx::PgPool;
///
/// # async fn example(pool: PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// let ledger = ExchangeRateLedger::new(pool);
///
/// ledger.set_active_rate(RateScope::System, Decimal::from(4100), None).await?;
/// let current = ledger.current_rate(None).await;
/// assert_eq!(current.rate, Decimal::from(4100));
/// # Ok(())
/// # }
/// ```

use super::money::{multiply_to_cents, validate_amount, validate_rate_scale, MAX_PAYMENT_AMOUNT};
use crate::error::{EngineError, EngineResult};
use crate::models::business::Business;
use crate::models::exchange_rate::{ExchangeRate, RateScope};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use tracing::{info, warn};
use uuid::Uuid;

/// Rate used when neither the business nor the system has one configured
pub const FALLBACK_EXCHANGE_RATE: Decimal = Decimal::from_parts(4000, 0, 0, false, 0);

/// Lowest accepted rate
pub const MIN_EXCHANGE_RATE: Decimal = Decimal::ONE;

/// Highest accepted rate
pub const MAX_EXCHANGE_RATE: Decimal = Decimal::from_parts(100_000, 0, 0, false, 0);

/// Where a resolved rate came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RateSource {
    Business,
    System,
    Fallback,
}

/// Rate in force for a business at lookup time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentRate {
    pub rate: Decimal,
    pub source: RateSource,

    /// The ledger row the rate came from; `None` for the fallback
    pub rate_id: Option<Uuid>,
}

impl CurrentRate {
    fn fallback() -> Self {
        CurrentRate {
            rate: FALLBACK_EXCHANGE_RATE,
            source: RateSource::Fallback,
            rate_id: None,
        }
    }

    fn from_row(row: &ExchangeRate) -> Self {
        CurrentRate {
            rate: row.rate,
            source: match row.scope() {
                RateScope::System => RateSource::System,
                RateScope::Business(_) => RateSource::Business,
            },
            rate_id: Some(row.id),
        }
    }
}

/// Rejects rates outside `[MIN_EXCHANGE_RATE, MAX_EXCHANGE_RATE]` or finer than 4 places
pub fn validate_rate(rate: Decimal) -> EngineResult<()> {
    validate_rate_scale(rate)?;
    if rate < MIN_EXCHANGE_RATE || rate > MAX_EXCHANGE_RATE {
        return Err(EngineError::validation(format!(
            "exchange rate {} is outside the accepted range {} to {}",
            rate, MIN_EXCHANGE_RATE, MAX_EXCHANGE_RATE
        )));
    }
    Ok(())
}

/// Converts a USD amount to local currency, rounded to cents (half away from zero)
///
/// # Errors
///
/// `Validation` for sub-cent amounts or amounts beyond the payment column.
pub fn convert_amount(amount: Decimal, rate: Decimal) -> EngineResult<Decimal> {
    validate_amount("amount", amount, MAX_PAYMENT_AMOUNT)?;
    multiply_to_cents(amount, rate)
}

/// Exchange rate ledger service
#[derive(Clone)]
pub struct ExchangeRateLedger {
    db: PgPool,
}

impl ExchangeRateLedger {
    pub fn new(db: PgPool) -> Self {
        ExchangeRateLedger { db }
    }

    /// Makes `rate` the active rate of `scope`, keeping the old one as history
    ///
    /// # Errors
    ///
    /// - `Validation` if the rate is outside the accepted band
    /// - `NotFound` if a business scope names an unknown business
    pub async fn set_active_rate(
        &self,
        scope: RateScope,
        rate: Decimal,
        notes: Option<String>,
    ) -> EngineResult<ExchangeRate> {
        validate_rate(rate)?;

        let mut tx = self.db.begin().await?;
        let created = Self::set_active_rate_in(&mut tx, scope, rate, notes).await?;
        tx.commit().await?;

        info!(
            rate_id = %created.id,
            scope = %scope,
            rate = %created.rate,
            "Exchange rate activated"
        );

        Ok(created)
    }

    /// [`set_active_rate`](Self::set_active_rate) inside a caller's transaction
    pub async fn set_active_rate_in(
        conn: &mut PgConnection,
        scope: RateScope,
        rate: Decimal,
        notes: Option<String>,
    ) -> EngineResult<ExchangeRate> {
        validate_rate(rate)?;

        if let RateScope::Business(business_id) = scope {
            Business::find_by_id(conn, business_id)
                .await?
                .ok_or_else(|| EngineError::not_found("business", business_id))?;
        }

        ExchangeRate::lock_scope(conn, scope).await?;
        ExchangeRate::deactivate_scope(conn, scope).await?;
        let created = ExchangeRate::insert_active(conn, scope, rate, notes).await?;

        Ok(created)
    }

    /// Rate in force for `business_id` (or the system when `None`)
    ///
    /// Never fails: a missing rate or a database error yields the fallback
    /// constant with a warning.
    pub async fn current_rate(&self, business_id: Option<Uuid>) -> CurrentRate {
        match self.lookup_rate(business_id).await {
            Ok(current) => current,
            Err(e) => {
                warn!(
                    business_id = ?business_id,
                    error = %e,
                    fallback = %FALLBACK_EXCHANGE_RATE,
                    "Exchange rate lookup failed, using fallback rate"
                );
                CurrentRate::fallback()
            }
        }
    }

    async fn lookup_rate(&self, business_id: Option<Uuid>) -> EngineResult<CurrentRate> {
        let mut conn = self.db.acquire().await?;
        Self::current_rate_in(&mut conn, business_id).await
    }

    /// Resolves business rate, then system rate, then the fallback
    ///
    /// Database errors propagate so a caller's transaction can abort.
    pub async fn current_rate_in(
        conn: &mut PgConnection,
        business_id: Option<Uuid>,
    ) -> EngineResult<CurrentRate> {
        if let Some(id) = business_id {
            if let Some(row) = ExchangeRate::find_active(conn, RateScope::Business(id)).await? {
                return Ok(CurrentRate::from_row(&row));
            }
        }

        if let Some(row) = ExchangeRate::find_active(conn, RateScope::System).await? {
            return Ok(CurrentRate::from_row(&row));
        }

        warn!(
            business_id = ?business_id,
            fallback = %FALLBACK_EXCHANGE_RATE,
            "No active exchange rate configured, using fallback rate"
        );
        Ok(CurrentRate::fallback())
    }

    /// Converts `amount` USD with the rate in force for `business_id`
    pub async fn convert(
        &self,
        business_id: Option<Uuid>,
        amount: Decimal,
    ) -> EngineResult<(Decimal, CurrentRate)> {
        let current = self.current_rate(business_id).await;
        Ok((convert_amount(amount, current.rate)?, current))
    }

    /// The active row of a scope, without fallback
    pub async fn active_rate(&self, scope: RateScope) -> EngineResult<Option<ExchangeRate>> {
        let mut conn = self.db.acquire().await?;
        Ok(ExchangeRate::find_active(&mut conn, scope).await?)
    }

    /// Every rate of a scope, newest first
    pub async fn history(&self, scope: RateScope) -> EngineResult<Vec<ExchangeRate>> {
        let mut conn = self.db.acquire().await?;
        Ok(ExchangeRate::history(&mut conn, scope).await?)
    }

    pub async fn find_by_id(&self, id: Uuid) -> EngineResult<ExchangeRate> {
        let mut conn = self.db.acquire().await?;
        ExchangeRate::find_by_id(&mut conn, id)
            .await?
            .ok_or_else(|| EngineError::not_found("exchange rate", id))
    }

    /// Makes an existing historical rate the active one of its scope
    pub async fn activate(&self, id: Uuid) -> EngineResult<ExchangeRate> {
        let mut tx = self.db.begin().await?;

        let rate = ExchangeRate::find_by_id(&mut tx, id)
            .await?
            .ok_or_else(|| EngineError::not_found("exchange rate", id))?;
        let scope = rate.scope();

        ExchangeRate::lock_scope(&mut tx, scope).await?;

        // Re-read under the lock; a concurrent swap may have changed it
        let rate = ExchangeRate::find_by_id(&mut tx, id)
            .await?
            .ok_or_else(|| EngineError::not_found("exchange rate", id))?;
        if rate.is_active {
            tx.commit().await?;
            return Ok(rate);
        }

        ExchangeRate::deactivate_scope(&mut tx, scope).await?;
        let activated = ExchangeRate::set_active(&mut tx, id, true).await?;
        tx.commit().await?;

        info!(rate_id = %id, scope = %scope, rate = %activated.rate, "Exchange rate activated");
        Ok(activated)
    }

    /// Takes a rate out of service
    ///
    /// Deactivating a business override hands the business back to the
    /// system rate. An already inactive rate is returned unchanged.
    ///
    /// # Errors
    ///
    /// `Validation` when the rate is the active system rate, or a business
    /// override with no active system rate behind it.
    pub async fn deactivate(&self, id: Uuid) -> EngineResult<ExchangeRate> {
        let mut tx = self.db.begin().await?;

        let rate = ExchangeRate::find_by_id(&mut tx, id)
            .await?
            .ok_or_else(|| EngineError::not_found("exchange rate", id))?;
        let scope = rate.scope();
        ExchangeRate::lock_scope(&mut tx, scope).await?;

        let rate = ExchangeRate::find_by_id(&mut tx, id)
            .await?
            .ok_or_else(|| EngineError::not_found("exchange rate", id))?;
        if !rate.is_active {
            tx.commit().await?;
            return Ok(rate);
        }

        let has_replacement = match scope {
            RateScope::System => false,
            RateScope::Business(_) => ExchangeRate::find_active(&mut tx, RateScope::System)
                .await?
                .is_some(),
        };
        if !has_replacement {
            return Err(EngineError::validation(
                "cannot deactivate the only exchange rate in force; activate another rate first",
            ));
        }

        let deactivated = ExchangeRate::set_active(&mut tx, id, false).await?;
        tx.commit().await?;

        info!(rate_id = %id, scope = %scope, "Exchange rate deactivated, system rate applies");
        Ok(deactivated)
    }

    /// Soft-deletes a rate
    ///
    /// The active rate may only be deleted when it is the last rate of its
    /// scope; otherwise another rate must be activated first.
    pub async fn delete(&self, id: Uuid) -> EngineResult<ExchangeRate> {
        let mut tx = self.db.begin().await?;

        let rate = ExchangeRate::find_by_id(&mut tx, id)
            .await?
            .ok_or_else(|| EngineError::not_found("exchange rate", id))?;
        let scope = rate.scope();
        ExchangeRate::lock_scope(&mut tx, scope).await?;

        let rate = ExchangeRate::find_by_id(&mut tx, id)
            .await?
            .ok_or_else(|| EngineError::not_found("exchange rate", id))?;
        if rate.is_active && ExchangeRate::count_in_scope(&mut tx, scope).await? > 1 {
            return Err(EngineError::validation(
                "cannot delete the active exchange rate; activate another rate first",
            ));
        }

        ExchangeRate::soft_delete(&mut tx, id).await?;
        tx.commit().await?;

        info!(rate_id = %id, scope = %scope, "Exchange rate deleted");
        Ok(rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_rate_band() {
        assert!(validate_rate(dec!(1)).is_ok());
        assert!(validate_rate(dec!(4100.5)).is_ok());
        assert!(validate_rate(dec!(100000)).is_ok());

        assert!(matches!(validate_rate(dec!(0.99)), Err(EngineError::Validation(_))));
        assert!(matches!(validate_rate(dec!(0)), Err(EngineError::Validation(_))));
        assert!(matches!(validate_rate(dec!(-4000)), Err(EngineError::Validation(_))));
        assert!(matches!(validate_rate(dec!(100000.01)), Err(EngineError::Validation(_))));
    }

    #[test]
    fn test_constants() {
        assert_eq!(FALLBACK_EXCHANGE_RATE, dec!(4000));
        assert_eq!(MAX_EXCHANGE_RATE, dec!(100000));
        assert!(validate_rate(FALLBACK_EXCHANGE_RATE).is_ok());
    }

    #[test]
    fn test_convert_amount_rounding() {
        assert_eq!(convert_amount(dec!(30), dec!(4100)).unwrap(), dec!(123000.00));
        assert_eq!(convert_amount(dec!(10.25), dec!(4100.5)).unwrap(), dec!(42030.13));
        assert_eq!(convert_amount(dec!(-10.25), dec!(4100.5)).unwrap(), dec!(-42030.13));
        assert_eq!(convert_amount(dec!(1.11), dec!(3.3333)).unwrap(), dec!(3.70));
    }

    #[test]
    fn test_convert_amount_rejects_unstorable_input() {
        assert!(matches!(
            convert_amount(Decimal::MAX, dec!(4000)),
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            convert_amount(dec!(0.005), dec!(4000)),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn test_rate_scale() {
        assert!(validate_rate(dec!(4050.2500)).is_ok());
        assert!(matches!(validate_rate(dec!(4050.00001)), Err(EngineError::Validation(_))));
    }

    #[test]
    fn test_current_rate_source() {
        let now = chrono::Utc::now();
        let business = Uuid::new_v4();
        let row = ExchangeRate {
            id: Uuid::new_v4(),
            business_id: Some(business),
            rate: dec!(4050),
            is_active: true,
            notes: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        let current = CurrentRate::from_row(&row);
        assert_eq!(current.source, RateSource::Business);
        assert_eq!(current.rate_id, Some(row.id));

        let fallback = CurrentRate::fallback();
        assert_eq!(fallback.source, RateSource::Fallback);
        assert_eq!(fallback.rate, dec!(4000));
    }
}
