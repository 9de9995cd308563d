/// Exchange rate model and database operations
///
/// A rate is the USD to local-currency multiplier for one scope: the whole
/// system (`business_id IS NULL`) or a single business. History is kept;
/// at most one row per scope is active, guarded by a partial unique index and
/// by callers taking [`ExchangeRate::lock_scope`] before swapping rates.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE exchange_rates (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     business_id UUID REFERENCES businesses(id),
///     rate NUMERIC(12, 4) NOT NULL CHECK (rate >= 1 AND rate <= 100000),
///     is_active BOOLEAN NOT NULL DEFAULT TRUE,
///     notes TEXT,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT clock_timestamp(),
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     deleted_at TIMESTAMPTZ
/// );
///
/// CREATE UNIQUE INDEX exchange_rates_one_active_per_scope
///     ON exchange_rates (COALESCE(business_id, '00000000-0000-0000-0000-000000000000'::uuid))
///     WHERE is_active AND deleted_at IS NULL;
/// ```

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::PgConnection;
use std::fmt;
use uuid::Uuid;

/// Which rates a lookup or write applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", content = "business_id", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RateScope {
    /// System-wide default
    System,

    /// Override for one business
    Business(Uuid),
}

impl RateScope {
    /// Scope for an optional business ID (`None` is system-wide)
    pub fn from_business(business_id: Option<Uuid>) -> Self {
        business_id.map_or(RateScope::System, RateScope::Business)
    }

    /// The `business_id` column value for this scope
    pub fn business_id(&self) -> Option<Uuid> {
        match self {
            RateScope::System => None,
            RateScope::Business(id) => Some(*id),
        }
    }

    /// Advisory-lock key naming this scope
    fn lock_key(&self) -> String {
        format!("exchange_rate:{}", self)
    }
}

impl fmt::Display for RateScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateScope::System => f.write_str("system"),
            RateScope::Business(id) => write!(f, "business:{}", id),
        }
    }
}

/// Exchange rate row
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ExchangeRate {
    pub id: Uuid,

    /// NULL for the system scope
    pub business_id: Option<Uuid>,

    /// Local-currency units per USD
    pub rate: Decimal,

    pub is_active: bool,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl ExchangeRate {
    /// Scope this rate belongs to
    pub fn scope(&self) -> RateScope {
        RateScope::from_business(self.business_id)
    }
}

const RATE_COLUMNS: &str =
    "id, business_id, rate, is_active, notes, created_at, updated_at, deleted_at";

impl ExchangeRate {
    /// Serializes rate writes for one scope until the transaction ends
    pub async fn lock_scope(conn: &mut PgConnection, scope: RateScope) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(scope.lock_key())
            .execute(&mut *conn)
            .await?;

        Ok(())
    }

    /// Inserts a new active rate for `scope`
    pub async fn insert_active(
        conn: &mut PgConnection,
        scope: RateScope,
        rate: Decimal,
        notes: Option<String>,
    ) -> Result<Self, sqlx::Error> {
        let query = format!(
            "INSERT INTO exchange_rates (business_id, rate, is_active, notes)
             VALUES ($1, $2, TRUE, $3)
             RETURNING {RATE_COLUMNS}"
        );

        sqlx::query_as::<_, ExchangeRate>(&query)
            .bind(scope.business_id())
            .bind(rate)
            .bind(notes)
            .fetch_one(&mut *conn)
            .await
    }

    /// Finds a non-deleted rate by ID
    pub async fn find_by_id(conn: &mut PgConnection, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let query = format!(
            "SELECT {RATE_COLUMNS} FROM exchange_rates WHERE id = $1 AND deleted_at IS NULL"
        );

        sqlx::query_as::<_, ExchangeRate>(&query)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
    }

    /// The active rate of a scope, if any
    pub async fn find_active(
        conn: &mut PgConnection,
        scope: RateScope,
    ) -> Result<Option<Self>, sqlx::Error> {
        let query = format!(
            "SELECT {RATE_COLUMNS} FROM exchange_rates
             WHERE business_id IS NOT DISTINCT FROM $1 AND is_active AND deleted_at IS NULL"
        );

        sqlx::query_as::<_, ExchangeRate>(&query)
            .bind(scope.business_id())
            .fetch_optional(&mut *conn)
            .await
    }

    /// Every non-deleted rate of a scope, newest first
    pub async fn history(
        conn: &mut PgConnection,
        scope: RateScope,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let query = format!(
            "SELECT {RATE_COLUMNS} FROM exchange_rates
             WHERE business_id IS NOT DISTINCT FROM $1 AND deleted_at IS NULL
             ORDER BY created_at DESC, id DESC"
        );

        sqlx::query_as::<_, ExchangeRate>(&query)
            .bind(scope.business_id())
            .fetch_all(&mut *conn)
            .await
    }

    /// Number of non-deleted rates in a scope
    pub async fn count_in_scope(conn: &mut PgConnection, scope: RateScope) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM exchange_rates
             WHERE business_id IS NOT DISTINCT FROM $1 AND deleted_at IS NULL",
        )
        .bind(scope.business_id())
        .fetch_one(&mut *conn)
        .await
    }

    /// Deactivates whichever rate is active in `scope`
    pub async fn deactivate_scope(
        conn: &mut PgConnection,
        scope: RateScope,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE exchange_rates SET is_active = FALSE, updated_at = NOW()
             WHERE business_id IS NOT DISTINCT FROM $1 AND is_active AND deleted_at IS NULL",
        )
        .bind(scope.business_id())
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected())
    }

    /// Sets the active flag of one rate
    pub async fn set_active(
        conn: &mut PgConnection,
        id: Uuid,
        active: bool,
    ) -> Result<Self, sqlx::Error> {
        let query = format!(
            "UPDATE exchange_rates SET is_active = $2, updated_at = NOW()
             WHERE id = $1
             RETURNING {RATE_COLUMNS}"
        );

        sqlx::query_as::<_, ExchangeRate>(&query)
            .bind(id)
            .bind(active)
            .fetch_one(&mut *conn)
            .await
    }

    /// Tombstones a rate
    pub async fn soft_delete(conn: &mut PgConnection, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE exchange_rates SET deleted_at = NOW(), is_active = FALSE, updated_at = NOW()
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
