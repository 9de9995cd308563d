/// Payment model and database operations
///
/// Payments record money that moved (or is expected to move) against a
/// subscription. A refund is its own row with a negative amount and type
/// `refund`; the original charge is never edited. Status transitions are
/// one-directional out of `pending`.
///
/// # State Machine
///
/// ```text
/// pending → completed
///         → cancelled
///         → failed
/// ```
///
/// # Schema
///
/// ```sql
/// CREATE TYPE payment_status AS ENUM ('pending', 'completed', 'failed', 'cancelled');
/// CREATE TYPE payment_type AS ENUM ('subscription', 'refund', 'other');
/// CREATE TYPE payment_method AS ENUM ('cash', 'bank_transfer', 'card', 'mobile_wallet', 'other');
///
/// CREATE TABLE payments (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     subscription_id UUID NOT NULL REFERENCES subscriptions(id),
///     business_id UUID NOT NULL REFERENCES businesses(id),
///     amount NUMERIC(12, 2) NOT NULL,
///     amount_local NUMERIC(18, 2) NOT NULL,
///     exchange_rate NUMERIC(12, 4) NOT NULL,
///     method payment_method NOT NULL,
///     payment_type payment_type NOT NULL,
///     status payment_status NOT NULL DEFAULT 'pending',
///     reference_number VARCHAR(100),
///     notes TEXT,
///     paid_at TIMESTAMPTZ,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     deleted_at TIMESTAMPTZ
/// );
/// ```

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::PgConnection;
use std::fmt;
use uuid::Uuid;

/// Payment lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_status", rename_all = "snake_case")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

impl PaymentStatus {
    /// Converts status to its database label
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Cancelled => "cancelled",
        }
    }

    /// Checks if transition to target status is valid
    pub fn can_transition_to(&self, target: PaymentStatus) -> bool {
        matches!(
            (self, target),
            (PaymentStatus::Pending, PaymentStatus::Completed)
                | (PaymentStatus::Pending, PaymentStatus::Cancelled)
                | (PaymentStatus::Pending, PaymentStatus::Failed)
        )
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the payment was for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_type", rename_all = "snake_case")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentType {
    /// Charge for a subscription period
    Subscription,

    /// Money returned (negative amount)
    Refund,

    Other,
}

impl PaymentType {
    /// Converts type to its database label
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentType::Subscription => "subscription",
            PaymentType::Refund => "refund",
            PaymentType::Other => "other",
        }
    }

    /// Parses a type, accepting either case
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "subscription" => Some(PaymentType::Subscription),
            "refund" => Some(PaymentType::Refund),
            "other" => Some(PaymentType::Other),
            _ => None,
        }
    }
}

/// How the money moved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_method", rename_all = "snake_case")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Cash,
    BankTransfer,
    Card,
    MobileWallet,
    Other,
}

impl PaymentMethod {
    /// Converts method to its database label
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::Card => "card",
            PaymentMethod::MobileWallet => "mobile_wallet",
            PaymentMethod::Other => "other",
        }
    }

    /// Parses a method, accepting either case and `-`/space separators
    pub fn from_str(s: &str) -> Option<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace(&['-', ' '][..], "_");
        match normalized.as_str() {
            "cash" => Some(PaymentMethod::Cash),
            "bank_transfer" => Some(PaymentMethod::BankTransfer),
            "card" => Some(PaymentMethod::Card),
            "mobile_wallet" => Some(PaymentMethod::MobileWallet),
            "other" => Some(PaymentMethod::Other),
            _ => None,
        }
    }
}

/// Payment row
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Payment {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub business_id: Uuid,

    /// USD amount; negative for refunds
    pub amount: Decimal,

    /// Amount in local currency at the rate in force when recorded
    pub amount_local: Decimal,

    /// Rate snapshot used for `amount_local`
    pub exchange_rate: Decimal,

    pub method: PaymentMethod,
    pub payment_type: PaymentType,
    pub status: PaymentStatus,

    /// Unique among non-deleted payments when present
    pub reference_number: Option<String>,

    pub notes: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Input for inserting a payment row
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub subscription_id: Uuid,
    pub business_id: Uuid,
    pub amount: Decimal,
    pub amount_local: Decimal,
    pub exchange_rate: Decimal,
    pub method: PaymentMethod,
    pub payment_type: PaymentType,
    pub status: PaymentStatus,
    pub reference_number: Option<String>,
    pub notes: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
}

/// Raw per-subscription sums
#[derive(Debug, Clone, Default, sqlx::FromRow)]
pub struct PaymentTotals {
    pub subscription_id: Uuid,
    pub total_completed: Decimal,
    pub total_pending: Decimal,
    pub completed_count: i64,
    pub pending_count: i64,
    pub payment_count: i64,
    pub last_payment_at: Option<DateTime<Utc>>,
}

/// Sums across every subscription of one business
#[derive(Debug, Clone, Default, Serialize, Deserialize, sqlx::FromRow)]
pub struct BusinessPaymentTotals {
    pub business_id: Uuid,

    /// Completed charges net of refunds
    pub total_paid: Decimal,

    /// Completed refunds, as a positive amount
    pub total_refunded: Decimal,

    pub total_pending: Decimal,
    pub payment_count: i64,
    pub completed_count: i64,
    pub pending_count: i64,
    pub failed_count: i64,
    pub cancelled_count: i64,

    /// Subscriptions with at least one payment
    pub subscription_count: i64,

    pub last_payment_at: Option<DateTime<Utc>>,
}

/// Completed money movements inside a time window
#[derive(Debug, Clone, Default, Serialize, Deserialize, sqlx::FromRow)]
pub struct RevenueTotals {
    /// Completed charges
    pub gross: Decimal,

    /// Completed refunds, as a positive amount
    pub refunded: Decimal,

    /// `gross - refunded`
    pub net: Decimal,

    /// Net in local currency at each payment's recorded rate
    pub net_local: Decimal,

    pub payment_count: i64,
    pub refund_count: i64,
}

const PAYMENT_COLUMNS: &str = "id, subscription_id, business_id, amount, amount_local, \
     exchange_rate, method, payment_type, status, reference_number, notes, paid_at, \
     created_at, updated_at, deleted_at";

const TOTALS_SELECT: &str = r#"
    SELECT subscription_id,
           COALESCE(SUM(amount) FILTER (WHERE status = 'completed'), 0) AS total_completed,
           COALESCE(SUM(amount) FILTER (WHERE status = 'pending'), 0) AS total_pending,
           COUNT(*) FILTER (WHERE status = 'completed') AS completed_count,
           COUNT(*) FILTER (WHERE status = 'pending') AS pending_count,
           COUNT(*) AS payment_count,
           MAX(COALESCE(paid_at, created_at))
               FILTER (WHERE status = 'completed' AND payment_type <> 'refund') AS last_payment_at
    FROM payments
"#;

impl Payment {
    /// Inserts a payment row
    pub async fn insert(conn: &mut PgConnection, data: NewPayment) -> Result<Self, sqlx::Error> {
        let query = format!(
            "INSERT INTO payments
                 (subscription_id, business_id, amount, amount_local, exchange_rate, method,
                  payment_type, status, reference_number, notes, paid_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
             RETURNING {PAYMENT_COLUMNS}"
        );

        sqlx::query_as::<_, Payment>(&query)
            .bind(data.subscription_id)
            .bind(data.business_id)
            .bind(data.amount)
            .bind(data.amount_local)
            .bind(data.exchange_rate)
            .bind(data.method)
            .bind(data.payment_type)
            .bind(data.status)
            .bind(data.reference_number)
            .bind(data.notes)
            .bind(data.paid_at)
            .fetch_one(&mut *conn)
            .await
    }

    /// Finds a non-deleted payment by ID
    pub async fn find_by_id(conn: &mut PgConnection, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let query =
            format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1 AND deleted_at IS NULL");

        sqlx::query_as::<_, Payment>(&query)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
    }

    /// Finds a non-deleted payment and row-locks it
    pub async fn find_for_update(
        conn: &mut PgConnection,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        let query = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1 AND deleted_at IS NULL FOR UPDATE"
        );

        sqlx::query_as::<_, Payment>(&query)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
    }

    /// Finds a non-deleted payment by reference number
    pub async fn find_by_reference(
        conn: &mut PgConnection,
        reference_number: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        let query = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments
             WHERE reference_number = $1 AND deleted_at IS NULL"
        );

        sqlx::query_as::<_, Payment>(&query)
            .bind(reference_number)
            .fetch_optional(&mut *conn)
            .await
    }

    /// Whether a non-deleted payment already uses `reference_number`
    pub async fn reference_exists(
        conn: &mut PgConnection,
        reference_number: &str,
    ) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT EXISTS (
                SELECT 1 FROM payments WHERE reference_number = $1 AND deleted_at IS NULL
            )",
        )
        .bind(reference_number)
        .fetch_one(&mut *conn)
        .await
    }

    /// Payments of one subscription, newest first
    pub async fn list_for_subscription(
        conn: &mut PgConnection,
        subscription_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let query = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments
             WHERE subscription_id = $1 AND deleted_at IS NULL
             ORDER BY created_at DESC, id DESC"
        );

        sqlx::query_as::<_, Payment>(&query)
            .bind(subscription_id)
            .fetch_all(&mut *conn)
            .await
    }

    /// Payments of one business across all its subscriptions, newest first
    pub async fn list_for_business(
        conn: &mut PgConnection,
        business_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let query = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments
             WHERE business_id = $1 AND deleted_at IS NULL
             ORDER BY created_at DESC, id DESC
             LIMIT $2 OFFSET $3"
        );

        sqlx::query_as::<_, Payment>(&query)
            .bind(business_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&mut *conn)
            .await
    }

    /// Moves a payment to `status`, optionally appending a note
    pub async fn set_status(
        conn: &mut PgConnection,
        id: Uuid,
        status: PaymentStatus,
        note: Option<&str>,
        paid_at: Option<DateTime<Utc>>,
    ) -> Result<Self, sqlx::Error> {
        let query = format!(
            "UPDATE payments
             SET status = $2,
                 notes = CASE
                     WHEN $3::text IS NULL THEN notes
                     WHEN notes IS NULL OR notes = '' THEN $3
                     ELSE notes || E'\\n' || $3
                 END,
                 paid_at = COALESCE($4, paid_at),
                 updated_at = NOW()
             WHERE id = $1
             RETURNING {PAYMENT_COLUMNS}"
        );

        sqlx::query_as::<_, Payment>(&query)
            .bind(id)
            .bind(status)
            .bind(note)
            .bind(paid_at)
            .fetch_one(&mut *conn)
            .await
    }

    /// Cancels every pending payment of a subscription with `note`
    ///
    /// Completed, failed and already-cancelled payments are left untouched.
    pub async fn cancel_pending_for_subscription(
        conn: &mut PgConnection,
        subscription_id: Uuid,
        note: &str,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE payments
             SET status = 'cancelled',
                 notes = CASE WHEN notes IS NULL OR notes = '' THEN $2 ELSE notes || E'\\n' || $2 END,
                 updated_at = NOW()
             WHERE subscription_id = $1 AND status = 'pending' AND deleted_at IS NULL",
        )
        .bind(subscription_id)
        .bind(note)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected())
    }

    /// Sums for one subscription
    pub async fn totals_for_subscription(
        conn: &mut PgConnection,
        subscription_id: Uuid,
    ) -> Result<PaymentTotals, sqlx::Error> {
        let query = format!(
            "{TOTALS_SELECT} WHERE subscription_id = $1 AND deleted_at IS NULL GROUP BY subscription_id"
        );

        let totals = sqlx::query_as::<_, PaymentTotals>(&query)
            .bind(subscription_id)
            .fetch_optional(&mut *conn)
            .await?;

        Ok(totals.unwrap_or(PaymentTotals {
            subscription_id,
            ..Default::default()
        }))
    }

    /// Sums for many subscriptions; subscriptions without payments are absent
    pub async fn totals_for_subscriptions(
        conn: &mut PgConnection,
        subscription_ids: &[Uuid],
    ) -> Result<Vec<PaymentTotals>, sqlx::Error> {
        if subscription_ids.is_empty() {
            return Ok(Vec::new());
        }

        let query = format!(
            "{TOTALS_SELECT} WHERE subscription_id = ANY($1) AND deleted_at IS NULL GROUP BY subscription_id"
        );

        sqlx::query_as::<_, PaymentTotals>(&query)
            .bind(subscription_ids)
            .fetch_all(&mut *conn)
            .await
    }

    /// Sums for one business; a business without payments gets zeros
    pub async fn totals_for_business(
        conn: &mut PgConnection,
        business_id: Uuid,
    ) -> Result<BusinessPaymentTotals, sqlx::Error> {
        sqlx::query_as::<_, BusinessPaymentTotals>(
            r#"
            SELECT $1::uuid AS business_id,
                   COALESCE(SUM(amount) FILTER (WHERE status = 'completed'), 0) AS total_paid,
                   COALESCE(-SUM(amount) FILTER (WHERE status = 'completed' AND payment_type = 'refund'), 0)
                       AS total_refunded,
                   COALESCE(SUM(amount) FILTER (WHERE status = 'pending'), 0) AS total_pending,
                   COUNT(*) AS payment_count,
                   COUNT(*) FILTER (WHERE status = 'completed') AS completed_count,
                   COUNT(*) FILTER (WHERE status = 'pending') AS pending_count,
                   COUNT(*) FILTER (WHERE status = 'failed') AS failed_count,
                   COUNT(*) FILTER (WHERE status = 'cancelled') AS cancelled_count,
                   COUNT(DISTINCT subscription_id) AS subscription_count,
                   MAX(COALESCE(paid_at, created_at))
                       FILTER (WHERE status = 'completed' AND payment_type <> 'refund') AS last_payment_at
            FROM payments
            WHERE business_id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(business_id)
        .fetch_one(&mut *conn)
        .await
    }

    /// Completed payments settled in `[from, to)`, optionally for one business
    pub async fn revenue_between(
        conn: &mut PgConnection,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        business_id: Option<Uuid>,
    ) -> Result<RevenueTotals, sqlx::Error> {
        sqlx::query_as::<_, RevenueTotals>(
            r#"
            SELECT COALESCE(SUM(amount) FILTER (WHERE payment_type <> 'refund'), 0) AS gross,
                   COALESCE(-SUM(amount) FILTER (WHERE payment_type = 'refund'), 0) AS refunded,
                   COALESCE(SUM(amount), 0) AS net,
                   COALESCE(SUM(amount_local), 0) AS net_local,
                   COUNT(*) FILTER (WHERE payment_type <> 'refund') AS payment_count,
                   COUNT(*) FILTER (WHERE payment_type = 'refund') AS refund_count
            FROM payments
            WHERE status = 'completed'
              AND deleted_at IS NULL
              AND paid_at >= $1 AND paid_at < $2
              AND ($3::uuid IS NULL OR business_id = $3)
            "#,
        )
        .bind(from)
        .bind(to)
        .bind(business_id)
        .fetch_one(&mut *conn)
        .await
    }

    /// Pending payments created before `cutoff`, oldest first
    pub async fn list_pending_before(
        conn: &mut PgConnection,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let query = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments
             WHERE status = 'pending' AND deleted_at IS NULL AND created_at < $1
             ORDER BY created_at ASC, id ASC
             LIMIT $2"
        );

        sqlx::query_as::<_, Payment>(&query)
            .bind(cutoff)
            .bind(limit)
            .fetch_all(&mut *conn)
            .await
    }

    /// Tombstones a payment, freeing its reference number
    pub async fn soft_delete(conn: &mut PgConnection, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE payments SET deleted_at = NOW(), updated_at = NOW()
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
