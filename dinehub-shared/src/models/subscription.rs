/// Subscription model and database operations
///
/// A subscription binds one business to one plan for the window
/// `[start_date, end_date)`. Renewal never mutates a window: it marks the old
/// row `superseded` and inserts a new one starting where the old one ended, so
/// the rows of a business form its billing history.
///
/// # State Machine
///
/// ```text
/// active ──suspend──> suspended ──reactivate──> active
/// active ──cancel───> cancelled
/// suspended ─cancel─> cancelled
/// active ──renew────> superseded   (+ new active row)
/// suspended/expired/cancelled ──renew──> superseded (+ new active row)
/// active ──sweep────> expired      (end passed, no auto-renew)
/// ```
///
/// `is_active` is stored alongside `state` and is true exactly when the state
/// is `active` (enforced by a CHECK constraint).
///
/// # Schema
///
/// ```sql
/// CREATE TYPE subscription_state AS ENUM (
///     'active', 'suspended', 'cancelled', 'superseded', 'expired'
/// );
///
/// CREATE TABLE subscriptions (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     business_id UUID NOT NULL REFERENCES businesses(id),
///     plan_id UUID NOT NULL REFERENCES subscription_plans(id),
///     start_date TIMESTAMPTZ NOT NULL,
///     end_date TIMESTAMPTZ NOT NULL,
///     is_active BOOLEAN NOT NULL DEFAULT TRUE,
///     state subscription_state NOT NULL DEFAULT 'active',
///     auto_renew BOOLEAN NOT NULL DEFAULT FALSE,
///     custom_duration_days INTEGER,
///     notes TEXT,
///     renewed_from_id UUID REFERENCES subscriptions(id),
///     cancelled_at TIMESTAMPTZ,
///     cancellation_reason TEXT,
///     reminder_sent_at TIMESTAMPTZ,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     deleted_at TIMESTAMPTZ
/// );
///
/// CREATE UNIQUE INDEX subscriptions_one_active_per_business
///     ON subscriptions (business_id) WHERE is_active AND deleted_at IS NULL;
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgConnection;
use std::fmt;
use uuid::Uuid;

/// Stored subscription state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "subscription_state", rename_all = "snake_case")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionState {
    /// In force (the window may still have lapsed if the sweep has not run yet)
    Active,

    /// Administrative hold
    Suspended,

    /// Explicitly cancelled
    Cancelled,

    /// Replaced by a renewal row
    Superseded,

    /// Window elapsed without renewal
    Expired,
}

impl SubscriptionState {
    /// Converts state to its database label
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionState::Active => "active",
            SubscriptionState::Suspended => "suspended",
            SubscriptionState::Cancelled => "cancelled",
            SubscriptionState::Superseded => "superseded",
            SubscriptionState::Expired => "expired",
        }
    }

    /// Parses a state, accepting either case
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "active" => Some(SubscriptionState::Active),
            "suspended" => Some(SubscriptionState::Suspended),
            "cancelled" => Some(SubscriptionState::Cancelled),
            "superseded" => Some(SubscriptionState::Superseded),
            "expired" => Some(SubscriptionState::Expired),
            _ => None,
        }
    }

    /// Checks if a transition to `target` is allowed
    pub fn can_transition_to(&self, target: SubscriptionState) -> bool {
        use SubscriptionState::*;

        match (self, target) {
            (Active, Suspended) => true,
            (Active, Cancelled) => true,
            (Active, Superseded) => true,
            (Active, Expired) => true,

            (Suspended, Active) => true,
            (Suspended, Cancelled) => true,
            (Suspended, Superseded) => true,

            // Lapsed or cancelled windows can still be renewed
            (Expired, Superseded) => true,
            (Cancelled, Superseded) => true,

            _ => false,
        }
    }

    /// States from which `renew` is accepted
    pub fn is_renewable(&self) -> bool {
        self.can_transition_to(SubscriptionState::Superseded)
    }

    /// States whose plan and end date may still be edited in place
    pub fn is_mutable(&self) -> bool {
        matches!(self, SubscriptionState::Active | SubscriptionState::Suspended)
    }
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subscription row
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Subscription {
    pub id: Uuid,
    pub business_id: Uuid,
    pub plan_id: Uuid,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub is_active: bool,
    pub state: SubscriptionState,
    pub auto_renew: bool,

    /// Overrides the plan duration for this window
    pub custom_duration_days: Option<i32>,

    pub notes: Option<String>,

    /// Row this one renewed, if any
    pub renewed_from_id: Option<Uuid>,

    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,

    /// Last expiry reminder sent for this window
    pub reminder_sent_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Subscription {
    /// Active flag set and the window has not lapsed at `now`
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.end_date > now
    }

    /// Active flag set but the window already lapsed (awaiting the sweep)
    pub fn is_due_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.end_date <= now
    }
}

/// Input for inserting a new active subscription row
#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub business_id: Uuid,
    pub plan_id: Uuid,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub auto_renew: bool,
    pub custom_duration_days: Option<i32>,
    pub notes: Option<String>,
    pub renewed_from_id: Option<Uuid>,
}

/// Subscription nearing its end, joined with what a reminder needs
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ReminderCandidate {
    pub subscription_id: Uuid,
    pub business_id: Uuid,
    pub business_name: String,
    pub owner_id: Option<Uuid>,
    pub plan_name: String,
    pub end_date: DateTime<Utc>,
}

const SUBSCRIPTION_COLUMNS: &str = "id, business_id, plan_id, start_date, end_date, is_active, \
     state, auto_renew, custom_duration_days, notes, renewed_from_id, cancelled_at, \
     cancellation_reason, reminder_sent_at, created_at, updated_at, deleted_at";

/// Appends `$2` to the notes column on its own line
const APPEND_NOTE: &str =
    "notes = CASE WHEN notes IS NULL OR notes = '' THEN $2 ELSE notes || E'\\n' || $2 END";

impl Subscription {
    /// Inserts a new `active` subscription row
    pub async fn insert(
        conn: &mut PgConnection,
        data: NewSubscription,
    ) -> Result<Self, sqlx::Error> {
        let query = format!(
            "INSERT INTO subscriptions
                 (business_id, plan_id, start_date, end_date, is_active, state, auto_renew,
                  custom_duration_days, notes, renewed_from_id)
             VALUES ($1, $2, $3, $4, TRUE, 'active', $5, $6, $7, $8)
             RETURNING {SUBSCRIPTION_COLUMNS}"
        );

        sqlx::query_as::<_, Subscription>(&query)
            .bind(data.business_id)
            .bind(data.plan_id)
            .bind(data.start_date)
            .bind(data.end_date)
            .bind(data.auto_renew)
            .bind(data.custom_duration_days)
            .bind(data.notes)
            .bind(data.renewed_from_id)
            .fetch_one(&mut *conn)
            .await
    }

    /// Finds a non-deleted subscription by ID
    pub async fn find_by_id(conn: &mut PgConnection, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let query = format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE id = $1 AND deleted_at IS NULL"
        );

        sqlx::query_as::<_, Subscription>(&query)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
    }

    /// Finds a non-deleted subscription and row-locks it
    pub async fn find_for_update(
        conn: &mut PgConnection,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        let query = format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions
             WHERE id = $1 AND deleted_at IS NULL
             FOR UPDATE"
        );

        sqlx::query_as::<_, Subscription>(&query)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
    }

    /// Row-locks a subscription unless another transaction already holds it
    ///
    /// Used by the sweeps: a row locked by a concurrent request or sweep is
    /// skipped and picked up on the next pass.
    pub async fn try_lock(
        conn: &mut PgConnection,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        let query = format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions
             WHERE id = $1 AND deleted_at IS NULL
             FOR UPDATE SKIP LOCKED"
        );

        sqlx::query_as::<_, Subscription>(&query)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
    }

    /// The business's row with `is_active` set, if any
    pub async fn find_active_for_business(
        conn: &mut PgConnection,
        business_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        let query = format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions
             WHERE business_id = $1 AND is_active AND deleted_at IS NULL"
        );

        sqlx::query_as::<_, Subscription>(&query)
            .bind(business_id)
            .fetch_optional(&mut *conn)
            .await
    }

    /// Most recent non-deleted subscription of a business
    pub async fn current_for_business(
        conn: &mut PgConnection,
        business_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        let query = format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions
             WHERE business_id = $1 AND deleted_at IS NULL
             ORDER BY start_date DESC, created_at DESC
             LIMIT 1"
        );

        sqlx::query_as::<_, Subscription>(&query)
            .bind(business_id)
            .fetch_optional(&mut *conn)
            .await
    }

    /// Most recent non-deleted subscription of each business in `business_ids`
    pub async fn current_for_businesses(
        conn: &mut PgConnection,
        business_ids: &[Uuid],
    ) -> Result<Vec<Self>, sqlx::Error> {
        let query = format!(
            "SELECT DISTINCT ON (business_id) {SUBSCRIPTION_COLUMNS} FROM subscriptions
             WHERE business_id = ANY($1) AND deleted_at IS NULL
             ORDER BY business_id, start_date DESC, created_at DESC"
        );

        sqlx::query_as::<_, Subscription>(&query)
            .bind(business_ids)
            .fetch_all(&mut *conn)
            .await
    }

    /// Every non-deleted subscription of a business, newest first
    pub async fn history_for_business(
        conn: &mut PgConnection,
        business_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let query = format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions
             WHERE business_id = $1 AND deleted_at IS NULL
             ORDER BY start_date DESC, created_at DESC"
        );

        sqlx::query_as::<_, Subscription>(&query)
            .bind(business_id)
            .fetch_all(&mut *conn)
            .await
    }

    /// IDs of active rows whose window lapsed at or before `now`, oldest first
    pub async fn list_due_ids(
        conn: &mut PgConnection,
        now: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT id FROM subscriptions
             WHERE is_active AND end_date <= $1 AND deleted_at IS NULL
             ORDER BY end_date ASC, id ASC",
        )
        .bind(now)
        .fetch_all(&mut *conn)
        .await
    }

    /// Active rows ending within `[now, until]`, soonest first
    pub async fn list_expiring(
        conn: &mut PgConnection,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let query = format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions
             WHERE is_active AND end_date >= $1 AND end_date <= $2 AND deleted_at IS NULL
             ORDER BY end_date ASC"
        );

        sqlx::query_as::<_, Subscription>(&query)
            .bind(now)
            .bind(until)
            .fetch_all(&mut *conn)
            .await
    }

    /// Rows that are expired, either by state or by a lapsed active window
    pub async fn list_expired(
        conn: &mut PgConnection,
        now: DateTime<Utc>,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let query = format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions
             WHERE deleted_at IS NULL
               AND (state = 'expired' OR (is_active AND end_date <= $1))
             ORDER BY end_date DESC"
        );

        sqlx::query_as::<_, Subscription>(&query)
            .bind(now)
            .fetch_all(&mut *conn)
            .await
    }

    /// Active rows ending within `[now, until]` that have not been reminded
    /// since `until - horizon`, joined with business and plan names
    pub async fn list_reminder_candidates(
        conn: &mut PgConnection,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
        horizon: chrono::Duration,
    ) -> Result<Vec<ReminderCandidate>, sqlx::Error> {
        sqlx::query_as::<_, ReminderCandidate>(
            r#"
            SELECT s.id AS subscription_id, s.business_id, b.name AS business_name,
                   b.owner_id, p.name AS plan_name, s.end_date
            FROM subscriptions s
            JOIN businesses b ON b.id = s.business_id
            JOIN subscription_plans p ON p.id = s.plan_id
            WHERE s.is_active AND s.deleted_at IS NULL AND b.deleted_at IS NULL
              AND s.end_date >= $1 AND s.end_date <= $2
              AND (s.reminder_sent_at IS NULL OR s.reminder_sent_at < s.end_date - $3::interval)
            ORDER BY s.end_date ASC
            "#,
        )
        .bind(now)
        .bind(until)
        .bind(horizon_interval(horizon))
        .fetch_all(&mut *conn)
        .await
    }

    /// Stamps `reminder_sent_at` if the row still qualifies for a reminder
    ///
    /// Returns false when a concurrent sweep already claimed the reminder.
    pub async fn claim_reminder(
        conn: &mut PgConnection,
        id: Uuid,
        now: DateTime<Utc>,
        horizon: chrono::Duration,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE subscriptions SET reminder_sent_at = $2, updated_at = NOW()
             WHERE id = $1 AND is_active AND deleted_at IS NULL
               AND (reminder_sent_at IS NULL OR reminder_sent_at < end_date - $3::interval)",
        )
        .bind(id)
        .bind(now)
        .bind(horizon_interval(horizon))
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Moves a row to `state`, keeping `is_active` in step
    pub async fn set_state(
        conn: &mut PgConnection,
        id: Uuid,
        state: SubscriptionState,
    ) -> Result<Self, sqlx::Error> {
        let query = format!(
            "UPDATE subscriptions SET state = $2, is_active = ($2 = 'active'::subscription_state),
                 updated_at = NOW()
             WHERE id = $1
             RETURNING {SUBSCRIPTION_COLUMNS}"
        );

        sqlx::query_as::<_, Subscription>(&query)
            .bind(id)
            .bind(state)
            .fetch_one(&mut *conn)
            .await
    }

    /// Moves a row to `state` and appends a note
    pub async fn set_state_with_note(
        conn: &mut PgConnection,
        id: Uuid,
        state: SubscriptionState,
        note: &str,
    ) -> Result<Self, sqlx::Error> {
        let query = format!(
            "UPDATE subscriptions SET {APPEND_NOTE}, state = $3,
                 is_active = ($3 = 'active'::subscription_state), updated_at = NOW()
             WHERE id = $1
             RETURNING {SUBSCRIPTION_COLUMNS}"
        );

        sqlx::query_as::<_, Subscription>(&query)
            .bind(id)
            .bind(note)
            .bind(state)
            .fetch_one(&mut *conn)
            .await
    }

    /// Swaps the plan and end date in place
    pub async fn set_plan(
        conn: &mut PgConnection,
        id: Uuid,
        plan_id: Uuid,
        end_date: DateTime<Utc>,
    ) -> Result<Self, sqlx::Error> {
        let query = format!(
            "UPDATE subscriptions SET plan_id = $2, end_date = $3, updated_at = NOW()
             WHERE id = $1
             RETURNING {SUBSCRIPTION_COLUMNS}"
        );

        sqlx::query_as::<_, Subscription>(&query)
            .bind(id)
            .bind(plan_id)
            .bind(end_date)
            .fetch_one(&mut *conn)
            .await
    }

    /// Moves the end date and appends a note
    pub async fn set_end_date_with_note(
        conn: &mut PgConnection,
        id: Uuid,
        end_date: DateTime<Utc>,
        note: &str,
    ) -> Result<Self, sqlx::Error> {
        let query = format!(
            "UPDATE subscriptions SET {APPEND_NOTE}, end_date = $3, updated_at = NOW()
             WHERE id = $1
             RETURNING {SUBSCRIPTION_COLUMNS}"
        );

        sqlx::query_as::<_, Subscription>(&query)
            .bind(id)
            .bind(note)
            .bind(end_date)
            .fetch_one(&mut *conn)
            .await
    }

    /// Cancels a row: inactive, no auto-renew, reason recorded, end date set
    pub async fn mark_cancelled(
        conn: &mut PgConnection,
        id: Uuid,
        end_date: DateTime<Utc>,
        reason: &str,
        cancelled_at: DateTime<Utc>,
    ) -> Result<Self, sqlx::Error> {
        let query = format!(
            "UPDATE subscriptions
             SET state = 'cancelled', is_active = FALSE, auto_renew = FALSE,
                 end_date = $2, cancellation_reason = $3, cancelled_at = $4, updated_at = NOW()
             WHERE id = $1
             RETURNING {SUBSCRIPTION_COLUMNS}"
        );

        sqlx::query_as::<_, Subscription>(&query)
            .bind(id)
            .bind(end_date)
            .bind(reason)
            .bind(cancelled_at)
            .fetch_one(&mut *conn)
            .await
    }

    /// Sets the auto-renew flag
    pub async fn set_auto_renew(
        conn: &mut PgConnection,
        id: Uuid,
        auto_renew: bool,
    ) -> Result<Self, sqlx::Error> {
        let query = format!(
            "UPDATE subscriptions SET auto_renew = $2, updated_at = NOW()
             WHERE id = $1
             RETURNING {SUBSCRIPTION_COLUMNS}"
        );

        sqlx::query_as::<_, Subscription>(&query)
            .bind(id)
            .bind(auto_renew)
            .fetch_one(&mut *conn)
            .await
    }

    /// Tombstones every subscription of a business
    pub async fn soft_delete_for_business(
        conn: &mut PgConnection,
        business_id: Uuid,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE subscriptions
             SET deleted_at = NOW(), is_active = FALSE,
                 state = CASE WHEN state = 'active' THEN 'cancelled'::subscription_state ELSE state END,
                 updated_at = NOW()
             WHERE business_id = $1 AND deleted_at IS NULL",
        )
        .bind(business_id)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected())
    }
}

/// Renders a duration as a Postgres interval literal
fn horizon_interval(horizon: chrono::Duration) -> String {
    format!("{} seconds", horizon.num_seconds())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_state_transitions() {
        use SubscriptionState::*;

        assert!(Active.can_transition_to(Suspended));
        assert!(Suspended.can_transition_to(Active));
        assert!(Expired.can_transition_to(Superseded));
        assert!(Cancelled.can_transition_to(Superseded));

        assert!(!Expired.can_transition_to(Active));
        assert!(!Cancelled.can_transition_to(Active));
        assert!(!Superseded.can_transition_to(Superseded));
        assert!(!Suspended.can_transition_to(Suspended));
    }

    #[test]
    fn test_renewable_and_mutable_states() {
        assert!(SubscriptionState::Active.is_renewable());
        assert!(!SubscriptionState::Superseded.is_renewable());

        assert!(SubscriptionState::Suspended.is_mutable());
        assert!(!SubscriptionState::Expired.is_mutable());
    }

    #[test]
    fn test_live_and_due() {
        let now = Utc::now();
        let sub = Subscription {
            id: Uuid::new_v4(),
            business_id: Uuid::new_v4(),
            plan_id: Uuid::new_v4(),
            start_date: now - Duration::days(30),
            end_date: now,
            is_active: true,
            state: SubscriptionState::Active,
            auto_renew: false,
            custom_duration_days: None,
            notes: None,
            renewed_from_id: None,
            cancelled_at: None,
            cancellation_reason: None,
            reminder_sent_at: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        // end == now counts as lapsed
        assert!(!sub.is_live_at(now));
        assert!(sub.is_due_at(now));
        assert!(sub.is_live_at(now - Duration::seconds(1)));
    }

    #[test]
    fn test_horizon_interval() {
        assert_eq!(horizon_interval(Duration::days(7)), "604800 seconds");
    }
}
