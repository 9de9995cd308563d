/// Business (tenant) model and database operations
///
/// A business is the tenant every subscription, payment and business-scoped
/// exchange rate hangs off. Businesses are never hard-deleted; `deleted_at`
/// marks a tombstone and every read below filters on it.
///
/// # Schema
///
/// ```sql
/// CREATE TYPE business_status AS ENUM ('pending', 'active', 'suspended');
///
/// CREATE TABLE businesses (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     name VARCHAR(255) NOT NULL,
///     email VARCHAR(255),
///     phone VARCHAR(50),
///     address TEXT,
///     description TEXT,
///     status business_status NOT NULL DEFAULT 'pending',
///     is_subscription_active BOOLEAN NOT NULL DEFAULT FALSE,
///     owner_id UUID REFERENCES users(id),
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     deleted_at TIMESTAMPTZ
/// );
/// ```
///
/// All functions take a `&mut PgConnection` so they compose inside a caller's
/// transaction (`&mut *tx`) as well as on a pooled connection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgConnection;
use std::fmt;
use uuid::Uuid;

/// Business lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "business_status", rename_all = "snake_case")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BusinessStatus {
    /// Created, onboarding not finished
    Pending,

    /// Operating normally
    Active,

    /// Administrative hold
    Suspended,
}

impl BusinessStatus {
    /// Converts status to its database label
    pub fn as_str(&self) -> &'static str {
        match self {
            BusinessStatus::Pending => "pending",
            BusinessStatus::Active => "active",
            BusinessStatus::Suspended => "suspended",
        }
    }

    /// Parses a status, accepting either case
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Some(BusinessStatus::Pending),
            "active" => Some(BusinessStatus::Active),
            "suspended" => Some(BusinessStatus::Suspended),
            _ => None,
        }
    }
}

impl fmt::Display for BusinessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Business row
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Business {
    pub id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub description: Option<String>,
    pub status: BusinessStatus,

    /// Mirrors whether the business currently holds an active subscription
    pub is_subscription_active: bool,

    /// Owning user; NULL only between the two onboarding inserts
    pub owner_id: Option<Uuid>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Input for creating a business
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewBusiness {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub description: Option<String>,
}

const BUSINESS_COLUMNS: &str = "id, name, email, phone, address, description, status, \
     is_subscription_active, owner_id, created_at, updated_at, deleted_at";

impl Business {
    /// Inserts a business in `pending` status with no owner yet
    pub async fn insert(conn: &mut PgConnection, data: NewBusiness) -> Result<Self, sqlx::Error> {
        let query = format!(
            "INSERT INTO businesses (name, email, phone, address, description)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {BUSINESS_COLUMNS}"
        );

        sqlx::query_as::<_, Business>(&query)
            .bind(data.name)
            .bind(data.email)
            .bind(data.phone)
            .bind(data.address)
            .bind(data.description)
            .fetch_one(&mut *conn)
            .await
    }

    /// Finds a non-deleted business by ID
    pub async fn find_by_id(conn: &mut PgConnection, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let query = format!(
            "SELECT {BUSINESS_COLUMNS} FROM businesses WHERE id = $1 AND deleted_at IS NULL"
        );

        sqlx::query_as::<_, Business>(&query)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
    }

    /// Non-deleted businesses among `ids`
    pub async fn find_by_ids(conn: &mut PgConnection, ids: &[Uuid]) -> Result<Vec<Self>, sqlx::Error> {
        let query = format!(
            "SELECT {BUSINESS_COLUMNS} FROM businesses WHERE id = ANY($1) AND deleted_at IS NULL"
        );

        sqlx::query_as::<_, Business>(&query)
            .bind(ids)
            .fetch_all(&mut *conn)
            .await
    }

    /// Finds a non-deleted business and row-locks it until the transaction ends
    ///
    /// Subscription creation and renewal take this lock so two concurrent
    /// requests for the same business serialize on it.
    pub async fn lock_for_update(
        conn: &mut PgConnection,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        let query = format!(
            "SELECT {BUSINESS_COLUMNS} FROM businesses
             WHERE id = $1 AND deleted_at IS NULL
             FOR UPDATE"
        );

        sqlx::query_as::<_, Business>(&query)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
    }

    /// Whether a non-deleted business already uses `email` (case-insensitive)
    pub async fn email_exists(conn: &mut PgConnection, email: &str) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT EXISTS (
                SELECT 1 FROM businesses
                WHERE LOWER(email) = LOWER($1) AND deleted_at IS NULL
            )",
        )
        .bind(email)
        .fetch_one(&mut *conn)
        .await
    }

    /// Links the owning user
    pub async fn set_owner(
        conn: &mut PgConnection,
        id: Uuid,
        owner_id: Uuid,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE businesses SET owner_id = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(owner_id)
            .execute(&mut *conn)
            .await?;

        Ok(())
    }

    /// Updates the subscription-active mirror flag
    pub async fn set_subscription_active(
        conn: &mut PgConnection,
        id: Uuid,
        active: bool,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE businesses SET is_subscription_active = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(active)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Sets the lifecycle status, returning the updated row
    pub async fn set_status(
        conn: &mut PgConnection,
        id: Uuid,
        status: BusinessStatus,
    ) -> Result<Option<Self>, sqlx::Error> {
        let query = format!(
            "UPDATE businesses SET status = $2, updated_at = NOW()
             WHERE id = $1 AND deleted_at IS NULL
             RETURNING {BUSINESS_COLUMNS}"
        );

        sqlx::query_as::<_, Business>(&query)
            .bind(id)
            .bind(status)
            .fetch_optional(&mut *conn)
            .await
    }

    /// Tombstones the business
    pub async fn soft_delete(conn: &mut PgConnection, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE businesses SET deleted_at = NOW(), updated_at = NOW()
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_business_status_round_trip_labels() {
        assert_eq!(BusinessStatus::Suspended.as_str(), "suspended");
        assert_eq!(BusinessStatus::from_str("ACTIVE"), Some(BusinessStatus::Active));
        assert_eq!(BusinessStatus::from_str("closed"), None);
    }

    #[test]
    fn test_business_status_serializes_upper_case() {
        let json = serde_json::to_string(&BusinessStatus::Pending).unwrap();
        assert_eq!(json, "\"PENDING\"");
    }
}
