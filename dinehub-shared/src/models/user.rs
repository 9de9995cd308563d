/// Owner account model and database operations
///
/// Only the slice of the user store the billing engine needs: creating the
/// owning account during onboarding, uniqueness checks, lookup, and the
/// tombstone written when an owner is deleted. Role management and login live
/// elsewhere.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE users (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     identifier VARCHAR(100) NOT NULL,
///     email VARCHAR(255) NOT NULL,
///     password_hash VARCHAR(255) NOT NULL,
///     first_name VARCHAR(100),
///     last_name VARCHAR(100),
///     phone VARCHAR(50),
///     position VARCHAR(100),
///     role VARCHAR(50) NOT NULL DEFAULT 'business_owner',
///     account_status account_status NOT NULL DEFAULT 'active',
///     business_id UUID REFERENCES businesses(id),
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     deleted_at TIMESTAMPTZ
/// );
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgConnection;
use std::fmt;
use uuid::Uuid;

/// Role label written for accounts created by onboarding
pub const BUSINESS_OWNER_ROLE: &str = "business_owner";

/// Position label written for accounts created by onboarding
pub const OWNER_POSITION: &str = "Owner";

/// Account status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "account_status", rename_all = "snake_case")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStatus {
    Active,
    Inactive,
    Locked,
    PendingVerification,
    Suspended,
    Trial,
}

impl AccountStatus {
    /// Converts status to its database label
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Inactive => "inactive",
            AccountStatus::Locked => "locked",
            AccountStatus::PendingVerification => "pending_verification",
            AccountStatus::Suspended => "suspended",
            AccountStatus::Trial => "trial",
        }
    }

    /// Parses a status, accepting either case
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "active" => Some(AccountStatus::Active),
            "inactive" => Some(AccountStatus::Inactive),
            "locked" => Some(AccountStatus::Locked),
            "pending_verification" => Some(AccountStatus::PendingVerification),
            "suspended" => Some(AccountStatus::Suspended),
            "trial" => Some(AccountStatus::Trial),
            _ => None,
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User row
///
/// The password hash is never serialized.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,

    /// Login identifier (unique among non-deleted users, case-insensitive)
    pub identifier: String,

    /// Email (unique among non-deleted users, case-insensitive)
    pub email: String,

    /// Argon2id PHC string
    #[serde(skip_serializing, default)]
    pub password_hash: String,

    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub position: Option<String>,
    pub role: String,
    pub account_status: AccountStatus,

    /// Business this account belongs to
    pub business_id: Option<Uuid>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl User {
    /// First and last name joined with a space
    pub fn full_name(&self) -> String {
        match (self.first_name.as_deref(), self.last_name.as_deref()) {
            (Some(first), Some(last)) if !last.is_empty() => format!("{} {}", first, last),
            (Some(first), _) => first.to_string(),
            (None, Some(last)) => last.to_string(),
            (None, None) => String::new(),
        }
    }
}

/// Input for creating an owner account
#[derive(Debug, Clone)]
pub struct NewOwnerUser {
    pub identifier: String,
    pub email: String,
    pub password_hash: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub business_id: Uuid,
}

const USER_COLUMNS: &str = "id, identifier, email, password_hash, first_name, last_name, phone, \
     position, role, account_status, business_id, created_at, updated_at, deleted_at";

impl User {
    /// Inserts an active business-owner account bound to `business_id`
    pub async fn insert_owner(
        conn: &mut PgConnection,
        data: NewOwnerUser,
    ) -> Result<Self, sqlx::Error> {
        let query = format!(
            "INSERT INTO users (identifier, email, password_hash, first_name, last_name, phone,
                                position, role, account_status, business_id)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'active', $9)
             RETURNING {USER_COLUMNS}"
        );

        sqlx::query_as::<_, User>(&query)
            .bind(data.identifier)
            .bind(data.email)
            .bind(data.password_hash)
            .bind(data.first_name)
            .bind(data.last_name)
            .bind(data.phone)
            .bind(OWNER_POSITION)
            .bind(BUSINESS_OWNER_ROLE)
            .bind(data.business_id)
            .fetch_one(&mut *conn)
            .await
    }

    /// Finds a non-deleted user by ID
    pub async fn find_by_id(conn: &mut PgConnection, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let query =
            format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1 AND deleted_at IS NULL");

        sqlx::query_as::<_, User>(&query)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
    }

    /// Every non-deleted business-owner account bound to a business
    pub async fn list_owners(conn: &mut PgConnection) -> Result<Vec<Self>, sqlx::Error> {
        let query = format!(
            "SELECT {USER_COLUMNS} FROM users
             WHERE role = $1 AND business_id IS NOT NULL AND deleted_at IS NULL
             ORDER BY created_at DESC"
        );

        sqlx::query_as::<_, User>(&query)
            .bind(BUSINESS_OWNER_ROLE)
            .fetch_all(&mut *conn)
            .await
    }

    /// Whether a non-deleted user holds `identifier` (case-insensitive)
    pub async fn identifier_exists(
        conn: &mut PgConnection,
        identifier: &str,
    ) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT EXISTS (
                SELECT 1 FROM users
                WHERE LOWER(identifier) = LOWER($1) AND deleted_at IS NULL
            )",
        )
        .bind(identifier)
        .fetch_one(&mut *conn)
        .await
    }

    /// Whether a non-deleted user holds `email` (case-insensitive)
    pub async fn email_exists(conn: &mut PgConnection, email: &str) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT EXISTS (
                SELECT 1 FROM users
                WHERE LOWER(email) = LOWER($1) AND deleted_at IS NULL
            )",
        )
        .bind(email)
        .fetch_one(&mut *conn)
        .await
    }

    /// Tombstones the user
    pub async fn soft_delete(conn: &mut PgConnection, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE users SET deleted_at = NOW(), updated_at = NOW()
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

    fn user(first: Option<&str>, last: Option<&str>) -> User {
        User {
            id: Uuid::new_v4(),
            identifier: "owner".to_string(),
            email: "owner@example.com".to_string(),
            password_hash: "$argon2id$".to_string(),
            first_name: first.map(str::to_string),
            last_name: last.map(str::to_string),
            phone: None,
            position: Some(OWNER_POSITION.to_string()),
            role: BUSINESS_OWNER_ROLE.to_string(),
            account_status: AccountStatus::Active,
            business_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        }
    }

    #[test]
    fn test_full_name() {
        assert_eq!(user(Some("Sok"), Some("Dara")).full_name(), "Sok Dara");
        assert_eq!(user(Some("Sok"), None).full_name(), "Sok");
        assert_eq!(user(None, None).full_name(), "");
    }

    #[test]
    fn test_password_hash_not_serialized() {
        let json = serde_json::to_value(user(Some("A"), None)).unwrap();
        assert!(json.get("password_hash").is_none());
    }

    #[test]
    fn test_account_status_labels() {
        assert_eq!(AccountStatus::PendingVerification.as_str(), "pending_verification");
        assert_eq!(
            AccountStatus::from_str("PENDING_VERIFICATION"),
            Some(AccountStatus::PendingVerification)
        );
    }
}
