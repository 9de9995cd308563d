/// Subscription plan model and database operations
///
/// Plans are read-mostly. Once a subscription references a plan the row is
/// only touched for administrative correction, and soft-deleted plans stay
/// readable through [`SubscriptionPlan::find_by_id`] so existing subscriptions
/// can still resolve their price and duration.
///
/// # Schema
///
/// ```sql
/// CREATE TYPE plan_visibility AS ENUM ('public', 'private');
///
/// CREATE TABLE subscription_plans (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     name VARCHAR(255) NOT NULL,
///     description TEXT,
///     price NUMERIC(10, 2) NOT NULL CHECK (price >= 0),
///     duration_days INTEGER NOT NULL CHECK (duration_days > 0),
///     visibility plan_visibility NOT NULL DEFAULT 'public',
///     max_staff INTEGER NOT NULL DEFAULT -1,
///     max_menu_items INTEGER NOT NULL DEFAULT -1,
///     max_tables INTEGER NOT NULL DEFAULT -1,
///     is_active BOOLEAN NOT NULL DEFAULT TRUE,
///     is_default BOOLEAN NOT NULL DEFAULT FALSE,
///     is_trial BOOLEAN NOT NULL DEFAULT FALSE,
///     custom_for_business_id UUID REFERENCES businesses(id),
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     deleted_at TIMESTAMPTZ
/// );
///
/// CREATE UNIQUE INDEX subscription_plans_single_default
///     ON subscription_plans (is_default) WHERE is_default AND deleted_at IS NULL;
/// ```

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::PgConnection;
use uuid::Uuid;

/// Usage cap value meaning "no limit"
pub const UNLIMITED: i32 = -1;

/// Longest subscription window, plan or custom, in days
pub const MAX_DURATION_DAYS: i32 = 3650;

/// Catalog visibility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "plan_visibility", rename_all = "snake_case")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanVisibility {
    /// Listed in the public catalog
    Public,

    /// Assignable by administrators only
    Private,
}

impl PlanVisibility {
    /// Converts visibility to its database label
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanVisibility::Public => "public",
            PlanVisibility::Private => "private",
        }
    }
}

/// Subscription plan row
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SubscriptionPlan {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,

    /// Price in USD per billing period
    pub price: Decimal,

    /// Length of one billing period
    pub duration_days: i32,

    pub visibility: PlanVisibility,

    /// Usage caps, [`UNLIMITED`] for no cap
    pub max_staff: i32,
    pub max_menu_items: i32,
    pub max_tables: i32,

    pub is_active: bool,
    pub is_default: bool,
    pub is_trial: bool,

    /// Set when the plan was tailored for one business
    pub custom_for_business_id: Option<Uuid>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl SubscriptionPlan {
    /// A zero-priced plan
    pub fn is_free(&self) -> bool {
        self.price.is_zero()
    }

    /// Whether the plan has been tombstoned
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Whether `business_id` may subscribe to this plan
    pub fn is_available_to(&self, business_id: Uuid) -> bool {
        !self.is_deleted()
            && self.is_active
            && self
                .custom_for_business_id
                .map_or(true, |owner| owner == business_id)
    }

    /// Human-readable price label, e.g. `$30.00/30 days` or `Free`
    pub fn pricing_display(&self) -> String {
        if self.is_free() {
            "Free".to_string()
        } else {
            format!("${:.2}/{} days", self.price, self.duration_days)
        }
    }
}

/// Input for creating a plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePlan {
    pub name: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub duration_days: i32,
    #[serde(default = "default_visibility")]
    pub visibility: PlanVisibility,
    #[serde(default = "unlimited")]
    pub max_staff: i32,
    #[serde(default = "unlimited")]
    pub max_menu_items: i32,
    #[serde(default = "unlimited")]
    pub max_tables: i32,
    #[serde(default)]
    pub is_trial: bool,
    pub custom_for_business_id: Option<Uuid>,
}

fn default_visibility() -> PlanVisibility {
    PlanVisibility::Public
}

fn unlimited() -> i32 {
    UNLIMITED
}

/// Partial update for a plan; `None` fields are left untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdatePlan {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<Decimal>,
    pub duration_days: Option<i32>,
    pub visibility: Option<PlanVisibility>,
    pub max_staff: Option<i32>,
    pub max_menu_items: Option<i32>,
    pub max_tables: Option<i32>,
    pub is_active: Option<bool>,
    pub is_trial: Option<bool>,
}

const PLAN_COLUMNS: &str = "id, name, description, price, duration_days, visibility, max_staff, \
     max_menu_items, max_tables, is_active, is_default, is_trial, custom_for_business_id, \
     created_at, updated_at, deleted_at";

impl SubscriptionPlan {
    /// Inserts a new plan
    pub async fn insert(conn: &mut PgConnection, data: CreatePlan) -> Result<Self, sqlx::Error> {
        let query = format!(
            "INSERT INTO subscription_plans
                 (name, description, price, duration_days, visibility,
                  max_staff, max_menu_items, max_tables, is_trial, custom_for_business_id)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             RETURNING {PLAN_COLUMNS}"
        );

        sqlx::query_as::<_, SubscriptionPlan>(&query)
            .bind(data.name)
            .bind(data.description)
            .bind(data.price)
            .bind(data.duration_days)
            .bind(data.visibility)
            .bind(data.max_staff)
            .bind(data.max_menu_items)
            .bind(data.max_tables)
            .bind(data.is_trial)
            .bind(data.custom_for_business_id)
            .fetch_one(&mut *conn)
            .await
    }

    /// Finds a plan by ID, including soft-deleted ones
    pub async fn find_by_id(conn: &mut PgConnection, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let query = format!("SELECT {PLAN_COLUMNS} FROM subscription_plans WHERE id = $1");

        sqlx::query_as::<_, SubscriptionPlan>(&query)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
    }

    /// Plans among `ids`, including soft-deleted ones
    pub async fn find_by_ids(conn: &mut PgConnection, ids: &[Uuid]) -> Result<Vec<Self>, sqlx::Error> {
        let query = format!("SELECT {PLAN_COLUMNS} FROM subscription_plans WHERE id = ANY($1)");

        sqlx::query_as::<_, SubscriptionPlan>(&query)
            .bind(ids)
            .fetch_all(&mut *conn)
            .await
    }

    /// Finds a non-deleted plan by name (case-insensitive)
    pub async fn find_by_name(
        conn: &mut PgConnection,
        name: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        let query = format!(
            "SELECT {PLAN_COLUMNS} FROM subscription_plans
             WHERE LOWER(name) = LOWER($1) AND deleted_at IS NULL"
        );

        sqlx::query_as::<_, SubscriptionPlan>(&query)
            .bind(name)
            .fetch_optional(&mut *conn)
            .await
    }

    /// The current default plan, if one is marked
    pub async fn find_default(conn: &mut PgConnection) -> Result<Option<Self>, sqlx::Error> {
        let query = format!(
            "SELECT {PLAN_COLUMNS} FROM subscription_plans
             WHERE is_default AND deleted_at IS NULL"
        );

        sqlx::query_as::<_, SubscriptionPlan>(&query)
            .fetch_optional(&mut *conn)
            .await
    }

    /// Active, public, non-custom plans ordered by price
    pub async fn list_public(conn: &mut PgConnection) -> Result<Vec<Self>, sqlx::Error> {
        let query = format!(
            "SELECT {PLAN_COLUMNS} FROM subscription_plans
             WHERE visibility = 'public' AND is_active
               AND custom_for_business_id IS NULL AND deleted_at IS NULL
             ORDER BY price ASC, name ASC"
        );

        sqlx::query_as::<_, SubscriptionPlan>(&query)
            .fetch_all(&mut *conn)
            .await
    }

    /// Every active non-deleted plan, custom ones included
    pub async fn list_active(conn: &mut PgConnection) -> Result<Vec<Self>, sqlx::Error> {
        let query = format!(
            "SELECT {PLAN_COLUMNS} FROM subscription_plans
             WHERE is_active AND deleted_at IS NULL
             ORDER BY price ASC, name ASC"
        );

        sqlx::query_as::<_, SubscriptionPlan>(&query)
            .fetch_all(&mut *conn)
            .await
    }

    /// Public plans plus the plans tailored for `business_id`
    pub async fn list_for_business(
        conn: &mut PgConnection,
        business_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let query = format!(
            "SELECT {PLAN_COLUMNS} FROM subscription_plans
             WHERE is_active AND deleted_at IS NULL
               AND ((visibility = 'public' AND custom_for_business_id IS NULL)
                    OR custom_for_business_id = $1)
             ORDER BY price ASC, name ASC"
        );

        sqlx::query_as::<_, SubscriptionPlan>(&query)
            .bind(business_id)
            .fetch_all(&mut *conn)
            .await
    }

    /// Applies a partial update, returning the updated plan if it exists
    pub async fn update(
        conn: &mut PgConnection,
        id: Uuid,
        data: UpdatePlan,
    ) -> Result<Option<Self>, sqlx::Error> {
        let mut query = String::from("UPDATE subscription_plans SET updated_at = NOW()");
        let mut bind_count = 1;

        let mut push = |column: &str, present: bool| {
            if present {
                bind_count += 1;
                query.push_str(&format!(", {} = ${}", column, bind_count));
            }
        };

        push("name", data.name.is_some());
        push("description", data.description.is_some());
        push("price", data.price.is_some());
        push("duration_days", data.duration_days.is_some());
        push("visibility", data.visibility.is_some());
        push("max_staff", data.max_staff.is_some());
        push("max_menu_items", data.max_menu_items.is_some());
        push("max_tables", data.max_tables.is_some());
        push("is_active", data.is_active.is_some());
        push("is_trial", data.is_trial.is_some());

        query.push_str(&format!(
            " WHERE id = $1 AND deleted_at IS NULL RETURNING {PLAN_COLUMNS}"
        ));

        let mut q = sqlx::query_as::<_, SubscriptionPlan>(&query).bind(id);

        if let Some(name) = data.name {
            q = q.bind(name);
        }
        if let Some(description) = data.description {
            q = q.bind(description);
        }
        if let Some(price) = data.price {
            q = q.bind(price);
        }
        if let Some(duration_days) = data.duration_days {
            q = q.bind(duration_days);
        }
        if let Some(visibility) = data.visibility {
            q = q.bind(visibility);
        }
        if let Some(max_staff) = data.max_staff {
            q = q.bind(max_staff);
        }
        if let Some(max_menu_items) = data.max_menu_items {
            q = q.bind(max_menu_items);
        }
        if let Some(max_tables) = data.max_tables {
            q = q.bind(max_tables);
        }
        if let Some(is_active) = data.is_active {
            q = q.bind(is_active);
        }
        if let Some(is_trial) = data.is_trial {
            q = q.bind(is_trial);
        }

        q.fetch_optional(&mut *conn).await
    }

    /// Clears the default flag from whichever plan holds it
    pub async fn clear_default(conn: &mut PgConnection) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE subscription_plans SET is_default = FALSE, updated_at = NOW()
             WHERE is_default",
        )
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected())
    }

    /// Marks one plan as the default; callers clear the previous default first
    pub async fn mark_default(
        conn: &mut PgConnection,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        let query = format!(
            "UPDATE subscription_plans SET is_default = TRUE, updated_at = NOW()
             WHERE id = $1 AND deleted_at IS NULL
             RETURNING {PLAN_COLUMNS}"
        );

        sqlx::query_as::<_, SubscriptionPlan>(&query)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
    }

    /// Tombstones a plan and drops its default flag
    pub async fn soft_delete(conn: &mut PgConnection, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE subscription_plans
             SET deleted_at = NOW(), is_default = FALSE, updated_at = NOW()
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
    use rust_decimal_macros::dec;

    fn plan(price: Decimal) -> SubscriptionPlan {
        SubscriptionPlan {
            id: Uuid::new_v4(),
            name: "Starter".to_string(),
            description: None,
            price,
            duration_days: 30,
            visibility: PlanVisibility::Public,
            max_staff: 5,
            max_menu_items: UNLIMITED,
            max_tables: 10,
            is_active: true,
            is_default: false,
            is_trial: false,
            custom_for_business_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        }
    }

    #[test]
    fn test_is_free() {
        assert!(plan(dec!(0)).is_free());
        assert!(plan(dec!(0.00)).is_free());
        assert!(!plan(dec!(30)).is_free());
    }

    #[test]
    fn test_pricing_display() {
        assert_eq!(plan(dec!(30)).pricing_display(), "$30.00/30 days");
        assert_eq!(plan(dec!(0)).pricing_display(), "Free");
    }

    #[test]
    fn test_custom_plan_availability() {
        let business = Uuid::new_v4();
        let mut custom = plan(dec!(10));
        custom.custom_for_business_id = Some(business);

        assert!(custom.is_available_to(business));
        assert!(!custom.is_available_to(Uuid::new_v4()));

        custom.deleted_at = Some(Utc::now());
        assert!(!custom.is_available_to(business));
    }

    #[test]
    fn test_update_plan_default_is_empty() {
        let update = UpdatePlan::default();
        assert!(update.name.is_none());
        assert!(update.price.is_none());
        assert!(update.is_active.is_none());
    }
}
