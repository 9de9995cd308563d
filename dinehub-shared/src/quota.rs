/// Plan usage-cap enforcement
///
/// Every plan carries three caps: staff accounts, menu items and tables.
/// A cap of [`UNLIMITED`] (-1) means no limit. The caps applied to a business
/// are those of the plan behind its live subscription; a business without a
/// live subscription may not add anything.
///
/// Callers pass their own current count, since the counted resources live
/// outside the billing engine.
///
/// # Example
///
/// ```no_run
/// use dinehub_shared::quota::{UsageEnforcer, UsageResource};
/// use sqlx::PgPool;
/// use uuid::Uuid;
///
/// # async fn example(pool: PgPool, business_id: Uuid) -> Result<(), Box<dyn std::error::Error>> {
/// let enforcer = UsageEnforcer::new(pool);
///
/// // About to add a 13th table?
/// let result = enforcer.check(business_id, UsageResource::Tables, 12).await?;
/// if !result.allowed {
///     return Err("Table limit reached".into());
/// }
/// # Ok(())
/// # }
/// ```

use crate::error::{EngineError, EngineResult};
use crate::models::business::Business;
use crate::models::plan::{SubscriptionPlan, UNLIMITED};
use crate::models::subscription::Subscription;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::fmt;
use uuid::Uuid;

/// Usage enforcement error
#[derive(Debug)]
pub enum UsageError {
    /// Cap reached
    LimitExceeded {
        resource: UsageResource,
        limit: u32,
        current: u32,
    },

    /// Business has no live subscription
    NoActiveSubscription(Uuid),

    /// Lookup failed
    Engine(EngineError),
}

impl fmt::Display for UsageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UsageError::LimitExceeded {
                resource,
                limit,
                current,
            } => write!(
                f,
                "{} limit exceeded ({}/{})",
                resource.label(),
                current,
                limit
            ),
            UsageError::NoActiveSubscription(id) => {
                write!(f, "Business {} has no active subscription", id)
            }
            UsageError::Engine(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for UsageError {}

impl From<EngineError> for UsageError {
    fn from(err: EngineError) -> Self {
        UsageError::Engine(err)
    }
}

impl From<sqlx::Error> for UsageError {
    fn from(err: sqlx::Error) -> Self {
        UsageError::Engine(err.into())
    }
}

/// Capped resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageResource {
    Staff,
    MenuItems,
    Tables,
}

impl UsageResource {
    /// Human-readable name
    pub fn label(&self) -> &'static str {
        match self {
            UsageResource::Staff => "Staff",
            UsageResource::MenuItems => "Menu items",
            UsageResource::Tables => "Tables",
        }
    }

    /// Parses a path segment such as `menu-items` or `menu_items`
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "staff" => Some(UsageResource::Staff),
            "menu_items" => Some(UsageResource::MenuItems),
            "tables" => Some(UsageResource::Tables),
            _ => None,
        }
    }
}

/// Caps of one plan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageLimits {
    pub max_staff: i32,
    pub max_menu_items: i32,
    pub max_tables: i32,
}

impl UsageLimits {
    pub fn for_plan(plan: &SubscriptionPlan) -> Self {
        UsageLimits {
            max_staff: plan.max_staff,
            max_menu_items: plan.max_menu_items,
            max_tables: plan.max_tables,
        }
    }

    /// Cap for `resource`, `None` when unlimited
    pub fn get(&self, resource: UsageResource) -> Option<u32> {
        let cap = match resource {
            UsageResource::Staff => self.max_staff,
            UsageResource::MenuItems => self.max_menu_items,
            UsageResource::Tables => self.max_tables,
        };

        if cap == UNLIMITED {
            None
        } else {
            Some(cap.max(0) as u32)
        }
    }
}

/// Result of a usage check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageCheckResult {
    /// Whether one more unit may be added
    pub allowed: bool,

    pub current: u32,

    /// `None` when unlimited
    pub limit: Option<u32>,

    /// `None` when unlimited
    pub remaining: Option<u32>,
}

impl UsageCheckResult {
    /// Evaluates `current` against `limit`
    pub fn evaluate(current: u32, limit: Option<u32>) -> Self {
        match limit {
            None => UsageCheckResult {
                allowed: true,
                current,
                limit: None,
                remaining: None,
            },
            Some(limit) => UsageCheckResult {
                allowed: current < limit,
                current,
                limit: Some(limit),
                remaining: Some(limit.saturating_sub(current)),
            },
        }
    }

    /// Result for a business without a live subscription
    pub fn denied(current: u32) -> Self {
        UsageCheckResult {
            allowed: false,
            current,
            limit: Some(0),
            remaining: Some(0),
        }
    }
}

/// Usage-cap enforcement service
#[derive(Clone)]
pub struct UsageEnforcer {
    db: PgPool,
}

impl UsageEnforcer {
    pub fn new(db: PgPool) -> Self {
        UsageEnforcer { db }
    }

    /// Checks whether a business may add one more `resource`
    ///
    /// # Errors
    ///
    /// `NotFound` if the business does not exist.
    pub async fn check(
        &self,
        business_id: Uuid,
        resource: UsageResource,
        current: u32,
    ) -> EngineResult<UsageCheckResult> {
        match self.limits(business_id).await? {
            Some(limits) => Ok(UsageCheckResult::evaluate(current, limits.get(resource))),
            None => Ok(UsageCheckResult::denied(current)),
        }
    }

    /// Like [`UsageEnforcer::check`] but fails when the cap is reached
    pub async fn enforce(
        &self,
        business_id: Uuid,
        resource: UsageResource,
        current: u32,
    ) -> Result<(), UsageError> {
        let limits = self
            .limits(business_id)
            .await?
            .ok_or(UsageError::NoActiveSubscription(business_id))?;

        let result = UsageCheckResult::evaluate(current, limits.get(resource));
        if let (false, Some(limit)) = (result.allowed, result.limit) {
            return Err(UsageError::LimitExceeded {
                resource,
                limit,
                current,
            });
        }

        Ok(())
    }

    /// Caps of the plan behind the business's live subscription
    pub async fn limits(&self, business_id: Uuid) -> EngineResult<Option<UsageLimits>> {
        let mut conn = self.db.acquire().await?;

        Business::find_by_id(&mut conn, business_id)
            .await?
            .ok_or_else(|| EngineError::not_found("business", business_id))?;

        let subscription = match Subscription::find_active_for_business(&mut conn, business_id)
            .await?
            .filter(|s| s.is_live_at(Utc::now()))
        {
            Some(subscription) => subscription,
            None => return Ok(None),
        };

        let plan = SubscriptionPlan::find_by_id(&mut conn, subscription.plan_id)
            .await?
            .ok_or_else(|| EngineError::not_found("plan", subscription.plan_id))?;

        Ok(Some(UsageLimits::for_plan(&plan)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> UsageLimits {
        UsageLimits {
            max_staff: 5,
            max_menu_items: UNLIMITED,
            max_tables: 0,
        }
    }

    #[test]
    fn test_limits_get() {
        let limits = limits();
        assert_eq!(limits.get(UsageResource::Staff), Some(5));
        assert_eq!(limits.get(UsageResource::MenuItems), None);
        assert_eq!(limits.get(UsageResource::Tables), Some(0));
    }

    #[test]
    fn test_evaluate_within_cap() {
        let result = UsageCheckResult::evaluate(3, Some(5));
        assert!(result.allowed);
        assert_eq!(result.remaining, Some(2));
    }

    #[test]
    fn test_evaluate_at_cap() {
        let result = UsageCheckResult::evaluate(5, Some(5));
        assert!(!result.allowed);
        assert_eq!(result.remaining, Some(0));

        let result = UsageCheckResult::evaluate(0, Some(0));
        assert!(!result.allowed);
    }

    #[test]
    fn test_evaluate_unlimited() {
        let result = UsageCheckResult::evaluate(10_000, None);
        assert!(result.allowed);
        assert_eq!(result.limit, None);
        assert_eq!(result.remaining, None);
    }

    #[test]
    fn test_denied_without_subscription() {
        let result = UsageCheckResult::denied(0);
        assert!(!result.allowed);
        assert_eq!(result.limit, Some(0));
    }

    #[test]
    fn test_resource_parsing() {
        assert_eq!(UsageResource::from_str("menu-items"), Some(UsageResource::MenuItems));
        assert_eq!(UsageResource::from_str("STAFF"), Some(UsageResource::Staff));
        assert_eq!(UsageResource::from_str("chairs"), None);
    }

    #[test]
    fn test_usage_error_display() {
        let err = UsageError::LimitExceeded {
            resource: UsageResource::Tables,
            limit: 10,
            current: 10,
        };
        assert_eq!(err.to_string(), "Tables limit exceeded (10/10)");

        let err = UsageError::NoActiveSubscription(Uuid::nil());
        assert!(err.to_string().contains("no active subscription"));
    }
}
