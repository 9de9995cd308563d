/// Subscription plan catalog
///
/// Read-mostly access to plans plus the administrative writes. Exactly one
/// plan may be the default; [`PlanCatalog::set_default`] clears the previous
/// default and marks the new one in a single transaction.

use super::money::{validate_amount, MAX_PLAN_PRICE};
use crate::error::{EngineError, EngineResult};
use crate::models::plan::{CreatePlan, SubscriptionPlan, UpdatePlan, MAX_DURATION_DAYS, UNLIMITED};
use sqlx::{PgConnection, PgPool};
use tracing::info;
use uuid::Uuid;

/// Plan catalog service
#[derive(Clone)]
pub struct PlanCatalog {
    db: PgPool,
}

impl PlanCatalog {
    pub fn new(db: PgPool) -> Self {
        PlanCatalog { db }
    }

    /// Creates a plan
    ///
    /// # Errors
    ///
    /// `Validation` for a blank name, negative price, non-positive duration,
    /// caps below -1, or a name already used by another plan.
    pub async fn create(&self, mut data: CreatePlan) -> EngineResult<SubscriptionPlan> {
        data.name = data.name.trim().to_string();
        validate_plan_fields(
            Some(&data.name),
            Some(data.price),
            Some(data.duration_days),
            &[data.max_staff, data.max_menu_items, data.max_tables],
        )?;

        let mut conn = self.db.acquire().await?;
        let plan = SubscriptionPlan::insert(&mut conn, data).await?;

        info!(plan_id = %plan.id, name = %plan.name, price = %plan.price, "Plan created");
        Ok(plan)
    }

    /// Applies a partial update
    pub async fn update(&self, id: Uuid, mut data: UpdatePlan) -> EngineResult<SubscriptionPlan> {
        if let Some(name) = data.name.as_mut() {
            *name = name.trim().to_string();
        }

        let caps: Vec<i32> = [data.max_staff, data.max_menu_items, data.max_tables]
            .into_iter()
            .flatten()
            .collect();
        validate_plan_fields(data.name.as_deref(), data.price, data.duration_days, &caps)?;

        let mut conn = self.db.acquire().await?;
        let plan = SubscriptionPlan::update(&mut conn, id, data)
            .await?
            .ok_or_else(|| EngineError::not_found("plan", id))?;

        info!(plan_id = %id, "Plan updated");
        Ok(plan)
    }

    /// Finds a plan, including soft-deleted ones
    pub async fn find_by_id(&self, id: Uuid) -> EngineResult<SubscriptionPlan> {
        let mut conn = self.db.acquire().await?;
        SubscriptionPlan::find_by_id(&mut conn, id)
            .await?
            .ok_or_else(|| EngineError::not_found("plan", id))
    }

    pub async fn find_by_name(&self, name: &str) -> EngineResult<SubscriptionPlan> {
        let mut conn = self.db.acquire().await?;
        SubscriptionPlan::find_by_name(&mut conn, name.trim())
            .await?
            .ok_or_else(|| EngineError::not_found("plan", name))
    }

    pub async fn list_public(&self) -> EngineResult<Vec<SubscriptionPlan>> {
        let mut conn = self.db.acquire().await?;
        Ok(SubscriptionPlan::list_public(&mut conn).await?)
    }

    pub async fn list_active(&self) -> EngineResult<Vec<SubscriptionPlan>> {
        let mut conn = self.db.acquire().await?;
        Ok(SubscriptionPlan::list_active(&mut conn).await?)
    }

    /// Public plans plus the plans tailored for `business_id`
    pub async fn list_for_business(&self, business_id: Uuid) -> EngineResult<Vec<SubscriptionPlan>> {
        let mut conn = self.db.acquire().await?;
        Ok(SubscriptionPlan::list_for_business(&mut conn, business_id).await?)
    }

    /// The plan marked default
    pub async fn default_plan(&self) -> EngineResult<SubscriptionPlan> {
        let mut conn = self.db.acquire().await?;
        SubscriptionPlan::find_default(&mut conn)
            .await?
            .ok_or_else(|| EngineError::not_found("plan", "default"))
    }

    /// Makes `id` the only default plan
    pub async fn set_default(&self, id: Uuid) -> EngineResult<SubscriptionPlan> {
        let mut tx = self.db.begin().await?;

        let plan = SubscriptionPlan::find_by_id(&mut tx, id)
            .await?
            .filter(|p| !p.is_deleted())
            .ok_or_else(|| EngineError::not_found("plan", id))?;
        if !plan.is_active {
            return Err(EngineError::validation("an inactive plan cannot be the default"));
        }

        SubscriptionPlan::clear_default(&mut tx).await?;
        let plan = SubscriptionPlan::mark_default(&mut tx, id)
            .await?
            .ok_or_else(|| EngineError::not_found("plan", id))?;
        tx.commit().await?;

        info!(plan_id = %id, name = %plan.name, "Default plan changed");
        Ok(plan)
    }

    /// Tombstones a plan; subscriptions referencing it can still read it
    pub async fn soft_delete(&self, id: Uuid) -> EngineResult<()> {
        let mut conn = self.db.acquire().await?;
        if !SubscriptionPlan::soft_delete(&mut conn, id).await? {
            return Err(EngineError::not_found("plan", id));
        }

        info!(plan_id = %id, "Plan deleted");
        Ok(())
    }

    /// Loads a plan a business may subscribe to
    ///
    /// # Errors
    ///
    /// - `NotFound` if the plan does not exist or was deleted
    /// - `Validation` if it is inactive or tailored for another business
    pub async fn available_plan_in(
        conn: &mut PgConnection,
        plan_id: Uuid,
        business_id: Uuid,
    ) -> EngineResult<SubscriptionPlan> {
        let plan = SubscriptionPlan::find_by_id(conn, plan_id)
            .await?
            .filter(|p| !p.is_deleted())
            .ok_or_else(|| EngineError::not_found("plan", plan_id))?;

        if !plan.is_available_to(business_id) {
            return Err(EngineError::validation(format!(
                "plan '{}' is not available to this business",
                plan.name
            )));
        }

        Ok(plan)
    }
}

/// Field checks shared by create and update; `None` means "not supplied"
fn validate_plan_fields(
    name: Option<&str>,
    price: Option<rust_decimal::Decimal>,
    duration_days: Option<i32>,
    caps: &[i32],
) -> EngineResult<()> {
    if matches!(name, Some(n) if n.is_empty()) {
        return Err(EngineError::validation("plan name is required"));
    }
    if let Some(price) = price {
        if price < rust_decimal::Decimal::ZERO {
            return Err(EngineError::validation("plan price must not be negative"));
        }
        validate_amount("plan price", price, MAX_PLAN_PRICE)?;
    }
    if matches!(duration_days, Some(d) if !(1..=MAX_DURATION_DAYS).contains(&d)) {
        return Err(EngineError::validation(format!(
            "plan duration must be between 1 and {} days",
            MAX_DURATION_DAYS
        )));
    }
    if caps.iter().any(|&cap| cap < UNLIMITED) {
        return Err(EngineError::validation(format!(
            "usage caps must be {} (unlimited) or a non-negative count",
            UNLIMITED
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_validate_plan_fields() {
        assert!(validate_plan_fields(Some("Pro"), Some(dec!(30)), Some(30), &[-1, 0, 10]).is_ok());
        assert!(validate_plan_fields(None, None, None, &[]).is_ok());
        assert!(validate_plan_fields(Some("Free"), Some(dec!(0)), Some(14), &[]).is_ok());

        assert!(validate_plan_fields(Some(""), None, None, &[]).is_err());
        assert!(validate_plan_fields(None, Some(dec!(-0.01)), None, &[]).is_err());
        assert!(validate_plan_fields(None, None, Some(0), &[]).is_err());
        assert!(validate_plan_fields(None, None, None, &[-2]).is_err());
    }

    #[test]
    fn test_validate_plan_bounds() {
        assert!(validate_plan_fields(None, Some(dec!(29.99)), Some(MAX_DURATION_DAYS), &[]).is_ok());

        assert!(matches!(
            validate_plan_fields(None, Some(dec!(29.999)), None, &[]),
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            validate_plan_fields(None, Some(dec!(100000000)), None, &[]),
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            validate_plan_fields(None, None, Some(MAX_DURATION_DAYS + 1), &[]),
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            validate_plan_fields(None, None, Some(2_000_000_000), &[]),
            Err(EngineError::Validation(_))
        ));
    }
}
