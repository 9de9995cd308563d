/// Plan catalog endpoints
///
/// # Endpoints
///
/// - `POST   /v1/plans` - Create a plan
/// - `GET    /v1/plans` - List active plans
/// - `GET    /v1/plans/public` - List public plans
/// - `GET    /v1/plans/default` - Get the default plan
/// - `GET    /v1/plans/by-name/:name` - Get a plan by name
/// - `GET    /v1/plans/:id` - Get a plan
/// - `PUT    /v1/plans/:id` - Partially update a plan
/// - `POST   /v1/plans/:id/default` - Make a plan the default
/// - `DELETE /v1/plans/:id` - Soft-delete a plan
/// - `GET    /v1/businesses/:id/plans` - Plans a business may subscribe to

use crate::{app::AppState, error::ApiResult};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use dinehub_shared::models::plan::{CreatePlan, PlanVisibility, SubscriptionPlan, UpdatePlan, UNLIMITED};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

/// Create plan request
#[derive(Debug, Deserialize, Validate)]
pub struct CreatePlanRequest {
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: String,

    #[validate(length(max = 1000, message = "Description must be at most 1000 characters"))]
    pub description: Option<String>,

    /// USD price
    pub price: Decimal,

    #[validate(range(min = 1, message = "Duration must be at least one day"))]
    pub duration_days: i32,

    pub visibility: Option<PlanVisibility>,

    #[validate(range(min = -1, message = "Use -1 for unlimited"))]
    pub max_staff: Option<i32>,

    #[validate(range(min = -1, message = "Use -1 for unlimited"))]
    pub max_menu_items: Option<i32>,

    #[validate(range(min = -1, message = "Use -1 for unlimited"))]
    pub max_tables: Option<i32>,

    #[serde(default)]
    pub is_trial: bool,

    pub custom_for_business_id: Option<Uuid>,
}

impl From<CreatePlanRequest> for CreatePlan {
    fn from(req: CreatePlanRequest) -> Self {
        CreatePlan {
            name: req.name,
            description: req.description,
            price: req.price,
            duration_days: req.duration_days,
            visibility: req.visibility.unwrap_or(PlanVisibility::Public),
            max_staff: req.max_staff.unwrap_or(UNLIMITED),
            max_menu_items: req.max_menu_items.unwrap_or(UNLIMITED),
            max_tables: req.max_tables.unwrap_or(UNLIMITED),
            is_trial: req.is_trial,
            custom_for_business_id: req.custom_for_business_id,
        }
    }
}

/// Partial plan update; omitted fields are untouched
#[derive(Debug, Deserialize, Validate)]
pub struct UpdatePlanRequest {
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: Option<String>,

    pub description: Option<String>,
    pub price: Option<Decimal>,

    #[validate(range(min = 1, message = "Duration must be at least one day"))]
    pub duration_days: Option<i32>,

    pub visibility: Option<PlanVisibility>,

    #[validate(range(min = -1, message = "Use -1 for unlimited"))]
    pub max_staff: Option<i32>,

    #[validate(range(min = -1, message = "Use -1 for unlimited"))]
    pub max_menu_items: Option<i32>,

    #[validate(range(min = -1, message = "Use -1 for unlimited"))]
    pub max_tables: Option<i32>,

    pub is_active: Option<bool>,
    pub is_trial: Option<bool>,
}

impl From<UpdatePlanRequest> for UpdatePlan {
    fn from(req: UpdatePlanRequest) -> Self {
        UpdatePlan {
            name: req.name,
            description: req.description,
            price: req.price,
            duration_days: req.duration_days,
            visibility: req.visibility,
            max_staff: req.max_staff,
            max_menu_items: req.max_menu_items,
            max_tables: req.max_tables,
            is_active: req.is_active,
            is_trial: req.is_trial,
        }
    }
}

/// Create a plan
///
/// # Errors
///
/// - `422`: invalid fields, negative price or a duplicate name
pub async fn create_plan(
    State(state): State<AppState>,
    Json(req): Json<CreatePlanRequest>,
) -> ApiResult<(StatusCode, Json<SubscriptionPlan>)> {
    req.validate()?;

    let plan = state.plans.create(req.into()).await?;
    Ok((StatusCode::CREATED, Json(plan)))
}

/// List every active plan
pub async fn list_plans(State(state): State<AppState>) -> ApiResult<Json<Vec<SubscriptionPlan>>> {
    Ok(Json(state.plans.list_active().await?))
}

/// List active public plans
pub async fn list_public_plans(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<SubscriptionPlan>>> {
    Ok(Json(state.plans.list_public().await?))
}

/// Public plans plus plans custom-made for one business
pub async fn list_business_plans(
    State(state): State<AppState>,
    Path(business_id): Path<Uuid>,
) -> ApiResult<Json<Vec<SubscriptionPlan>>> {
    Ok(Json(state.plans.list_for_business(business_id).await?))
}

pub async fn get_default_plan(State(state): State<AppState>) -> ApiResult<Json<SubscriptionPlan>> {
    Ok(Json(state.plans.default_plan().await?))
}

pub async fn get_plan(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SubscriptionPlan>> {
    Ok(Json(state.plans.find_by_id(id).await?))
}

pub async fn get_plan_by_name(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<SubscriptionPlan>> {
    Ok(Json(state.plans.find_by_name(&name).await?))
}

/// Partially update a plan
///
/// # Errors
///
/// - `404`: unknown plan
/// - `422`: invalid fields
pub async fn update_plan(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdatePlanRequest>,
) -> ApiResult<Json<SubscriptionPlan>> {
    req.validate()?;

    Ok(Json(state.plans.update(id, req.into()).await?))
}

/// Make a plan the single default
pub async fn set_default_plan(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SubscriptionPlan>> {
    Ok(Json(state.plans.set_default(id).await?))
}

/// Soft-delete a plan; existing subscriptions keep reading it
pub async fn delete_plan(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<StatusCode> {
    state.plans.soft_delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn request() -> CreatePlanRequest {
        serde_json::from_value(serde_json::json!({
            "name": "Pro",
            "price": "29.99",
            "duration_days": 30,
            "max_staff": 10
        }))
        .unwrap()
    }

    #[test]
    fn test_create_request_defaults() {
        let req = request();
        assert!(req.validate().is_ok());

        let plan: CreatePlan = req.into();
        assert_eq!(plan.price, dec!(29.99));
        assert_eq!(plan.max_staff, 10);
        assert_eq!(plan.max_menu_items, UNLIMITED);
        assert_eq!(plan.visibility, PlanVisibility::Public);
        assert!(!plan.is_trial);
    }

    #[test]
    fn test_create_request_validation() {
        let mut req = request();
        req.name = String::new();
        req.duration_days = 0;
        req.max_tables = Some(-2);

        let errors = req.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("name"));
        assert!(fields.contains_key("duration_days"));
        assert!(fields.contains_key("max_tables"));
    }

    #[test]
    fn test_update_request_skips_absent_fields() {
        let req: UpdatePlanRequest = serde_json::from_value(serde_json::json!({
            "price": "19.00"
        }))
        .unwrap();
        assert!(req.validate().is_ok());

        let update: UpdatePlan = req.into();
        assert_eq!(update.price, Some(dec!(19.00)));
        assert!(update.name.is_none());
        assert!(update.duration_days.is_none());
    }
}
