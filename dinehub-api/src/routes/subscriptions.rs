/// Subscription lifecycle endpoints
///
/// # Endpoints
///
/// - `POST /v1/subscriptions` - Start a subscription
/// - `GET  /v1/subscriptions/expiring?days=7` - Active windows ending soon
/// - `GET  /v1/subscriptions/expired` - Lapsed or expired windows
/// - `GET  /v1/subscriptions/:id` - Subscription with derived figures
/// - `POST /v1/subscriptions/:id/renew` - Renew into a new window
/// - `POST /v1/subscriptions/:id/cancel` - Cancel, optionally with a refund
/// - `POST /v1/subscriptions/:id/change-plan` - Swap the plan in place
/// - `POST /v1/subscriptions/:id/extend` - Push the end date out
/// - `POST /v1/subscriptions/:id/suspend` - Put on hold
/// - `POST /v1/subscriptions/:id/reactivate` - Lift a hold
/// - `POST /v1/subscriptions/:id/auto-renew` - Toggle automatic renewal
/// - `GET  /v1/businesses/:id/subscriptions` - History, newest first
/// - `GET  /v1/businesses/:id/subscriptions/current` - Most recent window
/// - `POST /v1/subscriptions/bulk/renew` - Renew many subscriptions
/// - `POST /v1/subscriptions/bulk/cancel` - Cancel many subscriptions
/// - `POST /v1/subscriptions/bulk/suspend` - Suspend many subscriptions
///
/// Bulk endpoints answer `200` with a per-subscription report even when some
/// items fail.
///
/// Transitions that the current state forbids answer `409 invalid_state`;
/// starting a second live subscription answers `409 conflict`.

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use dinehub_shared::billing::status::EXPIRING_SOON_DAYS;
use dinehub_shared::billing::subscriptions::{
    CancelSubscription, CreateSubscription, RenewSubscription,
};
use dinehub_shared::billing::{BulkReport, SubscriptionView};
use dinehub_shared::models::subscription::Subscription;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

/// Change plan request
#[derive(Debug, Deserialize)]
pub struct ChangePlanRequest {
    pub new_plan_id: Uuid,

    /// Keep the current end date instead of restarting the plan duration
    #[serde(default = "default_keep_end_date")]
    pub keep_current_end_date: bool,
}

fn default_keep_end_date() -> bool {
    true
}

/// Extend request
#[derive(Debug, Deserialize, Validate)]
pub struct ExtendRequest {
    #[validate(range(min = 1, max = 3650, message = "Days must be between 1 and 3650"))]
    pub days: i32,

    #[validate(length(min = 1, max = 500, message = "Reason must be 1-500 characters"))]
    pub reason: String,
}

/// Suspend request
#[derive(Debug, Deserialize, Validate)]
pub struct SuspendRequest {
    #[validate(length(min = 1, max = 500, message = "Reason must be 1-500 characters"))]
    pub reason: String,
}

/// Bulk renewal; every subscription gets the same plan and duration
#[derive(Debug, Deserialize, Validate)]
pub struct BulkRenewRequest {
    #[validate(length(min = 1, max = 100, message = "Between 1 and 100 subscription ids"))]
    pub subscription_ids: Vec<Uuid>,

    pub new_plan_id: Option<Uuid>,

    #[validate(range(min = 1, max = 3650, message = "Days must be between 1 and 3650"))]
    pub custom_duration_days: Option<i32>,
}

/// Bulk cancellation; never records refunds
#[derive(Debug, Deserialize, Validate)]
pub struct BulkCancelRequest {
    #[validate(length(min = 1, max = 100, message = "Between 1 and 100 subscription ids"))]
    pub subscription_ids: Vec<Uuid>,

    #[validate(length(min = 1, max = 500, message = "Reason must be 1-500 characters"))]
    pub reason: String,

    #[serde(default)]
    pub immediate: bool,
}

/// Bulk suspension
#[derive(Debug, Deserialize, Validate)]
pub struct BulkSuspendRequest {
    #[validate(length(min = 1, max = 100, message = "Between 1 and 100 subscription ids"))]
    pub subscription_ids: Vec<Uuid>,

    #[validate(length(min = 1, max = 500, message = "Reason must be 1-500 characters"))]
    pub reason: String,
}

/// Auto-renew toggle
#[derive(Debug, Deserialize)]
pub struct AutoRenewRequest {
    pub auto_renew: bool,
}

/// Query for the expiring listing
#[derive(Debug, Deserialize)]
pub struct ExpiringQuery {
    pub days: Option<i64>,
}

/// Start a subscription
///
/// # Errors
///
/// - `404`: unknown business or plan
/// - `409 conflict`: the business already has an active subscription
/// - `422`: inactive plan or bad custom duration
pub async fn create_subscription(
    State(state): State<AppState>,
    Json(req): Json<CreateSubscription>,
) -> ApiResult<(StatusCode, Json<Subscription>)> {
    let subscription = state.subscriptions.create(req).await?;
    Ok((StatusCode::CREATED, Json(subscription)))
}

pub async fn get_subscription(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SubscriptionView>> {
    Ok(Json(state.subscriptions.view(id, Utc::now()).await?))
}

pub async fn list_business_subscriptions(
    State(state): State<AppState>,
    Path(business_id): Path<Uuid>,
) -> ApiResult<Json<Vec<Subscription>>> {
    Ok(Json(state.subscriptions.history_for_business(business_id).await?))
}

pub async fn current_business_subscription(
    State(state): State<AppState>,
    Path(business_id): Path<Uuid>,
) -> ApiResult<Json<Subscription>> {
    state
        .subscriptions
        .current_for_business(business_id)
        .await?
        .map(Json)
        .ok_or_else(|| {
            ApiError::NotFound(format!("business {} has no subscription", business_id))
        })
}

pub async fn list_expiring(
    State(state): State<AppState>,
    Query(query): Query<ExpiringQuery>,
) -> ApiResult<Json<Vec<Subscription>>> {
    let days = query.days.unwrap_or(EXPIRING_SOON_DAYS);
    Ok(Json(state.subscriptions.list_expiring(Utc::now(), days).await?))
}

pub async fn list_expired(State(state): State<AppState>) -> ApiResult<Json<Vec<Subscription>>> {
    Ok(Json(state.subscriptions.list_expired(Utc::now()).await?))
}

/// Renew into a new window starting at the old end date
pub async fn renew_subscription(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<RenewSubscription>,
) -> ApiResult<(StatusCode, Json<Subscription>)> {
    let renewed = state.subscriptions.renew(id, req).await?;
    Ok((StatusCode::CREATED, Json(renewed)))
}

/// Cancel a subscription
///
/// A refund is recorded only when the body carries one.
pub async fn cancel_subscription(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<CancelSubscription>,
) -> ApiResult<Json<Subscription>> {
    if req.reason.trim().is_empty() {
        return Err(ApiError::Unprocessable("a cancellation reason is required".to_string()));
    }

    Ok(Json(state.subscriptions.cancel(id, req).await?))
}

pub async fn change_plan(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ChangePlanRequest>,
) -> ApiResult<Json<Subscription>> {
    Ok(Json(
        state
            .subscriptions
            .change_plan(id, req.new_plan_id, req.keep_current_end_date)
            .await?,
    ))
}

pub async fn extend_subscription(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ExtendRequest>,
) -> ApiResult<Json<Subscription>> {
    req.validate()?;

    Ok(Json(state.subscriptions.extend(id, req.days, &req.reason).await?))
}

pub async fn suspend_subscription(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<SuspendRequest>,
) -> ApiResult<Json<Subscription>> {
    req.validate()?;

    Ok(Json(state.subscriptions.suspend(id, &req.reason).await?))
}

pub async fn reactivate_subscription(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Subscription>> {
    Ok(Json(state.subscriptions.reactivate(id).await?))
}

pub async fn set_auto_renew(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<AutoRenewRequest>,
) -> ApiResult<Json<Subscription>> {
    Ok(Json(state.subscriptions.set_auto_renew(id, req.auto_renew).await?))
}

pub async fn bulk_renew(
    State(state): State<AppState>,
    Json(req): Json<BulkRenewRequest>,
) -> ApiResult<Json<BulkReport>> {
    req.validate()?;

    let input = RenewSubscription {
        new_plan_id: req.new_plan_id,
        custom_duration_days: req.custom_duration_days,
    };
    Ok(Json(state.subscriptions.bulk_renew(&req.subscription_ids, input).await?))
}

pub async fn bulk_cancel(
    State(state): State<AppState>,
    Json(req): Json<BulkCancelRequest>,
) -> ApiResult<Json<BulkReport>> {
    req.validate()?;

    Ok(Json(
        state
            .subscriptions
            .bulk_cancel(&req.subscription_ids, &req.reason, req.immediate)
            .await?,
    ))
}

pub async fn bulk_suspend(
    State(state): State<AppState>,
    Json(req): Json<BulkSuspendRequest>,
) -> ApiResult<Json<BulkReport>> {
    req.validate()?;

    Ok(Json(
        state
            .subscriptions
            .bulk_suspend(&req.subscription_ids, &req.reason)
            .await?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bulk_request_validation() {
        let ok: BulkCancelRequest = serde_json::from_value(serde_json::json!({
            "subscription_ids": [Uuid::new_v4(), Uuid::new_v4()],
            "reason": "Closed for renovation"
        }))
        .unwrap();
        assert!(ok.validate().is_ok());
        assert!(!ok.immediate);

        let empty = BulkSuspendRequest {
            subscription_ids: Vec::new(),
            reason: String::new(),
        };
        let errors = empty.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("subscription_ids"));
        assert!(errors.field_errors().contains_key("reason"));

        let renew = BulkRenewRequest {
            subscription_ids: vec![Uuid::new_v4()],
            new_plan_id: None,
            custom_duration_days: Some(2_000_000_000),
        };
        let errors = renew.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("custom_duration_days"));
    }

    #[test]
    fn test_change_plan_keeps_end_date_by_default() {
        let req: ChangePlanRequest = serde_json::from_value(serde_json::json!({
            "new_plan_id": Uuid::new_v4()
        }))
        .unwrap();
        assert!(req.keep_current_end_date);
    }

    #[test]
    fn test_extend_request_validation() {
        let ok = ExtendRequest {
            days: 14,
            reason: "Goodwill".to_string(),
        };
        assert!(ok.validate().is_ok());

        let bad = ExtendRequest {
            days: 0,
            reason: String::new(),
        };
        let errors = bad.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("days"));
        assert!(errors.field_errors().contains_key("reason"));
    }
}
