/// Business-owner endpoints
///
/// # Endpoints
///
/// - `POST   /v1/owners` - Onboard owner, business, subscription and payment at once
/// - `GET    /v1/owners` - Filtered, sorted, paginated owner listing
/// - `GET    /v1/owners/:id` - Owner with business, subscription and payment standing
/// - `POST   /v1/owners/:id/renew` - Renew the owner's subscription
/// - `POST   /v1/owners/:id/change-plan` - Change the owner's plan
/// - `POST   /v1/owners/:id/cancel` - Cancel the owner's subscription
/// - `DELETE /v1/owners/:id` - Soft-delete owner, business and their records
/// - `POST   /v1/businesses/:id/status` - Suspend or activate a business
///
/// # Listing filters
///
/// Status filters take comma-separated values:
///
/// ```text
/// GET /v1/owners?subscription_status=ACTIVE,EXPIRING_SOON&payment_status=UNPAID
///     &search=noodle&sort_by=subscription_end&direction=asc&page=2&page_size=50
/// ```

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use dinehub_shared::billing::owners::{
    CancelForOwner, ChangePlanForOwner, OnboardOwner, OnboardedOwner, OwnerInfo, OwnerSort,
    PaymentInfo, RenewForOwner, SortDirection,
};
use dinehub_shared::billing::{BillingStatus, DisplayStatus, OwnerDetail, OwnerFilter, Page};
use dinehub_shared::models::business::{Business, BusinessStatus, NewBusiness};
use dinehub_shared::models::user::AccountStatus;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

/// Business profile part of an onboarding request
#[derive(Debug, Deserialize, Validate)]
pub struct BusinessRequest {
    #[validate(length(min = 1, max = 200, message = "Business name must be 1-200 characters"))]
    pub name: String,

    #[validate(email(message = "Invalid business email"))]
    pub email: Option<String>,

    pub phone: Option<String>,
    pub address: Option<String>,
    pub description: Option<String>,
}

/// Owner account part of an onboarding request
#[derive(Debug, Deserialize, Validate)]
pub struct OwnerRequest {
    #[validate(length(min = 3, max = 50, message = "Identifier must be 3-50 characters"))]
    pub identifier: String,

    #[validate(email(message = "Invalid email address"))]
    pub email: String,

    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: String,

    #[validate(length(min = 1, max = 200, message = "Full name must be 1-200 characters"))]
    pub full_name: String,

    pub phone: Option<String>,
}

/// Onboarding request
#[derive(Debug, Deserialize)]
pub struct OnboardRequest {
    pub business: BusinessRequest,
    pub owner: OwnerRequest,
    pub plan_id: Uuid,
    pub custom_duration_days: Option<i32>,

    #[serde(default)]
    pub auto_renew: bool,

    pub payment: Option<PaymentInfo>,
}

impl OnboardRequest {
    fn into_input(self) -> ApiResult<OnboardOwner> {
        self.business.validate()?;
        self.owner.validate()?;

        Ok(OnboardOwner {
            business: NewBusiness {
                name: self.business.name,
                email: self.business.email,
                phone: self.business.phone,
                address: self.business.address,
                description: self.business.description,
            },
            owner: OwnerInfo {
                identifier: self.owner.identifier,
                email: self.owner.email,
                password: self.owner.password,
                full_name: self.owner.full_name,
                phone: self.owner.phone,
            },
            plan_id: self.plan_id,
            custom_duration_days: self.custom_duration_days,
            auto_renew: self.auto_renew,
            payment: self.payment,
        })
    }
}

/// Business status change
#[derive(Debug, Deserialize)]
pub struct BusinessStatusRequest {
    pub status: BusinessStatus,
}

/// Query string of the owner listing
#[derive(Debug, Default, Deserialize)]
pub struct OwnerListQuery {
    pub account_status: Option<String>,
    pub business_status: Option<String>,
    pub subscription_status: Option<String>,
    pub payment_status: Option<String>,
    pub auto_renew: Option<bool>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    pub search: Option<String>,
    pub sort_by: Option<OwnerSort>,
    pub direction: Option<SortDirection>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl OwnerListQuery {
    /// Parses the comma-separated status lists into a filter
    pub fn into_filter(self) -> ApiResult<OwnerFilter> {
        Ok(OwnerFilter {
            account_statuses: parse_list(
                self.account_status.as_deref(),
                "account_status",
                AccountStatus::from_str,
            )?,
            business_statuses: parse_list(
                self.business_status.as_deref(),
                "business_status",
                BusinessStatus::from_str,
            )?,
            subscription_statuses: parse_list(
                self.subscription_status.as_deref(),
                "subscription_status",
                DisplayStatus::from_str,
            )?,
            payment_statuses: parse_list(
                self.payment_status.as_deref(),
                "payment_status",
                BillingStatus::from_str,
            )?,
            auto_renew: self.auto_renew,
            created_from: self.created_from,
            created_to: self.created_to,
            search: self.search,
            sort_by: self.sort_by.unwrap_or_default(),
            direction: self.direction.unwrap_or_default(),
            page: self.page.unwrap_or(1),
            page_size: self.page_size.unwrap_or(0),
        })
    }
}

fn parse_list<T>(raw: Option<&str>, field: &str, parse: fn(&str) -> Option<T>) -> ApiResult<Vec<T>> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };

    raw.split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| {
            parse(v).ok_or_else(|| ApiError::BadRequest(format!("unknown {} '{}'", field, v)))
        })
        .collect()
}

/// Onboard a paying business in one transaction
///
/// # Errors
///
/// - `404`: unknown plan
/// - `422`: invalid fields, a taken identifier or email, or an unknown payment method
pub async fn onboard_owner(
    State(state): State<AppState>,
    Json(req): Json<OnboardRequest>,
) -> ApiResult<(StatusCode, Json<OnboardedOwner>)> {
    let onboarded = state.owners.onboard(req.into_input()?).await?;
    Ok((StatusCode::CREATED, Json(onboarded)))
}

pub async fn list_owners(
    State(state): State<AppState>,
    Query(query): Query<OwnerListQuery>,
) -> ApiResult<Json<Page<OwnerDetail>>> {
    let filter = query.into_filter()?;
    Ok(Json(state.owners.list(&filter).await?))
}

pub async fn get_owner(
    State(state): State<AppState>,
    Path(owner_id): Path<Uuid>,
) -> ApiResult<Json<OwnerDetail>> {
    Ok(Json(state.owners.detail(owner_id).await?))
}

pub async fn renew_for_owner(
    State(state): State<AppState>,
    Path(owner_id): Path<Uuid>,
    Json(req): Json<RenewForOwner>,
) -> ApiResult<Json<OwnerDetail>> {
    Ok(Json(state.owners.renew_for(owner_id, req).await?))
}

pub async fn change_plan_for_owner(
    State(state): State<AppState>,
    Path(owner_id): Path<Uuid>,
    Json(req): Json<ChangePlanForOwner>,
) -> ApiResult<Json<OwnerDetail>> {
    Ok(Json(state.owners.change_plan_for(owner_id, req).await?))
}

pub async fn cancel_for_owner(
    State(state): State<AppState>,
    Path(owner_id): Path<Uuid>,
    Json(req): Json<CancelForOwner>,
) -> ApiResult<Json<OwnerDetail>> {
    if req.reason.trim().is_empty() {
        return Err(ApiError::Unprocessable("a cancellation reason is required".to_string()));
    }

    Ok(Json(state.owners.cancel_for(owner_id, req).await?))
}

pub async fn delete_owner(
    State(state): State<AppState>,
    Path(owner_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.owners.delete(owner_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn set_business_status(
    State(state): State<AppState>,
    Path(business_id): Path<Uuid>,
    Json(req): Json<BusinessStatusRequest>,
) -> ApiResult<Json<Business>> {
    Ok(Json(
        state.owners.set_business_status(business_id, req.status).await?,
    ))
}
