/// Payment ledger endpoints
///
/// # Endpoints
///
/// - `POST   /v1/payments` - Record a charge
/// - `GET    /v1/payments/:id` - Get a payment
/// - `GET    /v1/payments/by-reference/:reference` - Get a payment by reference number
/// - `POST   /v1/payments/:id/complete` - Settle a pending payment
/// - `POST   /v1/payments/:id/cancel` - Cancel a pending payment
/// - `POST   /v1/payments/:id/fail` - Mark a pending payment failed
/// - `DELETE /v1/payments/:id` - Soft-delete a payment
/// - `GET    /v1/subscriptions/:id/payments` - Payments of a subscription
/// - `GET    /v1/subscriptions/:id/payments/summary` - Totals and billing status
/// - `POST   /v1/subscriptions/:id/refunds` - Record a refund
/// - `GET    /v1/businesses/:id/payments?limit=&offset=` - Payments of a business
/// - `GET    /v1/businesses/:id/payments/summary` - Totals across a business's subscriptions
/// - `GET    /v1/payments/revenue?from=&to=&business_id=` - Completed revenue in a window
/// - `GET    /v1/payments/overdue?limit=` - Pending payments past their due period

use crate::{app::AppState, error::ApiResult};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use dinehub_shared::billing::payments::{RecordPayment, RecordRefund};
use dinehub_shared::billing::{PaymentAggregate, RevenueReport};
use dinehub_shared::models::payment::{BusinessPaymentTotals, Payment, PaymentMethod};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

/// Reason for cancelling or failing a payment
#[derive(Debug, Deserialize, Validate)]
pub struct ReasonRequest {
    #[validate(length(min = 1, max = 500, message = "Reason must be 1-500 characters"))]
    pub reason: String,
}

/// Refund request; the subscription comes from the path
#[derive(Debug, Deserialize, Validate)]
pub struct RefundRequest {
    /// Positive USD amount
    pub amount: Decimal,

    pub method: PaymentMethod,

    #[validate(length(min = 1, max = 100, message = "Reference must be 1-100 characters"))]
    pub reference_number: Option<String>,

    #[validate(length(min = 1, max = 500, message = "Reason must be 1-500 characters"))]
    pub reason: String,
}

/// Pagination for business payment history
#[derive(Debug, Deserialize)]
pub struct PaymentPage {
    #[serde(default = "default_limit")]
    pub limit: i64,

    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

/// Revenue window; `to` defaults to now
#[derive(Debug, Deserialize)]
pub struct RevenueQuery {
    pub from: DateTime<Utc>,
    pub to: Option<DateTime<Utc>>,
    pub business_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct OverdueQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

/// Record a charge against a subscription
///
/// # Errors
///
/// - `404`: unknown subscription
/// - `422`: negative, sub-cent or oversized amount, or a reference number
///   already in use
pub async fn record_payment(
    State(state): State<AppState>,
    Json(req): Json<RecordPayment>,
) -> ApiResult<(StatusCode, Json<Payment>)> {
    let payment = state.payments.record(req).await?;
    Ok((StatusCode::CREATED, Json(payment)))
}

/// Record a refund; stored as a negative completed payment
pub async fn record_refund(
    State(state): State<AppState>,
    Path(subscription_id): Path<Uuid>,
    Json(req): Json<RefundRequest>,
) -> ApiResult<(StatusCode, Json<Payment>)> {
    req.validate()?;

    let refund = state
        .payments
        .refund(RecordRefund {
            subscription_id,
            amount: req.amount,
            method: req.method,
            reference_number: req.reference_number,
            reason: req.reason,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(refund)))
}

pub async fn get_payment(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Payment>> {
    Ok(Json(state.payments.find_by_id(id).await?))
}

pub async fn get_payment_by_reference(
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> ApiResult<Json<Payment>> {
    Ok(Json(state.payments.find_by_reference(&reference).await?))
}

pub async fn complete_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Payment>> {
    Ok(Json(state.payments.complete(id).await?))
}

pub async fn cancel_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ReasonRequest>,
) -> ApiResult<Json<Payment>> {
    req.validate()?;

    Ok(Json(state.payments.cancel(id, &req.reason).await?))
}

pub async fn fail_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ReasonRequest>,
) -> ApiResult<Json<Payment>> {
    req.validate()?;

    Ok(Json(state.payments.fail(id, &req.reason).await?))
}

pub async fn delete_payment(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<StatusCode> {
    state.payments.soft_delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_subscription_payments(
    State(state): State<AppState>,
    Path(subscription_id): Path<Uuid>,
) -> ApiResult<Json<Vec<Payment>>> {
    Ok(Json(state.payments.list_for_subscription(subscription_id).await?))
}

/// Totals, outstanding balance and billing status of one subscription
pub async fn payment_summary(
    State(state): State<AppState>,
    Path(subscription_id): Path<Uuid>,
) -> ApiResult<Json<PaymentAggregate>> {
    Ok(Json(state.payments.aggregate(subscription_id).await?))
}

pub async fn list_business_payments(
    State(state): State<AppState>,
    Path(business_id): Path<Uuid>,
    Query(page): Query<PaymentPage>,
) -> ApiResult<Json<Vec<Payment>>> {
    Ok(Json(
        state
            .payments
            .list_for_business(business_id, page.limit, page.offset)
            .await?,
    ))
}

/// Totals across every subscription of a business
pub async fn business_payment_summary(
    State(state): State<AppState>,
    Path(business_id): Path<Uuid>,
) -> ApiResult<Json<BusinessPaymentTotals>> {
    Ok(Json(state.payments.business_summary(business_id).await?))
}

/// Completed revenue settled in `[from, to)`
///
/// # Errors
///
/// - `422`: `from` is not before `to`
pub async fn revenue(
    State(state): State<AppState>,
    Query(query): Query<RevenueQuery>,
) -> ApiResult<Json<RevenueReport>> {
    let to = query.to.unwrap_or_else(Utc::now);
    Ok(Json(state.payments.revenue(query.from, to, query.business_id).await?))
}

pub async fn list_overdue_payments(
    State(state): State<AppState>,
    Query(query): Query<OverdueQuery>,
) -> ApiResult<Json<Vec<Payment>>> {
    Ok(Json(state.payments.overdue(Utc::now(), query.limit).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refund_request_parses_method_labels() {
        let req: RefundRequest = serde_json::from_value(serde_json::json!({
            "amount": "15.00",
            "method": "BANK_TRANSFER",
            "reason": "Duplicate charge"
        }))
        .unwrap();

        assert_eq!(req.method, PaymentMethod::BankTransfer);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_reason_required() {
        let req = ReasonRequest {
            reason: String::new(),
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_revenue_query_parses_timestamps() {
        let query: RevenueQuery = serde_json::from_value(serde_json::json!({
            "from": "2026-01-01T00:00:00Z"
        }))
        .unwrap();

        assert_eq!(query.from.to_rfc3339(), "2026-01-01T00:00:00+00:00");
        assert!(query.to.is_none());
        assert!(query.business_id.is_none());
    }

    #[test]
    fn test_payment_page_defaults() {
        let page: PaymentPage = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(page.limit, 50);
        assert_eq!(page.offset, 0);
    }
}
