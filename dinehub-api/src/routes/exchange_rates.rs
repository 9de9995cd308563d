/// Exchange rate endpoints
///
/// # Endpoints
///
/// - `GET    /v1/exchange-rates/system` - Active system rate
/// - `POST   /v1/exchange-rates/system` - Set the system rate
/// - `GET    /v1/exchange-rates/current?business_id=` - Rate in force, with fallback
/// - `GET    /v1/exchange-rates/history?business_id=` - All rates of a scope
/// - `GET    /v1/exchange-rates/convert?amount=&business_id=` - USD to local currency
/// - `POST   /v1/exchange-rates/:id/activate` - Make a historical rate active
/// - `POST   /v1/exchange-rates/:id/deactivate` - Switch off a business override
/// - `DELETE /v1/exchange-rates/:id` - Soft-delete a rate
/// - `GET    /v1/businesses/:id/exchange-rate` - Active business override
/// - `POST   /v1/businesses/:id/exchange-rate` - Set a business override
///
/// Rates are local currency units per USD.

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use dinehub_shared::billing::CurrentRate;
use dinehub_shared::models::exchange_rate::{ExchangeRate, RateScope};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Set rate request
#[derive(Debug, Deserialize, Validate)]
pub struct SetRateRequest {
    pub rate: Decimal,

    #[validate(length(max = 500, message = "Notes must be at most 500 characters"))]
    pub notes: Option<String>,
}

/// Optional business scope; absent means system-wide
#[derive(Debug, Deserialize)]
pub struct ScopeQuery {
    pub business_id: Option<Uuid>,
}

/// Conversion query
#[derive(Debug, Deserialize)]
pub struct ConvertQuery {
    pub amount: Decimal,
    pub business_id: Option<Uuid>,
}

/// Conversion result
#[derive(Debug, Serialize, Deserialize)]
pub struct ConvertResponse {
    pub amount: Decimal,
    pub amount_local: Decimal,

    #[serde(flatten)]
    pub rate: CurrentRate,
}

async fn set_rate(state: &AppState, scope: RateScope, req: SetRateRequest) -> ApiResult<ExchangeRate> {
    req.validate()?;

    Ok(state.rates.set_active_rate(scope, req.rate, req.notes).await?)
}

async fn active_rate(state: &AppState, scope: RateScope) -> ApiResult<Json<ExchangeRate>> {
    state
        .rates
        .active_rate(scope)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no active exchange rate for {}", scope)))
}

pub async fn get_system_rate(State(state): State<AppState>) -> ApiResult<Json<ExchangeRate>> {
    active_rate(&state, RateScope::System).await
}

/// Set the system rate; the previous one stays as history
///
/// # Errors
///
/// - `422`: rate outside the accepted band
pub async fn set_system_rate(
    State(state): State<AppState>,
    Json(req): Json<SetRateRequest>,
) -> ApiResult<(StatusCode, Json<ExchangeRate>)> {
    let rate = set_rate(&state, RateScope::System, req).await?;
    Ok((StatusCode::CREATED, Json(rate)))
}

pub async fn get_business_rate(
    State(state): State<AppState>,
    Path(business_id): Path<Uuid>,
) -> ApiResult<Json<ExchangeRate>> {
    active_rate(&state, RateScope::Business(business_id)).await
}

/// Set a business override
///
/// # Errors
///
/// - `404`: unknown business
/// - `422`: rate outside the accepted band
pub async fn set_business_rate(
    State(state): State<AppState>,
    Path(business_id): Path<Uuid>,
    Json(req): Json<SetRateRequest>,
) -> ApiResult<(StatusCode, Json<ExchangeRate>)> {
    let rate = set_rate(&state, RateScope::Business(business_id), req).await?;
    Ok((StatusCode::CREATED, Json(rate)))
}

/// Rate in force: business override, then system rate, then the fallback
///
/// Never fails.
pub async fn current_rate(
    State(state): State<AppState>,
    Query(query): Query<ScopeQuery>,
) -> Json<CurrentRate> {
    Json(state.rates.current_rate(query.business_id).await)
}

pub async fn rate_history(
    State(state): State<AppState>,
    Query(query): Query<ScopeQuery>,
) -> ApiResult<Json<Vec<ExchangeRate>>> {
    let scope = RateScope::from_business(query.business_id);
    Ok(Json(state.rates.history(scope).await?))
}

/// Converts a USD amount at the rate in force
///
/// # Errors
///
/// - `422`: sub-cent or out-of-range amount
pub async fn convert(
    State(state): State<AppState>,
    Query(query): Query<ConvertQuery>,
) -> ApiResult<Json<ConvertResponse>> {
    let (amount_local, rate) = state.rates.convert(query.business_id, query.amount).await?;
    Ok(Json(ConvertResponse {
        amount: query.amount,
        amount_local,
        rate,
    }))
}

pub async fn activate_rate(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ExchangeRate>> {
    Ok(Json(state.rates.activate(id).await?))
}

pub async fn deactivate_rate(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ExchangeRate>> {
    Ok(Json(state.rates.deactivate(id).await?))
}

pub async fn delete_rate(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<StatusCode> {
    state.rates.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dinehub_shared::billing::RateSource;
    use rust_decimal_macros::dec;

    #[test]
    fn test_convert_response_flattens_rate() {
        let response = ConvertResponse {
            amount: dec!(10.00),
            amount_local: dec!(41000.00),
            rate: CurrentRate {
                rate: dec!(4100.0000),
                source: RateSource::System,
                rate_id: None,
            },
        };

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["source"], "SYSTEM");
        assert_eq!(json["amount_local"], "41000.00");
        assert!(json.get("rate").is_some());
    }

    #[test]
    fn test_set_rate_request_parses_number_and_string() {
        let from_str: SetRateRequest =
            serde_json::from_value(serde_json::json!({ "rate": "4100.5" })).unwrap();
        let from_num: SetRateRequest =
            serde_json::from_value(serde_json::json!({ "rate": 4100.5 })).unwrap();
        assert_eq!(from_str.rate, dec!(4100.5));
        assert_eq!(from_num.rate, dec!(4100.5));
    }
}
