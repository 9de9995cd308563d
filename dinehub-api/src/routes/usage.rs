/// Plan usage cap endpoint
///
/// ```text
/// GET /v1/businesses/:id/usage/:resource?current=4
/// ```
///
/// `resource` is one of `staff`, `menu_items` or `tables`. The response
/// says whether one more item fits under the business's current plan:
///
/// ```json
/// { "allowed": true, "current": 4, "limit": 5, "remaining": 1 }
/// ```
///
/// `limit` and `remaining` are `null` on unlimited plans. A business with
/// no live subscription is never allowed.

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
};
use axum::{
    extract::{Path, Query, State},
    Json,
};
use dinehub_shared::quota::{UsageCheckResult, UsageResource};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct UsageQuery {
    /// Items the business already has
    #[serde(default)]
    pub current: u32,
}

pub async fn check_usage(
    State(state): State<AppState>,
    Path((business_id, resource)): Path<(Uuid, String)>,
    Query(query): Query<UsageQuery>,
) -> ApiResult<Json<UsageCheckResult>> {
    let resource = UsageResource::from_str(&resource)
        .ok_or_else(|| ApiError::BadRequest(format!("unknown usage resource '{}'", resource)))?;

    Ok(Json(state.usage.check(business_id, resource, query.current).await?))
}
