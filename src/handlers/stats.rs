//! The role-dependent stats endpoint.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{auth::AuthUser, errors::ServiceError, ApiResponse, AppState};

/// Counters returned by the stats endpoint. Admins get platform-wide
/// numbers; customers get only their own order counters, so the
/// admin-only fields are omitted from their payload.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StatsResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_customers: Option<u64>,
    pub total_orders: u64,
    pub pending_orders: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivered_orders: Option<u64>,
}

/// Platform or per-customer counters
#[utoipa::path(
    get,
    path = "/api/v1/stats",
    tag = "Stats",
    summary = "Usage counters",
    description = "Admins: total customers plus platform-wide order counters. \
        Customers: their own total and pending order counts.",
    responses(
        (status = 200, description = "Counters retrieved", body = ApiResponse<StatsResponse>,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn get_stats(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> Result<Json<ApiResponse<StatsResponse>>, ServiceError> {
    let stats = if auth_user.is_admin() {
        let orders = state.services.orders.order_stats(None).await?;
        let total_customers = state.services.customers.count_customers().await?;
        StatsResponse {
            total_customers: Some(total_customers),
            total_orders: orders.total_orders,
            pending_orders: orders.pending_orders,
            delivered_orders: Some(orders.delivered_orders),
        }
    } else {
        let orders = state
            .services
            .orders
            .order_stats(Some(auth_user.user_id))
            .await?;
        StatsResponse {
            total_customers: None,
            total_orders: orders.total_orders,
            pending_orders: orders.pending_orders,
            delivered_orders: None,
        }
    };

    Ok(Json(ApiResponse::success(stats)))
}
