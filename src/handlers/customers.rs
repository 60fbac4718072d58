//! Customer account administration.

use axum::{
    extract::{Query, State},
    Json,
};

use crate::services::customers::CustomerSummary;
use crate::{
    auth::AuthUser, errors::ServiceError, ApiResponse, AppState, ListQuery, PaginatedResponse,
};

/// List customer accounts
#[utoipa::path(
    get,
    path = "/api/v1/customers",
    tag = "Customers",
    summary = "List customers",
    description = "Paginated customer accounts with per-customer order counts, newest first. Admin only.",
    params(
        ("page" = Option<u64>, Query, description = "Page number (default: 1)"),
        ("limit" = Option<u64>, Query, description = "Items per page (default: 20, max: 100)"),
    ),
    responses(
        (status = 200, description = "Customers retrieved", body = ApiResponse<PaginatedResponse<CustomerSummary>>,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Admin role required", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn list_customers(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
    auth_user: AuthUser,
) -> Result<Json<ApiResponse<PaginatedResponse<CustomerSummary>>>, ServiceError> {
    if !auth_user.is_admin() {
        return Err(ServiceError::Forbidden(
            "admin role required to list customers".to_string(),
        ));
    }

    let result = state
        .services
        .customers
        .list_customers(query.page, query.limit)
        .await?;

    Ok(Json(ApiResponse::success(PaginatedResponse {
        total_pages: result.total.div_ceil(result.per_page),
        items: result.customers,
        total: result.total,
        page: result.page,
        limit: result.per_page,
    })))
}
