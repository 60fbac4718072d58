//! Coupon administration plus the customer-facing validate and
//! my-coupons endpoints.
//!
//! Validation here is read-only and always answers 200 with an outcome
//! body; actually consuming a use happens during order creation.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::services::coupons::{
    CouponResponse, CreateCouponRequest, ValidationOutcome,
};
use crate::{
    auth::AuthUser, errors::ServiceError, ApiResponse, AppState, ListQuery, PaginatedResponse,
};

/// Request body for the validate endpoint.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ValidateCouponRequest {
    /// Coupon code to check; matching is case-insensitive
    #[schema(example = "VERANO2024")]
    pub code: String,
}

/// Request body for activating or deactivating a coupon.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UpdateCouponStatusRequest {
    pub is_active: bool,
}

/// Create a coupon
#[utoipa::path(
    post,
    path = "/api/v1/coupons",
    tag = "Coupons",
    summary = "Create coupon",
    description = "Create a public promotional coupon. Admin only.",
    request_body = CreateCouponRequest,
    responses(
        (status = 201, description = "Coupon created", body = ApiResponse<CouponResponse>,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 400, description = "Invalid coupon data", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Admin role required", body = crate::errors::ErrorResponse),
        (status = 409, description = "Coupon code already exists", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn create_coupon(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(request): Json<CreateCouponRequest>,
) -> Result<(StatusCode, Json<ApiResponse<CouponResponse>>), ServiceError> {
    if !auth_user.is_admin() {
        return Err(ServiceError::Forbidden(
            "admin role required to create coupons".to_string(),
        ));
    }

    let coupon = state.services.coupons.create_coupon(request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(coupon))))
}

/// List all coupons
#[utoipa::path(
    get,
    path = "/api/v1/coupons",
    tag = "Coupons",
    summary = "List coupons",
    description = "Paginated listing of every coupon, newest first. Admin only.",
    params(
        ("page" = Option<u64>, Query, description = "Page number (default: 1)"),
        ("limit" = Option<u64>, Query, description = "Items per page (default: 20, max: 100)"),
    ),
    responses(
        (status = 200, description = "Coupons retrieved", body = ApiResponse<PaginatedResponse<CouponResponse>>,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Admin role required", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn list_coupons(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
    auth_user: AuthUser,
) -> Result<Json<ApiResponse<PaginatedResponse<CouponResponse>>>, ServiceError> {
    if !auth_user.is_admin() {
        return Err(ServiceError::Forbidden(
            "admin role required to list coupons".to_string(),
        ));
    }

    let result = state
        .services
        .coupons
        .list_coupons(query.page, query.limit)
        .await?;

    Ok(Json(ApiResponse::success(PaginatedResponse {
        total_pages: result.total.div_ceil(result.per_page),
        items: result.coupons,
        total: result.total,
        page: result.page,
        limit: result.per_page,
    })))
}

/// Delete a coupon
#[utoipa::path(
    delete,
    path = "/api/v1/coupons/{code}",
    tag = "Coupons",
    summary = "Delete coupon",
    description = "Remove a coupon. Orders that already redeemed it keep their snapshot. Admin only.",
    params(
        ("code" = String, Path, description = "Coupon code"),
    ),
    responses(
        (status = 204, description = "Coupon deleted"),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Admin role required", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown coupon code", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn delete_coupon(
    State(state): State<AppState>,
    Path(code): Path<String>,
    auth_user: AuthUser,
) -> Result<StatusCode, ServiceError> {
    if !auth_user.is_admin() {
        return Err(ServiceError::Forbidden(
            "admin role required to delete coupons".to_string(),
        ));
    }

    state.services.coupons.delete_coupon(&code).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Activate or deactivate a coupon
#[utoipa::path(
    put,
    path = "/api/v1/coupons/{code}/status",
    tag = "Coupons",
    summary = "Set coupon status",
    description = "Flip a coupon's active flag without deleting its record. Admin only.",
    params(
        ("code" = String, Path, description = "Coupon code"),
    ),
    request_body = UpdateCouponStatusRequest,
    responses(
        (status = 200, description = "Coupon updated", body = ApiResponse<CouponResponse>,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Admin role required", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown coupon code", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn set_coupon_status(
    State(state): State<AppState>,
    Path(code): Path<String>,
    auth_user: AuthUser,
    Json(request): Json<UpdateCouponStatusRequest>,
) -> Result<Json<ApiResponse<CouponResponse>>, ServiceError> {
    if !auth_user.is_admin() {
        return Err(ServiceError::Forbidden(
            "admin role required to change coupon status".to_string(),
        ));
    }

    let coupon = state
        .services
        .coupons
        .set_coupon_status(&code, request.is_active)
        .await?;
    Ok(Json(ApiResponse::success(coupon)))
}

/// Check a coupon without consuming a use
#[utoipa::path(
    post,
    path = "/api/v1/coupons/validate",
    tag = "Coupons",
    summary = "Validate coupon",
    description = "Read-only redeemability check for the authenticated customer. \
        Answers 200 for every well-formed request; unusable coupons come back \
        with `valid: false` and a reason message.",
    request_body = ValidateCouponRequest,
    responses(
        (status = 200, description = "Validation outcome", body = ApiResponse<ValidationOutcome>,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn validate_coupon(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(request): Json<ValidateCouponRequest>,
) -> Result<Json<ApiResponse<ValidationOutcome>>, ServiceError> {
    let outcome = state
        .services
        .coupons
        .validate_coupon(&request.code, auth_user.user_id)
        .await?;
    Ok(Json(ApiResponse::success(outcome)))
}

/// Coupons available to the authenticated customer
#[utoipa::path(
    get,
    path = "/api/v1/coupons/my-coupons",
    tag = "Coupons",
    summary = "My coupons",
    description = "Coupons the customer could redeem right now: public ones plus their own loyalty rewards, soonest expiry first",
    responses(
        (status = 200, description = "Available coupons", body = ApiResponse<Vec<CouponResponse>>,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn my_coupons(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> Result<Json<ApiResponse<Vec<CouponResponse>>>, ServiceError> {
    let coupons = state
        .services
        .coupons
        .list_for_customer(auth_user.user_id)
        .await?;
    Ok(Json(ApiResponse::success(coupons)))
}
