use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "ACQUA API",
        version = "0.2.0",
        description = r#"
# ACQUA Water-Delivery API

Backend for the ACQUA bottled-water ordering platform: customer accounts,
bottle orders, promotional coupons, discount pricing, and loyalty rewards.

## Features

- **Accounts**: JWT-backed registration and login with admin and customer roles
- **Coupons**: percentage discounts with expiry, usage caps, and per-customer ownership
- **Atomic redemption**: concurrent orders can never push a coupon past its usage cap
- **Pricing**: half-up rounding to 2 decimals, discount applied to the exact product
- **Loyalty**: every 5th delivered order mints a personal 20% coupon valid for 30 days

## Authentication

Authenticated endpoints expect a bearer token from register or login:

```
Authorization: Bearer <your-jwt-token>
```

## Error Handling

Errors use a consistent JSON shape with the matching HTTP status code:

```json
{
  "error": "Conflict",
  "message": "usage limit reached",
  "request_id": "0b355cf6-5731-4a38-9788-7982ec3f0c11",
  "timestamp": "2025-06-09T10:30:00.000Z"
}
```

## Pagination

List endpoints accept `page` (default 1) and `limit` (default 20, max 100).
        "#,
        contact(
            name = "ACQUA Platform Team",
            email = "dev@acqua-delivery.com",
            url = "https://github.com/acqua-delivery/acqua-api"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Auth", description = "Registration, login, and profile"),
        (name = "Coupons", description = "Coupon administration, validation, and availability"),
        (name = "Orders", description = "Order intake and lifecycle"),
        (name = "Customers", description = "Customer account administration"),
        (name = "Stats", description = "Usage counters")
    ),
    paths(
        // Auth
        crate::handlers::auth::register,
        crate::handlers::auth::login,
        crate::handlers::auth::me,

        // Coupons
        crate::handlers::coupons::create_coupon,
        crate::handlers::coupons::list_coupons,
        crate::handlers::coupons::delete_coupon,
        crate::handlers::coupons::set_coupon_status,
        crate::handlers::coupons::validate_coupon,
        crate::handlers::coupons::my_coupons,

        // Orders
        crate::handlers::orders::create_order,
        crate::handlers::orders::list_orders,
        crate::handlers::orders::get_order,
        crate::handlers::orders::update_order_status,
        crate::handlers::orders::delete_order,

        // Customers and stats
        crate::handlers::customers::list_customers,
        crate::handlers::stats::get_stats,
    ),
    components(
        schemas(
            // Common types
            crate::ApiResponse<serde_json::Value>,
            crate::PaginatedResponse<serde_json::Value>,
            crate::ListQuery,

            // Auth types
            crate::services::customers::RegisterRequest,
            crate::services::customers::LoginRequest,
            crate::services::customers::AuthResponse,
            crate::services::customers::UserResponse,
            crate::services::customers::CustomerSummary,

            // Coupon types
            crate::services::coupons::CreateCouponRequest,
            crate::services::coupons::CouponResponse,
            crate::services::coupons::ValidationOutcome,
            crate::handlers::coupons::ValidateCouponRequest,
            crate::handlers::coupons::UpdateCouponStatusRequest,

            // Order types
            crate::services::orders::CreateOrderRequest,
            crate::services::orders::UpdateOrderStatusRequest,
            crate::services::orders::OrderResponse,
            crate::entities::order::OrderStatus,

            // Stats types
            crate::handlers::stats::StatsResponse,

            // Error types
            crate::errors::ErrorResponse
        )
    ),
    modifiers(&BearerSecurity)
)]
pub struct ApiDoc;

/// Registers the `Bearer` security scheme referenced by the path
/// annotations.
struct BearerSecurity;

impl Modify for BearerSecurity {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "Bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_document_covers_the_api() {
        let openapi = ApiDoc::openapi();
        let json = serde_json::to_string_pretty(&openapi).expect("document serializes");
        assert!(json.contains("ACQUA API"));
        assert!(json.contains("/api/v1/orders"));
        assert!(json.contains("/api/v1/coupons/validate"));
        assert!(json.contains("bearer"));
    }
}
