use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront API",
        version = "0.1.0",
        description = r#"
# Storefront API

Orders, payments and entitlements for a digital-goods storefront.

## Authentication

Endpoints other than `/health` and the payment webhook take an HS256 JWT:

```
Authorization: Bearer <your-jwt-token>
```

The payment webhook is authenticated by the gateway's HMAC signature header.
        "#
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Orders", description = "Checkout and order endpoints"),
        (name = "Payments", description = "Payment gateway callbacks"),
        (name = "Downloads", description = "Entitlement checks and quota use"),
        (name = "Admin", description = "Administrative endpoints"),
        (name = "Health", description = "Health check endpoints")
    ),
    paths(
        crate::handlers::orders::create_product_order,
        crate::handlers::orders::create_membership_order,
        crate::handlers::orders::get_order,
        crate::handlers::orders::verify_payment,
        crate::handlers::orders::cancel_order,
        crate::handlers::payment_webhooks::payment_webhook,
        crate::handlers::admin::refund_order,
        crate::handlers::admin::cancel_order,
        crate::handlers::downloads::check_access,
        crate::handlers::downloads::record_download,
        crate::handlers::downloads::record_remix_request,
        crate::handlers::health::health_check,
    ),
    components(
        schemas(
            crate::handlers::orders::CreateProductOrderRequest,
            crate::handlers::orders::CreateMembershipOrderRequest,
            crate::handlers::orders::VerifyPaymentRequest,
            crate::services::checkout::CheckoutResult,
            crate::services::refunds::RefundResult,
            crate::services::entitlements::Access,
            crate::services::entitlements::UsageReceipt,
            crate::models::OrderView,
            crate::models::OrderKind,
            crate::models::OrderAmounts,
            crate::models::OrderItemSnapshot,
            crate::handlers::health::HealthResponse,
            crate::errors::ErrorResponse
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}
