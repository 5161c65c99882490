use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Checkout Core API",
        version = "0.1.0",
        description = r#"
# Checkout Core

Turns a shopping cart and a settled payment into exactly one order.

## Flow

1. `POST /payments/create-intent` prices the cart and opens a payment intent.
2. The client confirms payment with the provider.
3. `POST /payments/confirm-order` and the provider's `payment_intent.succeeded`
   webhook both reconcile the intent. Whichever arrives first creates the
   order; the other gets the same order back.

## Authentication

Customer endpoints require a bearer JWT:

```
Authorization: Bearer <your-jwt-token>
```

The webhook endpoint is authenticated by its `Stripe-Signature` header instead.

## Error Handling

Errors share one shape. Branch on `code`; `message` is for humans:

```json
{
  "error": "Bad Request",
  "code": "payment_not_complete",
  "message": "Payment not complete: payment intent status is processing",
  "timestamp": "2024-01-01T00:00:00Z"
}
```
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080/api/v1", description = "Local development")
    ),
    tags(
        (name = "Payments", description = "Intent creation, order confirmation and provider webhooks"),
        (name = "Orders", description = "Order read endpoints"),
        (name = "Health", description = "Health check endpoints")
    ),
    paths(
        // Payments
        crate::handlers::checkout::create_payment_intent,
        crate::handlers::checkout::confirm_order,
        crate::handlers::payment_webhooks::payment_webhook,

        // Orders
        crate::handlers::orders::my_orders,
        crate::handlers::orders::get_order,

        // Health
        crate::handlers::health::health_check,
    ),
    components(
        schemas(
            crate::handlers::checkout::ConfirmOrderRequest,
            crate::services::checkout::CreateIntentResponse,
            crate::services::orders::OrderResponse,
            crate::services::orders::OrderItemResponse,
            crate::services::pricing::PriceBreakdown,
            crate::entities::OrderStatus,
            crate::handlers::health::HealthResponse,
            crate::handlers::health::DatabaseHealth,
            crate::handlers::health::ComponentStatus,

            // Error types
            crate::errors::ErrorResponse
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDocV1;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
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
}

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}
