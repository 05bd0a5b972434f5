use axum::response::Json;
use utoipa::{
    openapi::security::{Http, HttpAuthScheme, SecurityScheme},
    Modify, OpenApi,
};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Food Order API",
        version = "1.0.0",
        description = r#"
# Food Order API

Order and payment lifecycle for a food ordering app.

## Authentication

Customer and admin endpoints take a JWT in the Authorization header:

```
Authorization: Bearer <your-jwt-token>
```

Payment confirmation and the gateway webhook are public; the gateway session
id is the capability.

## Error Handling

Errors use one envelope with a stable machine-readable `kind`:

```json
{
  "error": "Bad Request",
  "kind": "BelowMinimumOrder",
  "message": "Order total is below the minimum order amount",
  "requestId": "3f1c9a52-8d2e-4b8f-9a61-0c2d7e5b4a10",
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
        (url = "http://localhost:8080", description = "Local development")
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Orders", description = "Customer order endpoints"),
        (name = "Admin", description = "Staff order management"),
        (name = "Payments", description = "Gateway callbacks"),
        (name = "Health", description = "Health check endpoints")
    ),
    paths(
        crate::handlers::health::health_check,

        // Orders
        crate::handlers::orders::create_order,
        crate::handlers::orders::confirm_order,
        crate::handlers::orders::list_my_orders,
        crate::handlers::orders::get_order,
        crate::handlers::orders::update_order,

        // Admin
        crate::handlers::orders::admin_list_orders,
        crate::handlers::orders::admin_update_order,

        // Webhooks
        crate::handlers::payment_webhooks::payment_webhook,
    ),
    components(
        schemas(
            crate::handlers::orders::OrderResponse,
            crate::handlers::orders::OrderLineResponse,
            crate::handlers::orders::CreateOrderResponse,
            crate::services::checkout::CreateOrderRequest,
            crate::services::orders::OwnerOrderUpdate,
            crate::services::orders::AdminOrderUpdate,
            crate::models::order::OrderStatus,
            crate::models::order::PaymentStatus,
            crate::models::order::PaymentMethod,
            crate::errors::ErrorResponse
        )
    )
)]
pub struct ApiDocV1;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "Bearer",
            SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
        );
    }
}

/// GET /api-docs/openapi.json
pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDocV1::openapi())
}
