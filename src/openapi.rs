use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

struct BearerAuth;

impl Modify for BearerAuth {
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

#[derive(OpenApi)]
#[openapi(
    info(
        title = "GolClub API",
        description = "Checkout, orders and payments for the GolClub jersey storefront",
    ),
    paths(
        crate::api_status,
        crate::health_check,
        crate::handlers::checkout::process_checkout,
        crate::handlers::orders::list_orders,
        crate::handlers::orders::get_order,
        crate::handlers::products::list_products,
        crate::handlers::products::get_product,
        crate::handlers::products::create_product,
        crate::handlers::payment_webhooks::payment_webhook,
    ),
    components(schemas(
        crate::errors::ErrorResponse,
        crate::StatusResponse,
        crate::entities::order::OrderStatus,
        crate::services::payments::PaymentMethod,
        crate::handlers::checkout::CheckoutPayload,
        crate::handlers::checkout::PayerPayload,
        crate::handlers::checkout::IdentificationPayload,
        crate::handlers::checkout::CheckoutResponse,
        crate::handlers::checkout::PaymentSummary,
        crate::services::catalog::CreateProductInput,
        crate::services::orders::OrderResponse,
        crate::services::orders::OrderItemResponse,
    )),
    modifiers(&BearerAuth),
    tags(
        (name = "checkout", description = "Purchase flow"),
        (name = "orders", description = "Customer order history"),
        (name = "products", description = "Jersey catalog"),
        (name = "payments", description = "Gateway notifications"),
        (name = "system", description = "Status and health"),
    )
)]
pub struct ApiDoc;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi())
}
