use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Parfum API",
        version = "1.0.0",
        description = r#"
Backend for a luxury perfume boutique.

## Storefront

Anonymous endpoints for the catalog, order placement, PayPal checkout, contact messages and
sample requests. Write endpoints are rate limited per client IP and report the
`X-RateLimit-Limit`, `X-RateLimit-Remaining` and `X-RateLimit-Reset` headers.

Amounts are in the display currency (MAD). PayPal orders are charged in USD at the configured
exchange rate.

## Back office

Order management and the contact/sample inbox need a bearer token:

```
Authorization: Bearer <jwt>
```

Tokens are issued with `parfum-admin issue-token`.

## Errors

Every failure uses the same envelope:

```json
{
  "success": false,
  "error": { "code": "VALIDATION_ERROR", "message": "...", "details": { "fields": [] } },
  "meta": { "timestamp": "2026-01-01T00:00:00Z" }
}
```
        "#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Orders", description = "Order placement and lifecycle"),
        (name = "PayPal", description = "PayPal checkout"),
        (name = "Intake", description = "Contact messages and sample requests"),
        (name = "Catalog", description = "Products and payment methods"),
        (name = "Health", description = "Liveness")
    ),
    paths(
        crate::handlers::orders::create_order,
        crate::handlers::orders::list_orders,
        crate::handlers::orders::get_order,
        crate::handlers::orders::update_order_status,
        crate::handlers::orders::confirm_order,
        crate::handlers::orders::cancel_order,
        crate::handlers::orders::refund_order,

        crate::handlers::paypal::create_paypal_order,
        crate::handlers::paypal::capture_paypal_order,

        crate::handlers::intake::submit_contact,
        crate::handlers::intake::submit_sample,
        crate::handlers::intake::list_contact_messages,
        crate::handlers::intake::get_contact_message,
        crate::handlers::intake::transition_contact_message,
        crate::handlers::intake::add_contact_note,
        crate::handlers::intake::assign_contact_message,
        crate::handlers::intake::respond_to_contact_message,
        crate::handlers::intake::list_sample_requests,
        crate::handlers::intake::get_sample_request,
        crate::handlers::intake::transition_sample_request,
        crate::handlers::intake::add_sample_note,
        crate::handlers::intake::assign_sample_request,
        crate::handlers::intake::respond_to_sample_request,

        crate::handlers::catalog::list_products,
        crate::handlers::catalog::get_product,
        crate::handlers::catalog::list_payment_methods,

        crate::handlers::health::health,
    ),
    components(
        schemas(
            crate::ResponseMeta,
            crate::errors::ErrorResponse,
            crate::errors::ErrorBody,
            crate::errors::FieldError,
            crate::errors::ProviderFailure,

            crate::entities::order::OrderStatus,
            crate::entities::order::PaymentStatus,
            crate::entities::payment_method::PaymentMethodKind,
            crate::entities::product::ProductCategory,
            crate::entities::contact_message::ContactStatus,
            crate::entities::sample_request::SampleStatus,
            crate::entities::submission_history::SubmissionAction,

            crate::services::orders::CreateOrderRequest,
            crate::services::orders::OrderItemInput,
            crate::services::orders::CustomerInfo,
            crate::services::orders::UpdateStatusRequest,
            crate::services::orders::TransitionRequest,
            crate::services::orders::OrderView,
            crate::services::orders::OrderSummary,

            crate::services::checkout::PayPalOrderRequest,
            crate::services::checkout::PayPalOrderCreated,
            crate::services::checkout::CaptureResult,

            crate::services::intake::ContactSubmission,
            crate::services::intake::SampleSubmission,
            crate::services::intake::SubmissionReceipt,
            crate::services::intake::ContactDetails,
            crate::services::intake::SampleDetails,

            crate::services::catalog::ProductView,
            crate::services::payment_methods::PaymentMethodView,
        )
    ),
    modifiers(&BearerAuth)
)]
pub struct ApiDocV1;

/// Registers the `Bearer` scheme referenced by the back-office paths.
struct BearerAuth;

impl Modify for BearerAuth {
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
    SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDocV1::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_storefront_and_admin_paths() {
        let json = serde_json::to_string(&ApiDocV1::openapi()).unwrap();
        assert!(json.contains("Parfum API"));
        assert!(json.contains("/api/v1/orders/{id}/refund"));
        assert!(json.contains("/api/v1/paypal/orders/{token}/capture"));
        assert!(json.contains("/api/v1/admin/sample-requests/{id}/notes"));
    }

    #[test]
    fn bearer_scheme_is_registered() {
        let doc = ApiDocV1::openapi();
        let components = doc.components.expect("components");
        assert!(components.security_schemes.contains_key("Bearer"));
    }
}
