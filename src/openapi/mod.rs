use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "CarePay API",
        version = "0.4.2",
        description = r#"
# CarePay Payment Lifecycle API

Collects, tracks and reconciles payments for pharmacy orders, lab orders
and consultation bookings.

## Lifecycle

A payment moves through `Pending`, `Processing`, and into exactly one of
`Completed`, `Failed`, `Cancelled`, `Refunded` (with `PartiallyRefunded`
between partial refunds). Every transition appends an immutable entry to
the payment's transaction trail.

## Idempotency

Initiating a payment for an order that already has a live payment returns
the existing payment instead of opening a second one. Provider callbacks
are deduplicated by their transaction reference and can be redelivered
safely.

## Error Handling

Errors use a consistent envelope with appropriate HTTP status codes:

```json
{
  "error": "Conflict",
  "message": "Cannot refund a payment in status Pending",
  "request_id": "req-abc123xyz",
  "timestamp": "2026-08-01T00:00:00Z"
}
```
        "#,
        contact(
            name = "CarePay Engineering",
            email = "platform@carepay.health",
            url = "https://carepay.health"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Payments", description = "Payment lifecycle endpoints"),
        (name = "Callbacks", description = "Provider callback intake"),
        (name = "Health", description = "Health check endpoints")
    ),
    paths(
        // Payments
        crate::handlers::payments::initiate_payment,
        crate::handlers::payments::get_payment,
        crate::handlers::payments::list_payments,
        crate::handlers::payments::list_payment_transactions,
        crate::handlers::payments::get_order_payments,
        crate::handlers::payments::confirm_delivery,
        crate::handlers::payments::cancel_payment,
        crate::handlers::payments::refund_payment,
        crate::handlers::payments::reconcile_payment,

        // Callbacks
        crate::handlers::callbacks::provider_callback,
    ),
    components(
        schemas(
            // Common types
            crate::ApiResponse<serde_json::Value>,
            crate::PaginatedResponse<serde_json::Value>,

            // Payment types
            crate::services::payments::CreatePaymentRequest,
            crate::services::payments::CancelPaymentRequest,
            crate::services::payments::PaymentResponse,
            crate::services::payments::TransactionResponse,
            crate::services::refunds::RefundPaymentRequest,
            crate::handlers::callbacks::CallbackReceipt,
            crate::models::PaymentStatus,
            crate::models::PaymentMethod,
            crate::models::PaymentProvider,
            crate::models::PaymentKind,
            crate::models::OrderType,
            crate::models::TransactionType,
            crate::services::reconciliation::CallbackDisposition,

            // Error types
            crate::errors::ErrorResponse
        )
    )
)]
pub struct ApiDocV1;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}
