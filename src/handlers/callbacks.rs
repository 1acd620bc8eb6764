use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::models::PaymentProvider;
use crate::services::reconciliation::CallbackDisposition;
use crate::ApiResponse;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use serde::Serialize;
use utoipa::ToSchema;

/// Body returned to the provider for every settled callback.
#[derive(Debug, Serialize, ToSchema)]
pub struct CallbackReceipt {
    pub disposition: CallbackDisposition,
}

/// Receive a payment provider callback
///
/// Signature verification is the gateway's job; a bad signature is the only
/// way to earn a non-2xx from a parseable delivery. Replays, unknown
/// transactions and conflicting events are all acknowledged so the provider
/// stops retrying.
#[utoipa::path(
    post,
    path = "/api/v1/payments/callbacks/:provider",
    params(
        ("provider" = String, Path, description = "Provider identifier, e.g. swiftpay")
    ),
    request_body = String,
    responses(
        (status = 200, description = "Callback settled", body = crate::ApiResponse<CallbackReceipt>),
        (status = 400, description = "Malformed payload", body = crate::errors::ErrorResponse),
        (status = 401, description = "Invalid signature", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown provider", body = crate::errors::ErrorResponse)
    ),
    tag = "Callbacks"
)]
pub async fn provider_callback(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ApiResponse<CallbackReceipt>>, ServiceError> {
    let provider: PaymentProvider = provider
        .parse()
        .map_err(|_| ServiceError::NotFound(format!("Unknown payment provider {}", provider)))?;

    let disposition = state
        .reconciliation
        .handle_callback(provider, &headers, &body)
        .await?;

    Ok(Json(ApiResponse::success(CallbackReceipt { disposition })))
}

/// Callback routes, merged into the v1 router unauthenticated; the HMAC
/// signature is the authentication.
pub fn callback_routes() -> Router<AppState> {
    Router::new().route("/payments/callbacks/:provider", post(provider_callback))
}
