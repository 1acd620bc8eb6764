use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::models::{OrderType, PaymentMethod, PaymentStatus};
use crate::services::payments::{
    CancelPaymentRequest, CreatePaymentRequest, PaymentListFilter, PaymentResponse,
    TransactionResponse,
};
use crate::services::refunds::RefundPaymentRequest;
use crate::ApiResponse;
use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use utoipa::IntoParams;
use uuid::Uuid;

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListPaymentsQuery {
    /// Filter by lifecycle status
    pub status: Option<PaymentStatus>,
    /// Filter by collection method
    pub method: Option<PaymentMethod>,
    /// Filter by order family
    pub order_type: Option<OrderType>,
    /// Filter by payer
    pub payer_id: Option<Uuid>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

// Handler functions

/// Initiate a payment for an order
#[utoipa::path(
    post,
    path = "/api/v1/payments",
    request_body = CreatePaymentRequest,
    responses(
        (status = 201, description = "Payment initiated", body = crate::ApiResponse<PaymentResponse>),
        (status = 200, description = "Existing active payment returned", body = crate::ApiResponse<PaymentResponse>),
        (status = 400, description = "Bad request", body = crate::errors::ErrorResponse),
        (status = 402, description = "Provider rejected the payment", body = crate::errors::ErrorResponse),
        (status = 502, description = "Provider unavailable", body = crate::errors::ErrorResponse),
        (status = 504, description = "Provider timed out", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn initiate_payment(
    State(state): State<AppState>,
    Json(request): Json<CreatePaymentRequest>,
) -> Result<(StatusCode, Json<ApiResponse<PaymentResponse>>), ServiceError> {
    let initiated = state.payments.initiate(request).await?;

    let status = if initiated.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    let mut response = PaymentResponse::from(initiated.payment);
    response.redirect_url = initiated.redirect_url;

    Ok((status, Json(ApiResponse::success(response))))
}

/// Get payment by ID
#[utoipa::path(
    get,
    path = "/api/v1/payments/:payment_id",
    params(
        ("payment_id" = Uuid, Path, description = "Payment ID")
    ),
    responses(
        (status = 200, description = "Payment details", body = crate::ApiResponse<PaymentResponse>),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn get_payment(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
) -> Result<Json<ApiResponse<PaymentResponse>>, ServiceError> {
    let payment = state.payments.get_payment(payment_id).await?;
    Ok(Json(ApiResponse::success(PaymentResponse::from(payment))))
}

/// Get the audit trail for a payment
#[utoipa::path(
    get,
    path = "/api/v1/payments/:payment_id/transactions",
    params(
        ("payment_id" = Uuid, Path, description = "Payment ID")
    ),
    responses(
        (status = 200, description = "Transaction entries, oldest first", body = crate::ApiResponse<Vec<TransactionResponse>>),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn list_payment_transactions(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<TransactionResponse>>>, ServiceError> {
    let entries = state.payments.list_transactions(payment_id).await?;
    let entries = entries
        .into_iter()
        .map(TransactionResponse::from)
        .collect();
    Ok(Json(ApiResponse::success(entries)))
}

/// List payments with pagination and filtering
#[utoipa::path(
    get,
    path = "/api/v1/payments",
    params(ListPaymentsQuery),
    responses(
        (status = 200, description = "List payments", body = crate::ApiResponse<crate::PaginatedResponse<PaymentResponse>>),
        (status = 400, description = "Bad request", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn list_payments(
    State(state): State<AppState>,
    Query(query): Query<ListPaymentsQuery>,
) -> Result<Json<ApiResponse<crate::PaginatedResponse<PaymentResponse>>>, ServiceError> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query
        .per_page
        .unwrap_or(state.config.api_default_page_size)
        .clamp(1, state.config.api_max_page_size);

    let filter = PaymentListFilter {
        status: query.status,
        method: query.method,
        order_type: query.order_type,
        payer_id: query.payer_id,
        page: Some(page),
        per_page: Some(limit),
    };

    let (payments, total) = state.payments.list_payments(filter).await?;

    let response = crate::PaginatedResponse {
        items: payments.into_iter().map(PaymentResponse::from).collect(),
        total,
        page,
        limit,
        total_pages: total.div_ceil(limit),
    };

    Ok(Json(ApiResponse::success(response)))
}

/// Get all payment attempts for an order
#[utoipa::path(
    get,
    path = "/api/v1/payments/order/:order_type/:order_id",
    params(
        ("order_type" = OrderType, Path, description = "Order family"),
        ("order_id" = Uuid, Path, description = "Order ID")
    ),
    responses(
        (status = 200, description = "Payments for the order, newest first", body = crate::ApiResponse<Vec<PaymentResponse>>)
    ),
    tag = "Payments"
)]
pub async fn get_order_payments(
    State(state): State<AppState>,
    Path((order_type, order_id)): Path<(OrderType, Uuid)>,
) -> Result<Json<ApiResponse<Vec<PaymentResponse>>>, ServiceError> {
    let payments = state.payments.find_by_order(order_type, order_id).await?;
    let payments = payments.into_iter().map(PaymentResponse::from).collect();
    Ok(Json(ApiResponse::success(payments)))
}

/// Confirm delivery of a cash-on-delivery payment
#[utoipa::path(
    post,
    path = "/api/v1/payments/:payment_id/confirm-delivery",
    params(
        ("payment_id" = Uuid, Path, description = "Payment ID")
    ),
    responses(
        (status = 200, description = "Payment completed", body = crate::ApiResponse<PaymentResponse>),
        (status = 400, description = "Not a cash-on-delivery payment", body = crate::errors::ErrorResponse),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Payment is terminal", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn confirm_delivery(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
) -> Result<Json<ApiResponse<PaymentResponse>>, ServiceError> {
    let payment = state.payments.confirm_cash_on_delivery(payment_id).await?;
    Ok(Json(ApiResponse::success(PaymentResponse::from(payment))))
}

/// Cancel a payment that has not completed
#[utoipa::path(
    post,
    path = "/api/v1/payments/:payment_id/cancel",
    params(
        ("payment_id" = Uuid, Path, description = "Payment ID")
    ),
    request_body = CancelPaymentRequest,
    responses(
        (status = 200, description = "Payment cancelled", body = crate::ApiResponse<PaymentResponse>),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Payment is terminal", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn cancel_payment(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
    Json(request): Json<CancelPaymentRequest>,
) -> Result<Json<ApiResponse<PaymentResponse>>, ServiceError> {
    let payment = state.payments.cancel(payment_id, request).await?;
    Ok(Json(ApiResponse::success(PaymentResponse::from(payment))))
}

/// Refund part or all of a completed payment
#[utoipa::path(
    post,
    path = "/api/v1/payments/:payment_id/refund",
    params(
        ("payment_id" = Uuid, Path, description = "Payment ID")
    ),
    request_body = RefundPaymentRequest,
    responses(
        (status = 201, description = "Refund recorded", body = crate::ApiResponse<PaymentResponse>),
        (status = 402, description = "Provider declined the refund", body = crate::errors::ErrorResponse),
        (status = 409, description = "Payment is not refundable", body = crate::errors::ErrorResponse),
        (status = 422, description = "Amount exceeds the refundable remainder", body = crate::errors::ErrorResponse),
        (status = 504, description = "Provider timed out", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn refund_payment(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
    Json(request): Json<RefundPaymentRequest>,
) -> Result<(StatusCode, Json<ApiResponse<PaymentResponse>>), ServiceError> {
    let payment = state.refunds.refund(payment_id, request).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(PaymentResponse::from(payment))),
    ))
}

/// Reconcile a payment against the provider's records
#[utoipa::path(
    post,
    path = "/api/v1/payments/:payment_id/reconcile",
    params(
        ("payment_id" = Uuid, Path, description = "Payment ID")
    ),
    responses(
        (status = 200, description = "Payment reconciled", body = crate::ApiResponse<PaymentResponse>),
        (status = 400, description = "No remote ledger for this payment", body = crate::errors::ErrorResponse),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse),
        (status = 502, description = "Provider unavailable", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn reconcile_payment(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
) -> Result<Json<ApiResponse<PaymentResponse>>, ServiceError> {
    let payment = state.reconciliation.reconcile(payment_id).await?;
    Ok(Json(ApiResponse::success(PaymentResponse::from(payment))))
}

/// Payment routes
pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(initiate_payment).get(list_payments))
        .route("/:payment_id", get(get_payment))
        .route("/:payment_id/transactions", get(list_payment_transactions))
        .route("/:payment_id/confirm-delivery", post(confirm_delivery))
        .route("/:payment_id/cancel", post(cancel_payment))
        .route("/:payment_id/refund", post(refund_payment))
        .route("/:payment_id/reconcile", post(reconcile_payment))
        .route("/order/:order_type/:order_id", get(get_order_payments))
}
