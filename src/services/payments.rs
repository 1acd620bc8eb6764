use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::config::AppConfig;
use crate::entities::{payment, payment_transaction};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::gateway::{GatewayError, GatewayRegistry, InitiateRequest};
use crate::models::{
    OrderRef, OrderType, PaymentEvent, PaymentKind, PaymentMethod, PaymentProvider, PaymentStatus,
    TransactionType,
};
use crate::services::ledger::{NewPayment, PaymentLedger};

/// Request payload for initiating a payment against an order.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreatePaymentRequest {
    pub payer_id: Uuid,
    pub order_type: OrderType,
    pub order_id: Uuid,
    #[validate(custom = "validate_amount")]
    #[schema(value_type = f64, example = 120.50)]
    pub amount: Decimal,
    /// ISO 4217 code; the configured default applies when omitted.
    #[validate(custom = "validate_currency_code")]
    pub currency: Option<String>,
    pub method: PaymentMethod,
    /// Checkout flavor for online payments; ignored for cash on delivery.
    pub kind: Option<PaymentKind>,
}

/// Request payload for cancelling a payment before completion.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CancelPaymentRequest {
    #[validate(length(max = 256))]
    pub reason: Option<String>,
}

fn validate_amount(amount: &Decimal) -> Result<(), ValidationError> {
    if *amount <= Decimal::ZERO {
        return Err(ValidationError::new("amount_not_positive"));
    }
    if amount.scale() > 4 {
        return Err(ValidationError::new("amount_scale_too_fine"));
    }
    Ok(())
}

fn validate_currency_code(code: &str) -> Result<(), ValidationError> {
    if code.len() != 3 || !code.chars().all(|c| c.is_ascii_uppercase()) {
        return Err(ValidationError::new("invalid_currency_code"));
    }
    Ok(())
}

/// API projection of a payment row.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaymentResponse {
    pub id: Uuid,
    pub payer_id: Uuid,
    pub order_type: OrderType,
    pub order_id: Uuid,
    #[schema(value_type = f64)]
    pub amount: Decimal,
    #[schema(value_type = f64)]
    pub refunded_amount: Decimal,
    /// Amount still refundable.
    #[schema(value_type = f64)]
    pub remaining_amount: Decimal,
    pub currency: String,
    pub method: PaymentMethod,
    pub provider: Option<PaymentProvider>,
    pub status: PaymentStatus,
    pub provider_transaction_id: Option<String>,
    pub failure_reason: Option<String>,
    pub refund_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
    /// Checkout page to send the payer to; present on online initiation only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
}

impl From<payment::Model> for PaymentResponse {
    fn from(model: payment::Model) -> Self {
        let remaining_amount = model.remaining_amount();
        Self {
            id: model.id,
            payer_id: model.payer_id,
            order_type: model.order_type,
            order_id: model.order_id,
            amount: model.amount,
            refunded_amount: model.refunded_amount,
            remaining_amount,
            currency: model.currency,
            method: model.method,
            provider: model.provider,
            status: model.status,
            provider_transaction_id: model.provider_transaction_id,
            failure_reason: model.failure_reason,
            refund_reason: model.refund_reason,
            created_at: model.created_at,
            updated_at: model.updated_at,
            completed_at: model.completed_at,
            failed_at: model.failed_at,
            refunded_at: model.refunded_at,
            redirect_url: None,
        }
    }
}

/// API projection of one audit-trail entry.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TransactionResponse {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub transaction_type: TransactionType,
    #[schema(value_type = f64)]
    pub amount: Decimal,
    /// Payment status this entry carried the payment into.
    pub status: PaymentStatus,
    pub provider_transaction_id: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl From<payment_transaction::Model> for TransactionResponse {
    fn from(model: payment_transaction::Model) -> Self {
        Self {
            id: model.id,
            payment_id: model.payment_id,
            transaction_type: model.transaction_type,
            amount: model.amount,
            status: model.status,
            provider_transaction_id: model.provider_transaction_id,
            error_code: model.error_code,
            error_message: model.error_message,
            created_at: model.created_at,
            processed_at: model.processed_at,
        }
    }
}

/// Result of an initiation call. `created` is false when an already-active
/// payment for the order was returned instead of opening a second one.
#[derive(Debug, Clone)]
pub struct InitiatedPayment {
    pub payment: payment::Model,
    pub redirect_url: Option<String>,
    pub created: bool,
}

/// Filters and paging for the payment listing.
#[derive(Debug, Clone, Default)]
pub struct PaymentListFilter {
    pub status: Option<PaymentStatus>,
    pub method: Option<PaymentMethod>,
    pub order_type: Option<OrderType>,
    pub payer_id: Option<Uuid>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

/// Orchestrates payment creation and user-facing lifecycle operations.
/// All state changes flow through the ledger.
#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DatabaseConnection>,
    ledger: PaymentLedger,
    gateways: GatewayRegistry,
    event_sender: Arc<EventSender>,
    config: Arc<AppConfig>,
}

impl PaymentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        ledger: PaymentLedger,
        gateways: GatewayRegistry,
        event_sender: Arc<EventSender>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db,
            ledger,
            gateways,
            event_sender,
            config,
        }
    }

    /// Initiates payment collection for an order.
    ///
    /// Online payments open a provider intent first and persist only once
    /// the provider answered (or timed out; the sweep settles those).
    /// Cash-on-delivery rows start in Processing with no provider call.
    /// A second initiation for an order with a live payment returns that
    /// payment instead of charging twice.
    #[instrument(skip(self, request), fields(order_id = %request.order_id, method = ?request.method))]
    pub async fn initiate(
        &self,
        request: CreatePaymentRequest,
    ) -> Result<InitiatedPayment, ServiceError> {
        request.validate()?;

        let order = OrderRef::new(request.order_type, request.order_id);
        if let Some(existing) = self.find_active_by_order(&order).await? {
            info!(payment_id = %existing.id, "returning existing active payment for order");
            return Ok(InitiatedPayment {
                payment: existing,
                redirect_url: None,
                created: false,
            });
        }

        let currency = request
            .currency
            .clone()
            .unwrap_or_else(|| self.config.default_currency.clone());
        let payment_id = Uuid::new_v4();

        match request.method {
            PaymentMethod::CashOnDelivery => {
                let new = NewPayment {
                    id: payment_id,
                    payer_id: request.payer_id,
                    order,
                    amount: request.amount,
                    currency,
                    method: PaymentMethod::CashOnDelivery,
                    provider: None,
                    status: PaymentStatus::Processing,
                    provider_transaction_id: None,
                };
                self.create_or_adopt(new, &order, None).await
            }
            PaymentMethod::Online => {
                let provider = self.config.online_provider;
                let gateway = self.gateways.get(provider)?;
                let kind = request.kind.unwrap_or(PaymentKind::Card);

                let receipt = gateway
                    .initiate(InitiateRequest {
                        payment_id,
                        order,
                        amount: request.amount,
                        currency: currency.clone(),
                        kind,
                        return_url: self.config.payment_return_url.clone(),
                    })
                    .await;

                let (provider_transaction_id, redirect_url) = match receipt {
                    Ok(receipt) => (
                        Some(receipt.provider_transaction_id),
                        receipt.redirect_url,
                    ),
                    // Ambiguous outcome: the intent may exist remotely, so a
                    // pending row is persisted for the sweep to settle.
                    Err(GatewayError::Timeout(msg)) => {
                        warn!(%payment_id, error = %msg, "provider timed out during initiation, persisting unresolved payment");
                        (None, None)
                    }
                    // Definite failures persist nothing.
                    Err(err) => return Err(err.into()),
                };

                let new = NewPayment {
                    id: payment_id,
                    payer_id: request.payer_id,
                    order,
                    amount: request.amount,
                    currency,
                    method: PaymentMethod::Online,
                    provider: Some(provider),
                    status: PaymentStatus::Pending,
                    provider_transaction_id,
                };
                self.create_or_adopt(new, &order, redirect_url).await
            }
        }
    }

    /// Persists the new payment, or adopts the winner when a concurrent
    /// initiation for the same order got there first.
    async fn create_or_adopt(
        &self,
        new: NewPayment,
        order: &OrderRef,
        redirect_url: Option<String>,
    ) -> Result<InitiatedPayment, ServiceError> {
        match self.ledger.create(new).await {
            Ok(created) => {
                let event = Event::PaymentInitiated {
                    payment_id: created.id,
                    order_type: created.order_type,
                    order_id: created.order_id,
                    method: created.method,
                    amount: created.amount,
                };
                if let Err(e) = self.event_sender.send(event).await {
                    warn!(payment_id = %created.id, error = %e, "failed to send payment initiated event");
                }
                Ok(InitiatedPayment {
                    payment: created,
                    redirect_url,
                    created: true,
                })
            }
            Err(err) if err.is_unique_violation() => {
                warn!(order = %order, "concurrent initiation raced, adopting the existing payment");
                let existing = self.find_active_by_order(order).await?.ok_or_else(|| {
                    ServiceError::Conflict(format!(
                        "payment creation for order {} raced; retry",
                        order
                    ))
                })?;
                Ok(InitiatedPayment {
                    payment: existing,
                    redirect_url: None,
                    created: false,
                })
            }
            Err(err) => Err(err),
        }
    }

    /// Marks a cash-on-delivery payment as collected by the courier.
    ///
    /// Repeats settle against the synthesized confirmation reference, so the
    /// endpoint is idempotent.
    #[instrument(skip(self))]
    pub async fn confirm_cash_on_delivery(
        &self,
        payment_id: Uuid,
    ) -> Result<payment::Model, ServiceError> {
        let payment = self.get_payment(payment_id).await?;
        if payment.method != PaymentMethod::CashOnDelivery {
            return Err(ServiceError::InvalidOperation(
                "delivery confirmation applies to cash-on-delivery payments only".to_string(),
            ));
        }

        let applied = self
            .ledger
            .apply(
                payment_id,
                PaymentEvent::Confirm {
                    provider_transaction_id: Some(format!("cod-{}", payment_id)),
                    amount: None,
                },
            )
            .await?;
        Ok(applied.payment)
    }

    /// Cancels a payment that has not completed.
    #[instrument(skip(self, request))]
    pub async fn cancel(
        &self,
        payment_id: Uuid,
        request: CancelPaymentRequest,
    ) -> Result<payment::Model, ServiceError> {
        request.validate()?;
        let reason = request
            .reason
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| "cancelled by user".to_string());

        let applied = self
            .ledger
            .apply(payment_id, PaymentEvent::Cancel { reason })
            .await?;
        Ok(applied.payment)
    }

    pub async fn get_payment(&self, payment_id: Uuid) -> Result<payment::Model, ServiceError> {
        payment::Entity::find_by_id(payment_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Payment {} not found", payment_id)))
    }

    /// Lists payments, newest first, with total count for paging.
    #[instrument(skip(self, filter))]
    pub async fn list_payments(
        &self,
        filter: PaymentListFilter,
    ) -> Result<(Vec<payment::Model>, u64), ServiceError> {
        let page = filter.page.unwrap_or(1).max(1);
        let per_page = filter
            .per_page
            .unwrap_or(self.config.api_default_page_size)
            .clamp(1, self.config.api_max_page_size);

        let mut query = payment::Entity::find();
        if let Some(status) = filter.status {
            query = query.filter(payment::Column::Status.eq(status));
        }
        if let Some(method) = filter.method {
            query = query.filter(payment::Column::Method.eq(method));
        }
        if let Some(order_type) = filter.order_type {
            query = query.filter(payment::Column::OrderType.eq(order_type));
        }
        if let Some(payer_id) = filter.payer_id {
            query = query.filter(payment::Column::PayerId.eq(payer_id));
        }

        let paginator = query
            .order_by_desc(payment::Column::CreatedAt)
            .paginate(&*self.db, per_page);
        let total = paginator.num_items().await?;
        let payments = paginator.fetch_page(page - 1).await?;

        Ok((payments, total))
    }

    /// All payment attempts for one order, newest first.
    pub async fn find_by_order(
        &self,
        order_type: OrderType,
        order_id: Uuid,
    ) -> Result<Vec<payment::Model>, ServiceError> {
        let payments = payment::Entity::find()
            .filter(payment::Column::OrderType.eq(order_type))
            .filter(payment::Column::OrderId.eq(order_id))
            .order_by_desc(payment::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        Ok(payments)
    }

    /// The audit trail for one payment, oldest entry first.
    pub async fn list_transactions(
        &self,
        payment_id: Uuid,
    ) -> Result<Vec<payment_transaction::Model>, ServiceError> {
        // 404 for unknown payments rather than an empty list.
        self.get_payment(payment_id).await?;

        let entries = payment_transaction::Entity::find()
            .filter(payment_transaction::Column::PaymentId.eq(payment_id))
            .order_by_asc(payment_transaction::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        Ok(entries)
    }

    async fn find_active_by_order(
        &self,
        order: &OrderRef,
    ) -> Result<Option<payment::Model>, ServiceError> {
        let existing = payment::Entity::find()
            .filter(payment::Column::ActiveOrderKey.eq(order.active_key()))
            .one(&*self.db)
            .await?;
        Ok(existing)
    }
}
