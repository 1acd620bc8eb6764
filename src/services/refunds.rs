use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::entities::{payment, payment_transaction};
use crate::errors::ServiceError;
use crate::gateway::{GatewayRegistry, RefundRequest};
use crate::models::{PaymentEvent, TransactionType};
use crate::services::ledger::{ApplyOutcome, PaymentLedger};

/// Request payload for refunding part or all of a completed payment.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct RefundPaymentRequest {
    #[validate(custom = "validate_refund_amount")]
    #[schema(value_type = f64, example = 30.00)]
    pub amount: Decimal,
    #[validate(length(max = 256))]
    pub reason: Option<String>,
}

fn validate_refund_amount(amount: &Decimal) -> Result<(), ValidationError> {
    if *amount <= Decimal::ZERO {
        return Err(ValidationError::new("amount_not_positive"));
    }
    if amount.scale() > 4 {
        return Err(ValidationError::new("amount_scale_too_fine"));
    }
    Ok(())
}

/// Issues refunds: the provider (or internal bookkeeping) accepts the refund
/// first, then the ledger records it. A provider timeout therefore surfaces
/// to the caller with nothing written; reconciliation settles the truth.
#[derive(Clone)]
pub struct RefundProcessor {
    db: Arc<DatabaseConnection>,
    ledger: PaymentLedger,
    gateways: GatewayRegistry,
}

/// Attempts at re-sequencing an internal refund id when appliers race.
const MAX_SEQUENCE_ATTEMPTS: u32 = 3;

impl RefundProcessor {
    pub fn new(
        db: Arc<DatabaseConnection>,
        ledger: PaymentLedger,
        gateways: GatewayRegistry,
    ) -> Self {
        Self {
            db,
            ledger,
            gateways,
        }
    }

    /// Refunds `request.amount` against a completed payment.
    ///
    /// Partial refunds accumulate; the refund that consumes the remaining
    /// amount lands the payment on Refunded. The provider call happens
    /// before any ledger write, so declined and timed-out refunds leave the
    /// payment exactly as it was.
    #[instrument(skip(self, request), fields(amount = %request.amount))]
    pub async fn refund(
        &self,
        payment_id: Uuid,
        request: RefundPaymentRequest,
    ) -> Result<payment::Model, ServiceError> {
        request.validate()?;

        let payment = payment::Entity::find_by_id(payment_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Payment {} not found", payment_id)))?;

        // Cheap gate before touching the provider; the ledger re-validates
        // inside the write transaction.
        if !payment.status.is_refundable() {
            return Err(ServiceError::InvalidTransition {
                from: payment.status,
                event: "refund".to_string(),
            });
        }
        let available = payment.remaining_amount();
        if request.amount > available {
            return Err(ServiceError::RefundAmountExceedsAvailable {
                requested: request.amount,
                available,
            });
        }

        let provider_transaction_id = payment.provider_transaction_id.clone().ok_or_else(|| {
            ServiceError::InvalidOperation(format!(
                "payment {} has no provider transaction reference",
                payment_id
            ))
        })?;
        let gateway = self.gateways.for_payment(payment.provider)?;

        let mut sequence = self.refund_count(payment_id).await? + 1;
        for _ in 0..MAX_SEQUENCE_ATTEMPTS {
            let receipt = gateway
                .refund(RefundRequest {
                    payment_id,
                    provider_transaction_id: provider_transaction_id.clone(),
                    amount: request.amount,
                    currency: payment.currency.clone(),
                    sequence,
                    reason: request.reason.clone(),
                })
                .await?;

            let applied = self
                .ledger
                .apply(
                    payment_id,
                    PaymentEvent::Refund {
                        amount: request.amount,
                        provider_refund_id: Some(receipt.provider_refund_id.clone()),
                        reason: request.reason.clone(),
                    },
                )
                .await?;

            match applied.outcome {
                ApplyOutcome::Applied => {
                    info!(
                        %payment_id,
                        refund_id = %receipt.provider_refund_id,
                        status = %applied.payment.status,
                        "refund recorded"
                    );
                    return Ok(applied.payment);
                }
                // An internal refund id collided with one recorded by a
                // concurrent refund; re-derive the ordinal and try again.
                ApplyOutcome::Replayed if payment.provider.is_none() => {
                    warn!(%payment_id, sequence, "internal refund id already recorded, re-sequencing");
                    sequence += 1;
                }
                // The provider deduplicated: this refund id is already in
                // the ledger, so the money moved exactly once.
                ApplyOutcome::Replayed | ApplyOutcome::Noop => {
                    return Ok(applied.payment);
                }
            }
        }

        Err(ServiceError::Conflict(format!(
            "refund sequencing for payment {} raced; retry",
            payment_id
        )))
    }

    async fn refund_count(&self, payment_id: Uuid) -> Result<u32, ServiceError> {
        let count = payment_transaction::Entity::find()
            .filter(payment_transaction::Column::PaymentId.eq(payment_id))
            .filter(payment_transaction::Column::TransactionType.eq(TransactionType::Refund))
            .count(&*self.db)
            .await?;
        Ok(count as u32)
    }
}
