/*!
 * # Payment Ledger
 *
 * Single write path for payment state. Every transition is evaluated
 * against the legal-transition table, applied under an optimistic
 * version gate, and recorded as one append-only transaction entry in
 * the same database transaction.
 */

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    SqlErr, TransactionTrait,
};
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::entities::{payment, payment_transaction};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::metrics;
use crate::models::{
    OrderRef, PaymentEvent, PaymentMethod, PaymentProvider, PaymentStatus, Transition,
};

/// Retries for losers of the version race. Each retry re-reads the row and
/// re-runs the idempotency check, so a repeat of an absorbed event settles
/// as a no-op instead of an error.
const MAX_APPLY_ATTEMPTS: u32 = 3;

/// Error code recorded when a payment is cancelled rather than failed by
/// the provider.
pub const CANCELLED_ERROR_CODE: &str = "cancelled";

/// How an apply settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Transition applied and a ledger entry recorded.
    Applied,
    /// The event's transaction tuple was already durable; nothing changed.
    Replayed,
    /// Legal repeat with no state change (e.g. a second acknowledgment).
    Noop,
}

/// Result of applying one event: the settled outcome and the payment row
/// as of that apply.
#[derive(Debug, Clone)]
pub struct AppliedEvent {
    pub outcome: ApplyOutcome,
    pub payment: payment::Model,
}

/// Everything needed to open a payment row. The caller owns id generation
/// because online initiation hands the id to the provider first.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub id: Uuid,
    pub payer_id: Uuid,
    pub order: OrderRef,
    pub amount: Decimal,
    pub currency: String,
    pub method: PaymentMethod,
    pub provider: Option<PaymentProvider>,
    pub status: PaymentStatus,
    pub provider_transaction_id: Option<String>,
}

#[derive(Clone)]
pub struct PaymentLedger {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl PaymentLedger {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Opens a payment row together with its initiation entry, atomically.
    ///
    /// The unique index on `active_order_key` rejects a second live payment
    /// for the same order; callers detect that through
    /// [`ServiceError::is_unique_violation`] and re-read the winner.
    #[instrument(skip(self, new), fields(payment_id = %new.id, order = %new.order))]
    pub async fn create(&self, new: NewPayment) -> Result<payment::Model, ServiceError> {
        if !new.status.is_active() {
            return Err(ServiceError::ValidationError(format!(
                "payments cannot be created in status {}",
                new.status
            )));
        }

        let now = Utc::now();
        let txn = self.db.begin().await?;

        let row = payment::ActiveModel {
            id: Set(new.id),
            payer_id: Set(new.payer_id),
            order_type: Set(new.order.order_type),
            order_id: Set(new.order.order_id),
            amount: Set(new.amount),
            currency: Set(new.currency),
            method: Set(new.method),
            provider: Set(new.provider),
            status: Set(new.status),
            provider_transaction_id: Set(new.provider_transaction_id.clone()),
            refunded_amount: Set(Decimal::ZERO),
            refunded_at: Set(None),
            refund_reason: Set(None),
            active_order_key: Set(Some(new.order.active_key())),
            failure_reason: Set(None),
            created_at: Set(now),
            updated_at: Set(None),
            completed_at: Set(None),
            failed_at: Set(None),
            version: Set(0),
        };
        let created = row.insert(&txn).await?;

        let entry = payment_transaction::ActiveModel {
            id: Set(Uuid::new_v4()),
            payment_id: Set(created.id),
            transaction_type: Set(crate::models::TransactionType::Initiation),
            amount: Set(created.amount),
            status: Set(created.status),
            provider_transaction_id: Set(new.provider_transaction_id),
            error_code: Set(None),
            error_message: Set(None),
            created_at: Set(now),
            processed_at: Set(Some(now)),
        };
        entry.insert(&txn).await?;

        txn.commit().await?;

        debug!(status = %created.status, "payment row opened");
        Ok(created)
    }

    /// Applies one lifecycle event to a payment.
    ///
    /// Losers of the version race retry with a fresh read; an event whose
    /// transaction tuple is already durable settles as [`ApplyOutcome::Replayed`].
    #[instrument(skip(self, event), fields(event = event.name()))]
    pub async fn apply(
        &self,
        payment_id: Uuid,
        event: PaymentEvent,
    ) -> Result<AppliedEvent, ServiceError> {
        let mut attempt = 0;
        let applied = loop {
            match self.try_apply(payment_id, &event).await {
                Ok(applied) => break applied,
                Err(ServiceError::ConcurrentModification(_)) if attempt + 1 < MAX_APPLY_ATTEMPTS => {
                    attempt += 1;
                    metrics::VERSION_CONFLICTS.inc();
                    debug!(%payment_id, attempt, "version conflict, retrying apply");
                }
                Err(err) => return Err(err),
            }
        };

        if applied.outcome == ApplyOutcome::Applied {
            if let Some(domain_event) = lifecycle_event(&applied.payment, &event) {
                if let Err(e) = self.event_sender.send(domain_event).await {
                    warn!(%payment_id, error = %e, "failed to send payment lifecycle event");
                }
            }
        }

        Ok(applied)
    }

    /// One attempt: read, check the replay barrier, evaluate the transition
    /// table, then write the guarded update plus the ledger entry.
    async fn try_apply(
        &self,
        payment_id: Uuid,
        event: &PaymentEvent,
    ) -> Result<AppliedEvent, ServiceError> {
        let txn = self.db.begin().await?;

        let payment = payment::Entity::find_by_id(payment_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Payment {} not found", payment_id)))?;

        // Replay barrier: an entry with the same provider reference and kind
        // means this notification was already absorbed.
        if let Some(reference) = event.provider_reference() {
            let existing = payment_transaction::Entity::find()
                .filter(payment_transaction::Column::PaymentId.eq(payment_id))
                .filter(payment_transaction::Column::ProviderTransactionId.eq(reference))
                .filter(payment_transaction::Column::TransactionType.eq(event.transaction_type()))
                .one(&txn)
                .await?;
            if existing.is_some() {
                txn.commit().await?;
                debug!(%payment_id, reference, "event already absorbed, treating as replay");
                return Ok(AppliedEvent {
                    outcome: ApplyOutcome::Replayed,
                    payment,
                });
            }
        }

        let refund_exhausts = match event {
            PaymentEvent::Refund { amount, .. } => {
                if *amount <= Decimal::ZERO {
                    return Err(ServiceError::ValidationError(
                        "refund amount must be positive".to_string(),
                    ));
                }
                let available = payment.remaining_amount();
                if *amount > available {
                    return Err(ServiceError::RefundAmountExceedsAvailable {
                        requested: *amount,
                        available,
                    });
                }
                *amount == available
            }
            _ => false,
        };

        let next = match payment.status.on_event(event, refund_exhausts) {
            Transition::To(next) => next,
            Transition::Noop => {
                txn.commit().await?;
                return Ok(AppliedEvent {
                    outcome: ApplyOutcome::Noop,
                    payment,
                });
            }
            Transition::Illegal => {
                return Err(ServiceError::invalid_transition(payment.status, event));
            }
        };

        let now = Utc::now();

        // The remote id binds late when initiation timed out before it was
        // known. Refund references are refund ids and never bind here.
        let bound_reference = match event {
            PaymentEvent::Acknowledge {
                provider_transaction_id,
            }
            | PaymentEvent::Confirm {
                provider_transaction_id,
                ..
            }
            | PaymentEvent::Fail {
                provider_transaction_id,
                ..
            } if payment.provider_transaction_id.is_none() => provider_transaction_id.clone(),
            _ => None,
        };

        if let PaymentEvent::Confirm {
            amount: Some(confirmed),
            ..
        } = event
        {
            if *confirmed != payment.amount {
                warn!(
                    %payment_id,
                    expected = %payment.amount,
                    confirmed = %confirmed,
                    "provider-confirmed amount differs from requested amount"
                );
            }
        }

        let mut update = payment::Entity::update_many()
            .filter(payment::Column::Id.eq(payment.id))
            .filter(payment::Column::Version.eq(payment.version))
            .col_expr(payment::Column::Status, Expr::value(next))
            .col_expr(payment::Column::Version, Expr::value(payment.version + 1))
            .col_expr(payment::Column::UpdatedAt, Expr::value(Some(now)));

        let mut updated = payment.clone();
        updated.status = next;
        updated.version = payment.version + 1;
        updated.updated_at = Some(now);

        if let Some(reference) = &bound_reference {
            update = update.col_expr(
                payment::Column::ProviderTransactionId,
                Expr::value(Some(reference.clone())),
            );
            updated.provider_transaction_id = Some(reference.clone());
        }

        match event {
            PaymentEvent::Confirm { .. } => {
                update = update.col_expr(payment::Column::CompletedAt, Expr::value(Some(now)));
                updated.completed_at = Some(now);
            }
            PaymentEvent::Fail {
                error_code,
                error_message,
                ..
            } => {
                let reason = error_message.clone().unwrap_or_else(|| error_code.clone());
                update = update
                    .col_expr(payment::Column::FailedAt, Expr::value(Some(now)))
                    .col_expr(
                        payment::Column::FailureReason,
                        Expr::value(Some(reason.clone())),
                    );
                updated.failed_at = Some(now);
                updated.failure_reason = Some(reason);
            }
            PaymentEvent::Cancel { reason } => {
                update = update
                    .col_expr(payment::Column::FailedAt, Expr::value(Some(now)))
                    .col_expr(
                        payment::Column::FailureReason,
                        Expr::value(Some(reason.clone())),
                    );
                updated.failed_at = Some(now);
                updated.failure_reason = Some(reason.clone());
            }
            PaymentEvent::Refund { amount, reason, .. } => {
                let refunded = payment.refunded_amount + *amount;
                update = update
                    .col_expr(payment::Column::RefundedAmount, Expr::value(refunded))
                    .col_expr(payment::Column::RefundedAt, Expr::value(Some(now)));
                updated.refunded_amount = refunded;
                updated.refunded_at = Some(now);
                if reason.is_some() {
                    update = update.col_expr(
                        payment::Column::RefundReason,
                        Expr::value(reason.clone()),
                    );
                    updated.refund_reason = reason.clone();
                }
            }
            PaymentEvent::Acknowledge { .. } => {}
        }

        // Leaving the active states frees the order for a fresh attempt.
        if !next.is_active() {
            update = update.col_expr(
                payment::Column::ActiveOrderKey,
                Expr::value(Option::<String>::None),
            );
            updated.active_order_key = None;
        }

        let result = update.exec(&txn).await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::ConcurrentModification(payment_id));
        }

        let entry_amount = match event {
            PaymentEvent::Refund { amount, .. } => *amount,
            _ => payment.amount,
        };
        let (entry_error_code, entry_error_message) = match event {
            PaymentEvent::Fail {
                error_code,
                error_message,
                ..
            } => (Some(error_code.clone()), error_message.clone()),
            PaymentEvent::Cancel { reason } => {
                (Some(CANCELLED_ERROR_CODE.to_string()), Some(reason.clone()))
            }
            _ => (None, None),
        };

        let entry = payment_transaction::ActiveModel {
            id: Set(Uuid::new_v4()),
            payment_id: Set(payment.id),
            transaction_type: Set(event.transaction_type()),
            amount: Set(entry_amount),
            status: Set(next),
            provider_transaction_id: Set(event.provider_reference().map(str::to_string)),
            error_code: Set(entry_error_code),
            error_message: Set(entry_error_message),
            created_at: Set(now),
            processed_at: Set(Some(now)),
        };
        entry.insert(&txn).await.map_err(|err| match err.sql_err() {
            // Two carriers of the same tuple raced past the barrier; the
            // retry will settle the loser as a replay.
            Some(SqlErr::UniqueConstraintViolation(_)) => {
                ServiceError::ConcurrentModification(payment_id)
            }
            _ => ServiceError::DatabaseError(err),
        })?;

        txn.commit().await?;

        debug!(%payment_id, from = %payment.status, to = %next, "payment transition applied");
        Ok(AppliedEvent {
            outcome: ApplyOutcome::Applied,
            payment: updated,
        })
    }
}

/// Domain event for a durable transition, when the transition warrants one.
fn lifecycle_event(payment: &payment::Model, event: &PaymentEvent) -> Option<Event> {
    match (payment.status, event) {
        (PaymentStatus::Completed, PaymentEvent::Confirm { .. }) => Some(Event::PaymentCompleted {
            payment_id: payment.id,
            order_type: payment.order_type,
            order_id: payment.order_id,
            amount: payment.amount,
            completed_at: payment.completed_at.unwrap_or_else(Utc::now),
        }),
        (PaymentStatus::Failed, PaymentEvent::Fail { error_code, .. }) => {
            Some(Event::PaymentFailed {
                payment_id: payment.id,
                order_type: payment.order_type,
                order_id: payment.order_id,
                error_code: error_code.clone(),
            })
        }
        (PaymentStatus::Cancelled, PaymentEvent::Cancel { reason }) => {
            Some(Event::PaymentCancelled {
                payment_id: payment.id,
                order_type: payment.order_type,
                order_id: payment.order_id,
                reason: reason.clone(),
            })
        }
        (
            PaymentStatus::Refunded | PaymentStatus::PartiallyRefunded,
            PaymentEvent::Refund { amount, .. },
        ) => Some(Event::PaymentRefunded {
            payment_id: payment.id,
            order_type: payment.order_type,
            order_id: payment.order_id,
            amount: *amount,
            fully_refunded: payment.status == PaymentStatus::Refunded,
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderType;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;
    use tokio::sync::mpsc;

    async fn setup() -> (PaymentLedger, Arc<DatabaseConnection>, mpsc::Receiver<Event>) {
        let db = Arc::new(
            sea_orm::Database::connect("sqlite::memory:")
                .await
                .unwrap(),
        );
        crate::db::run_migrations(&db).await.unwrap();

        let (tx, rx) = mpsc::channel(16);
        let ledger = PaymentLedger::new(db.clone(), Arc::new(EventSender::new(tx)));
        (ledger, db, rx)
    }

    async fn seed_payment(
        db: &DatabaseConnection,
        status: PaymentStatus,
        provider_transaction_id: Option<&str>,
    ) -> payment::Model {
        let order_id = Uuid::new_v4();
        let row = payment::ActiveModel {
            id: Set(Uuid::new_v4()),
            payer_id: Set(Uuid::new_v4()),
            order_type: Set(OrderType::PharmacyOrder),
            order_id: Set(order_id),
            amount: Set(dec!(100)),
            currency: Set("SAR".to_string()),
            method: Set(PaymentMethod::Online),
            provider: Set(Some(PaymentProvider::SwiftPay)),
            status: Set(status),
            provider_transaction_id: Set(provider_transaction_id.map(str::to_string)),
            refunded_amount: Set(Decimal::ZERO),
            refunded_at: Set(None),
            refund_reason: Set(None),
            active_order_key: Set(status
                .is_active()
                .then(|| format!("PharmacyOrder:{}", order_id))),
            failure_reason: Set(None),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
            completed_at: Set((!status.is_active()
                && status != PaymentStatus::Failed
                && status != PaymentStatus::Cancelled)
                .then(Utc::now)),
            failed_at: Set(matches!(
                status,
                PaymentStatus::Failed | PaymentStatus::Cancelled
            )
            .then(Utc::now)),
            version: Set(0),
        };
        row.insert(db).await.unwrap()
    }

    async fn transaction_entries(
        db: &DatabaseConnection,
        payment_id: Uuid,
    ) -> Vec<payment_transaction::Model> {
        payment_transaction::Entity::find()
            .filter(payment_transaction::Column::PaymentId.eq(payment_id))
            .all(db)
            .await
            .unwrap()
    }

    fn confirm(reference: &str) -> PaymentEvent {
        PaymentEvent::Confirm {
            provider_transaction_id: Some(reference.to_string()),
            amount: Some(dec!(100)),
        }
    }

    #[tokio::test]
    async fn confirm_completes_and_appends_confirmation_entry() {
        let (ledger, db, mut rx) = setup().await;
        let payment = seed_payment(&db, PaymentStatus::Processing, Some("sp_1")).await;

        let applied = ledger.apply(payment.id, confirm("sp_1")).await.unwrap();

        assert_eq!(applied.outcome, ApplyOutcome::Applied);
        assert_eq!(applied.payment.status, PaymentStatus::Completed);
        assert!(applied.payment.completed_at.is_some());
        assert!(applied.payment.active_order_key.is_none());
        assert_eq!(applied.payment.version, 1);

        let entries = transaction_entries(&db, payment.id).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(
            entries[0].transaction_type,
            crate::models::TransactionType::Confirmation
        );
        assert_eq!(entries[0].provider_transaction_id.as_deref(), Some("sp_1"));
        assert_eq!(entries[0].status, PaymentStatus::Completed);

        assert_matches!(rx.try_recv().unwrap(), Event::PaymentCompleted { payment_id, .. } => {
            assert_eq!(payment_id, payment.id);
        });
    }

    #[tokio::test]
    async fn replayed_confirmation_is_a_noop() {
        let (ledger, db, mut rx) = setup().await;
        let payment = seed_payment(&db, PaymentStatus::Processing, Some("sp_1")).await;

        ledger.apply(payment.id, confirm("sp_1")).await.unwrap();
        let replay = ledger.apply(payment.id, confirm("sp_1")).await.unwrap();

        assert_eq!(replay.outcome, ApplyOutcome::Replayed);
        assert_eq!(replay.payment.status, PaymentStatus::Completed);
        assert_eq!(replay.payment.version, 1);
        assert_eq!(transaction_entries(&db, payment.id).await.len(), 1);

        // Only the first apply emits an event.
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn confirm_from_terminal_state_is_rejected() {
        let (ledger, db, _rx) = setup().await;
        let payment = seed_payment(&db, PaymentStatus::Failed, Some("sp_1")).await;

        let err = ledger.apply(payment.id, confirm("sp_2")).await.unwrap_err();

        assert_matches!(err, ServiceError::InvalidTransition { from, .. } => {
            assert_eq!(from, PaymentStatus::Failed);
        });
        assert!(transaction_entries(&db, payment.id).await.is_empty());
    }

    #[tokio::test]
    async fn acknowledge_binds_late_reference() {
        let (ledger, db, _rx) = setup().await;
        let payment = seed_payment(&db, PaymentStatus::Pending, None).await;

        let applied = ledger
            .apply(
                payment.id,
                PaymentEvent::Acknowledge {
                    provider_transaction_id: Some("sp_late".to_string()),
                },
            )
            .await
            .unwrap();

        assert_eq!(applied.outcome, ApplyOutcome::Applied);
        assert_eq!(applied.payment.status, PaymentStatus::Processing);
        assert_eq!(
            applied.payment.provider_transaction_id.as_deref(),
            Some("sp_late")
        );

        let stored = payment::Entity::find_by_id(payment.id)
            .one(&*db)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.provider_transaction_id.as_deref(), Some("sp_late"));
    }

    #[tokio::test]
    async fn second_acknowledge_is_noop_without_entry() {
        let (ledger, db, _rx) = setup().await;
        let payment = seed_payment(&db, PaymentStatus::Processing, Some("sp_1")).await;

        let applied = ledger
            .apply(
                payment.id,
                PaymentEvent::Acknowledge {
                    provider_transaction_id: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(applied.outcome, ApplyOutcome::Noop);
        assert_eq!(applied.payment.version, 0);
        assert!(transaction_entries(&db, payment.id).await.is_empty());
    }

    #[tokio::test]
    async fn refunds_accumulate_until_exhausted() {
        let (ledger, db, mut rx) = setup().await;
        let payment = seed_payment(&db, PaymentStatus::Completed, Some("sp_1")).await;

        let first = ledger
            .apply(
                payment.id,
                PaymentEvent::Refund {
                    amount: dec!(30),
                    provider_refund_id: Some("rf_1".to_string()),
                    reason: Some("damaged item".to_string()),
                },
            )
            .await
            .unwrap();
        assert_eq!(first.payment.status, PaymentStatus::PartiallyRefunded);
        assert_eq!(first.payment.refunded_amount, dec!(30));
        assert!(first.payment.refunded_at.is_some());

        let second = ledger
            .apply(
                payment.id,
                PaymentEvent::Refund {
                    amount: dec!(70),
                    provider_refund_id: Some("rf_2".to_string()),
                    reason: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(second.payment.status, PaymentStatus::Refunded);
        assert_eq!(second.payment.refunded_amount, dec!(100));
        assert_eq!(
            second.payment.refund_reason.as_deref(),
            Some("damaged item")
        );

        let entries = transaction_entries(&db, payment.id).await;
        assert_eq!(entries.len(), 2);
        assert!(entries
            .iter()
            .all(|e| e.transaction_type == crate::models::TransactionType::Refund));

        assert_matches!(
            rx.try_recv().unwrap(),
            Event::PaymentRefunded { fully_refunded: false, .. }
        );
        assert_matches!(
            rx.try_recv().unwrap(),
            Event::PaymentRefunded { fully_refunded: true, .. }
        );
    }

    #[tokio::test]
    async fn refund_over_remaining_is_rejected() {
        let (ledger, db, _rx) = setup().await;
        let payment = seed_payment(&db, PaymentStatus::Completed, Some("sp_1")).await;

        ledger
            .apply(
                payment.id,
                PaymentEvent::Refund {
                    amount: dec!(80),
                    provider_refund_id: Some("rf_1".to_string()),
                    reason: None,
                },
            )
            .await
            .unwrap();

        let err = ledger
            .apply(
                payment.id,
                PaymentEvent::Refund {
                    amount: dec!(30),
                    provider_refund_id: Some("rf_2".to_string()),
                    reason: None,
                },
            )
            .await
            .unwrap_err();

        assert_matches!(err, ServiceError::RefundAmountExceedsAvailable { requested, available } => {
            assert_eq!(requested, dec!(30));
            assert_eq!(available, dec!(20));
        });
    }

    #[tokio::test]
    async fn cancel_records_failure_notice() {
        let (ledger, db, mut rx) = setup().await;
        let payment = seed_payment(&db, PaymentStatus::Pending, None).await;

        let applied = ledger
            .apply(
                payment.id,
                PaymentEvent::Cancel {
                    reason: "changed my mind".to_string(),
                },
            )
            .await
            .unwrap();

        assert_eq!(applied.payment.status, PaymentStatus::Cancelled);
        assert!(applied.payment.failed_at.is_some());
        assert_eq!(
            applied.payment.failure_reason.as_deref(),
            Some("changed my mind")
        );
        assert!(applied.payment.active_order_key.is_none());

        let entries = transaction_entries(&db, payment.id).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(
            entries[0].transaction_type,
            crate::models::TransactionType::FailureNotice
        );
        assert_eq!(entries[0].error_code.as_deref(), Some(CANCELLED_ERROR_CODE));

        assert_matches!(rx.try_recv().unwrap(), Event::PaymentCancelled { .. });
    }

    #[tokio::test]
    async fn create_opens_row_with_initiation_entry() {
        let (ledger, db, _rx) = setup().await;

        let id = Uuid::new_v4();
        let order = OrderRef::new(OrderType::LabOrder, Uuid::new_v4());
        let created = ledger
            .create(NewPayment {
                id,
                payer_id: Uuid::new_v4(),
                order,
                amount: dec!(75),
                currency: "SAR".to_string(),
                method: PaymentMethod::Online,
                provider: Some(PaymentProvider::SwiftPay),
                status: PaymentStatus::Pending,
                provider_transaction_id: Some("sp_9".to_string()),
            })
            .await
            .unwrap();

        assert_eq!(created.id, id);
        assert_eq!(created.active_order_key.as_deref(), Some(order.active_key().as_str()));

        let entries = transaction_entries(&db, id).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(
            entries[0].transaction_type,
            crate::models::TransactionType::Initiation
        );
        assert_eq!(entries[0].provider_transaction_id.as_deref(), Some("sp_9"));
    }

    #[tokio::test]
    async fn second_live_payment_for_same_order_is_rejected() {
        let (ledger, _db, _rx) = setup().await;

        let order = OrderRef::new(OrderType::PharmacyOrder, Uuid::new_v4());
        let new = |id: Uuid| NewPayment {
            id,
            payer_id: Uuid::new_v4(),
            order,
            amount: dec!(40),
            currency: "SAR".to_string(),
            method: PaymentMethod::CashOnDelivery,
            provider: None,
            status: PaymentStatus::Processing,
            provider_transaction_id: None,
        };

        ledger.create(new(Uuid::new_v4())).await.unwrap();
        let err = ledger.create(new(Uuid::new_v4())).await.unwrap_err();

        assert!(err.is_unique_violation());
    }
}
