/*!
 * # Reconciliation
 *
 * Keeps the local ledger and the provider's ledger telling the same
 * story. Three inputs feed it: provider callbacks, a periodic sweep
 * over stale pending payments, and an operator-triggered reconcile.
 * All three funnel into the same ledger apply path, so replays and
 * races settle identically no matter which carrier arrives first.
 */

use chrono::{Duration, Utc};
use http::HeaderMap;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::entities::payment;
use crate::errors::ServiceError;
use crate::gateway::{
    CallbackOutcome, GatewayError, GatewayRegistry, ParsedCallback, RemoteIntent, RemoteStatus,
    StatusProbe,
};
use crate::metrics;
use crate::models::{PaymentEvent, PaymentProvider, PaymentStatus};
use crate::services::ledger::{ApplyOutcome, PaymentLedger};

/// Error code recorded when a pending payment is failed because the
/// provider has no record of it.
pub const RECONCILIATION_TIMEOUT_CODE: &str = "reconciliation_timeout";

/// How a callback settled. Every disposition is acknowledged with 200 so
/// the provider stops retrying; only signature and transport problems
/// surface as errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CallbackDisposition {
    /// The event advanced the payment.
    Applied,
    /// The carried transaction was already recorded.
    Replayed,
    /// Recognized, nothing to change.
    Noop,
    /// No local payment matches the callback.
    Unmatched,
    /// The event disagrees with durable local state.
    Conflict,
}

/// Counters from one sweep pass.
#[derive(Debug, Default, Clone, Copy, Serialize, ToSchema)]
pub struct SweepSummary {
    pub examined: u64,
    pub resolved: u64,
    pub timed_out: u64,
    pub still_pending: u64,
    pub skipped: u64,
}

enum StaleOutcome {
    Resolved,
    TimedOut,
    StillPending,
}

#[derive(Clone)]
pub struct ReconciliationService {
    db: Arc<DatabaseConnection>,
    ledger: PaymentLedger,
    gateways: GatewayRegistry,
    config: Arc<AppConfig>,
}

impl ReconciliationService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        ledger: PaymentLedger,
        gateways: GatewayRegistry,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db,
            ledger,
            gateways,
            config,
        }
    }

    /// Handle a provider webhook delivery.
    ///
    /// The gateway authenticates and decodes the body; the payment is
    /// located by its bound transaction id, falling back to the order echo
    /// for payments persisted before the provider answered. Unknown
    /// transactions are acknowledged: initiation commits the row after the
    /// provider registers the intent, so a fast callback can outrun it.
    #[instrument(skip(self, headers, body))]
    pub async fn handle_callback(
        &self,
        provider: PaymentProvider,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<CallbackDisposition, ServiceError> {
        metrics::CALLBACKS_RECEIVED.inc();

        let gateway = self.gateways.get(provider)?;
        let parsed = match gateway.parse_callback(headers, body) {
            Ok(parsed) => parsed,
            Err(err @ GatewayError::SignatureInvalid(_)) => {
                metrics::CALLBACK_SIGNATURE_FAILURES.inc();
                return Err(err.into());
            }
            Err(err) => return Err(err.into()),
        };

        let Some(payment) = self.locate(&parsed).await? else {
            info!(
                provider_transaction_id = %parsed.provider_transaction_id,
                "callback matches no payment, acknowledged"
            );
            return Ok(CallbackDisposition::Unmatched);
        };

        // A payment found through the order echo may be bound to a different
        // attempt; crediting it with this callback would cross the books.
        if let Some(bound) = payment.provider_transaction_id.as_deref() {
            if bound != parsed.provider_transaction_id {
                metrics::RECONCILIATION_CONFLICTS.inc();
                warn!(
                    payment_id = %payment.id,
                    bound,
                    incoming = %parsed.provider_transaction_id,
                    "callback transaction id does not match the bound reference"
                );
                return Ok(CallbackDisposition::Conflict);
            }
        }

        let reference = parsed.provider_transaction_id;
        let event = match parsed.outcome {
            CallbackOutcome::Acknowledged => PaymentEvent::Acknowledge {
                provider_transaction_id: Some(reference),
            },
            CallbackOutcome::Succeeded { amount } => PaymentEvent::Confirm {
                provider_transaction_id: Some(reference),
                amount,
            },
            CallbackOutcome::Failed {
                error_code,
                error_message,
            } => PaymentEvent::Fail {
                provider_transaction_id: Some(reference),
                error_code,
                error_message,
            },
            CallbackOutcome::Refunded {
                amount,
                provider_refund_id,
            } => PaymentEvent::Refund {
                amount,
                provider_refund_id: Some(provider_refund_id),
                reason: None,
            },
            CallbackOutcome::Ignored { event } => {
                debug!(payment_id = %payment.id, event = %event, "callback event ignored");
                return Ok(CallbackDisposition::Noop);
            }
        };

        self.settle(payment.id, event).await
    }

    /// Run one reconciliation pass over payments stuck in Pending longer
    /// than the configured window. Each payment is resolved against the
    /// provider's answer; a payment the provider has never heard of is
    /// failed so its order is released.
    #[instrument(skip(self))]
    pub async fn sweep(&self) -> Result<SweepSummary, ServiceError> {
        metrics::SWEEP_RUNS.inc();
        let cutoff = Utc::now() - Duration::minutes(self.config.pending_payment_timeout_mins);

        let stale = payment::Entity::find()
            .filter(payment::Column::Status.eq(PaymentStatus::Pending))
            .filter(payment::Column::CreatedAt.lt(cutoff))
            .order_by_asc(payment::Column::CreatedAt)
            .limit(self.config.sweep_batch_size)
            .all(&*self.db)
            .await?;

        let mut summary = SweepSummary::default();
        for payment in stale {
            summary.examined += 1;
            match self.resolve_stale(&payment).await {
                Ok(StaleOutcome::Resolved) => summary.resolved += 1,
                Ok(StaleOutcome::TimedOut) => summary.timed_out += 1,
                Ok(StaleOutcome::StillPending) => summary.still_pending += 1,
                Err(err) => {
                    summary.skipped += 1;
                    warn!(
                        payment_id = %payment.id,
                        error = %err,
                        "sweep left payment for the next pass"
                    );
                }
            }
        }

        if summary.examined > 0 {
            info!(
                examined = summary.examined,
                resolved = summary.resolved,
                timed_out = summary.timed_out,
                still_pending = summary.still_pending,
                skipped = summary.skipped,
                "reconciliation sweep finished"
            );
        }
        Ok(summary)
    }

    /// Operator-triggered reconcile of a single payment against the
    /// provider. Missing transitions and refunds are folded in; entries
    /// already recorded are absorbed by the transaction barrier.
    #[instrument(skip(self))]
    pub async fn reconcile(&self, payment_id: Uuid) -> Result<payment::Model, ServiceError> {
        let payment = self.load(payment_id).await?;
        if payment.provider.is_none() {
            return Err(ServiceError::InvalidOperation(
                "cash payments have no remote ledger to reconcile against".to_string(),
            ));
        }

        let gateway = self.gateways.for_payment(payment.provider)?;
        match gateway.query_status(&probe_for(&payment)).await? {
            Some(intent) => self.apply_remote(payment.id, intent).await,
            None if payment.status.is_active() => {
                let applied = self
                    .ledger
                    .apply(
                        payment_id,
                        PaymentEvent::Fail {
                            provider_transaction_id: None,
                            error_code: RECONCILIATION_TIMEOUT_CODE.to_string(),
                            error_message: Some(
                                "provider has no record of this payment".to_string(),
                            ),
                        },
                    )
                    .await?;
                Ok(applied.payment)
            }
            // Terminal with no remote record: nothing to correct.
            None => Ok(payment),
        }
    }

    async fn resolve_stale(&self, payment: &payment::Model) -> Result<StaleOutcome, ServiceError> {
        let gateway = self.gateways.for_payment(payment.provider)?;
        match gateway.query_status(&probe_for(payment)).await? {
            Some(intent) => match intent.status {
                RemoteStatus::Pending => Ok(StaleOutcome::StillPending),
                _ => {
                    self.apply_remote(payment.id, intent).await?;
                    Ok(StaleOutcome::Resolved)
                }
            },
            None => {
                metrics::SWEEP_TIMEOUTS.inc();
                self.ledger
                    .apply(
                        payment.id,
                        PaymentEvent::Fail {
                            provider_transaction_id: None,
                            error_code: RECONCILIATION_TIMEOUT_CODE.to_string(),
                            error_message: Some(
                                "no provider record within the pending window".to_string(),
                            ),
                        },
                    )
                    .await?;
                Ok(StaleOutcome::TimedOut)
            }
        }
    }

    /// Fold a remote intent into the ledger.
    async fn apply_remote(
        &self,
        payment_id: Uuid,
        intent: RemoteIntent,
    ) -> Result<payment::Model, ServiceError> {
        let RemoteIntent {
            provider_transaction_id,
            status,
        } = intent;

        match status {
            RemoteStatus::Pending => self.load(payment_id).await,
            RemoteStatus::Paid { amount } => {
                let applied = self
                    .ledger
                    .apply(
                        payment_id,
                        PaymentEvent::Confirm {
                            provider_transaction_id: Some(provider_transaction_id),
                            amount,
                        },
                    )
                    .await?;
                Ok(applied.payment)
            }
            RemoteStatus::Failed { error_code } => {
                let applied = self
                    .ledger
                    .apply(
                        payment_id,
                        PaymentEvent::Fail {
                            provider_transaction_id: Some(provider_transaction_id),
                            error_code,
                            error_message: None,
                        },
                    )
                    .await?;
                Ok(applied.payment)
            }
            RemoteStatus::Refunded { refunds } => {
                // The remote ledger only reaches Refunded through Paid, so
                // replay the capture first, then each refund.
                let mut applied = self
                    .ledger
                    .apply(
                        payment_id,
                        PaymentEvent::Confirm {
                            provider_transaction_id: Some(provider_transaction_id),
                            amount: None,
                        },
                    )
                    .await?;
                for refund in refunds {
                    applied = self
                        .ledger
                        .apply(
                            payment_id,
                            PaymentEvent::Refund {
                                amount: refund.amount,
                                provider_refund_id: Some(refund.provider_refund_id),
                                reason: None,
                            },
                        )
                        .await?;
                }
                Ok(applied.payment)
            }
        }
    }

    /// Apply a callback event, folding permanent disagreements into an
    /// acknowledged conflict. The earliest durable terminal state wins;
    /// retrying the same delivery cannot change the answer.
    async fn settle(
        &self,
        payment_id: Uuid,
        event: PaymentEvent,
    ) -> Result<CallbackDisposition, ServiceError> {
        match self.ledger.apply(payment_id, event).await {
            Ok(applied) => Ok(match applied.outcome {
                ApplyOutcome::Applied => CallbackDisposition::Applied,
                ApplyOutcome::Replayed => {
                    metrics::CALLBACK_REPLAYS.inc();
                    CallbackDisposition::Replayed
                }
                ApplyOutcome::Noop => CallbackDisposition::Noop,
            }),
            Err(ServiceError::InvalidTransition { from, event }) => {
                metrics::RECONCILIATION_CONFLICTS.inc();
                warn!(%payment_id, %from, event = %event, "callback conflicts with durable state");
                Ok(CallbackDisposition::Conflict)
            }
            Err(ServiceError::RefundAmountExceedsAvailable {
                requested,
                available,
            }) => {
                metrics::RECONCILIATION_CONFLICTS.inc();
                warn!(
                    %payment_id,
                    %requested,
                    %available,
                    "callback refund exceeds the remaining amount"
                );
                Ok(CallbackDisposition::Conflict)
            }
            Err(other) => Err(other),
        }
    }

    /// Bound transaction id first; the order echo reaches payments whose
    /// remote id was never bound.
    async fn locate(&self, parsed: &ParsedCallback) -> Result<Option<payment::Model>, ServiceError> {
        let by_reference = payment::Entity::find()
            .filter(
                payment::Column::ProviderTransactionId
                    .eq(parsed.provider_transaction_id.as_str()),
            )
            .one(&*self.db)
            .await?;
        if by_reference.is_some() {
            return Ok(by_reference);
        }

        let Some(order) = &parsed.order_ref else {
            return Ok(None);
        };

        // Prefer the live attempt; otherwise the newest one, so a late
        // terminal callback still reaches the row it belongs to.
        let active = payment::Entity::find()
            .filter(payment::Column::ActiveOrderKey.eq(order.active_key()))
            .one(&*self.db)
            .await?;
        if active.is_some() {
            return Ok(active);
        }

        let latest = payment::Entity::find()
            .filter(payment::Column::OrderType.eq(order.order_type))
            .filter(payment::Column::OrderId.eq(order.order_id))
            .order_by_desc(payment::Column::CreatedAt)
            .one(&*self.db)
            .await?;
        Ok(latest)
    }

    async fn load(&self, payment_id: Uuid) -> Result<payment::Model, ServiceError> {
        payment::Entity::find_by_id(payment_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Payment {} not found", payment_id)))
    }
}

fn probe_for(payment: &payment::Model) -> StatusProbe {
    match payment.provider_transaction_id.as_deref() {
        Some(reference) => StatusProbe::by_transaction(reference),
        None => StatusProbe::by_order(payment.order_ref()),
    }
}

/// Background loop driving periodic sweeps. Spawned from `main`.
pub async fn run_sweeper(service: ReconciliationService, period: std::time::Duration) {
    let mut ticker = tokio::time::interval(period);
    loop {
        ticker.tick().await;
        if let Err(err) = service.sweep().await {
            error!(error = %err, "reconciliation sweep failed");
        }
    }
}
