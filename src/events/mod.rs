use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::metrics;
use crate::models::{OrderType, PaymentMethod};

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

// Lifecycle events emitted after a payment transition is durable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    PaymentInitiated {
        payment_id: Uuid,
        order_type: OrderType,
        order_id: Uuid,
        method: PaymentMethod,
        amount: Decimal,
    },
    PaymentCompleted {
        payment_id: Uuid,
        order_type: OrderType,
        order_id: Uuid,
        amount: Decimal,
        completed_at: DateTime<Utc>,
    },
    PaymentFailed {
        payment_id: Uuid,
        order_type: OrderType,
        order_id: Uuid,
        error_code: String,
    },
    PaymentCancelled {
        payment_id: Uuid,
        order_type: OrderType,
        order_id: Uuid,
        reason: String,
    },
    PaymentRefunded {
        payment_id: Uuid,
        order_type: OrderType,
        order_id: Uuid,
        amount: Decimal,
        fully_refunded: bool,
    },
}

// Consumes lifecycle events: structured logs for downstream systems and
// counter updates for /metrics. Order fulfillment reacts to these logs
// out of band; nothing here writes back to the payments tables.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match event {
            Event::PaymentInitiated {
                payment_id,
                order_type,
                order_id,
                method,
                amount,
            } => {
                info!(
                    %payment_id,
                    %order_type,
                    %order_id,
                    ?method,
                    %amount,
                    "payment initiated"
                );
                metrics::PAYMENTS_INITIATED.inc();
            }
            Event::PaymentCompleted {
                payment_id,
                order_type,
                order_id,
                amount,
                completed_at,
            } => {
                info!(
                    %payment_id,
                    %order_type,
                    %order_id,
                    %amount,
                    %completed_at,
                    "payment completed"
                );
                metrics::PAYMENTS_COMPLETED.inc();
            }
            Event::PaymentFailed {
                payment_id,
                order_type,
                order_id,
                error_code,
            } => {
                warn!(%payment_id, %order_type, %order_id, %error_code, "payment failed");
                metrics::PAYMENTS_FAILED.inc();
            }
            Event::PaymentCancelled {
                payment_id,
                order_type,
                order_id,
                reason,
            } => {
                info!(%payment_id, %order_type, %order_id, %reason, "payment cancelled");
                metrics::PAYMENTS_CANCELLED.inc();
            }
            Event::PaymentRefunded {
                payment_id,
                order_type,
                order_id,
                amount,
                fully_refunded,
            } => {
                info!(
                    %payment_id,
                    %order_type,
                    %order_id,
                    %amount,
                    fully_refunded,
                    "payment refunded"
                );
                metrics::PAYMENTS_REFUNDED.inc();
            }
        }
    }

    warn!("Event processing loop has ended");
}
