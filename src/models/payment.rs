use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Enum representing the possible statuses of a payment.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
    ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
pub enum PaymentStatus {
    #[sea_orm(string_value = "Pending")]
    Pending,
    #[sea_orm(string_value = "Processing")]
    Processing,
    #[sea_orm(string_value = "Completed")]
    Completed,
    #[sea_orm(string_value = "Failed")]
    Failed,
    #[sea_orm(string_value = "Cancelled")]
    Cancelled,
    #[sea_orm(string_value = "Refunded")]
    Refunded,
    #[sea_orm(string_value = "PartiallyRefunded")]
    PartiallyRefunded,
}

/// Enum representing how a payment is collected.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
    ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
pub enum PaymentMethod {
    #[sea_orm(string_value = "Online")]
    Online,
    #[sea_orm(string_value = "CashOnDelivery")]
    CashOnDelivery,
}

/// Enum representing the payment rail a payment is routed through.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum PaymentProvider {
    /// Local bookkeeping rail. Cash-on-delivery payments store a NULL
    /// provider column and resolve to this adapter.
    #[sea_orm(string_value = "Internal")]
    Internal,
    #[sea_orm(string_value = "SwiftPay")]
    SwiftPay,
}

/// Enum representing the order family a payment settles.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
pub enum OrderType {
    #[sea_orm(string_value = "PharmacyOrder")]
    PharmacyOrder,
    #[sea_orm(string_value = "LabOrder")]
    LabOrder,
    #[sea_orm(string_value = "ConsultationBooking")]
    ConsultationBooking,
}

/// Enum representing the kind of ledger entry appended by a transition.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
    ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
pub enum TransactionType {
    #[sea_orm(string_value = "Initiation")]
    Initiation,
    #[sea_orm(string_value = "Confirmation")]
    Confirmation,
    #[sea_orm(string_value = "Refund")]
    Refund,
    #[sea_orm(string_value = "FailureNotice")]
    FailureNotice,
}

/// Checkout flavor forwarded to the gateway for online payments.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display, ToSchema)]
pub enum PaymentKind {
    Card,
    Wallet,
}

/// Opaque reference to the order a payment settles. The engine compares and
/// stores it but never dereferences it into order-domain tables.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct OrderRef {
    pub order_type: OrderType,
    pub order_id: Uuid,
}

impl OrderRef {
    pub fn new(order_type: OrderType, order_id: Uuid) -> Self {
        Self {
            order_type,
            order_id,
        }
    }

    /// Key for the unique active-payment index: one live payment per order.
    pub fn active_key(&self) -> String {
        format!("{}:{}", self.order_type, self.order_id)
    }
}

impl std::fmt::Display for OrderRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.order_type, self.order_id)
    }
}

impl PaymentStatus {
    /// Active payments block a second intent for the same order.
    pub fn is_active(&self) -> bool {
        matches!(self, PaymentStatus::Pending | PaymentStatus::Processing)
    }

    /// Statuses a refund may be issued against.
    pub fn is_refundable(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Completed | PaymentStatus::PartiallyRefunded
        )
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

/// State-machine input. Each applied event appends exactly one ledger entry
/// of the matching [`TransactionType`].
#[derive(Clone, Debug, PartialEq)]
pub enum PaymentEvent {
    /// Provider acknowledged intent creation, or a COD order proceeded to
    /// fulfillment. Carries the remote id when it became known late.
    Acknowledge {
        provider_transaction_id: Option<String>,
    },
    /// Verified confirmation that money moved (callback, COD delivery
    /// confirmation, or an authoritative status query).
    Confirm {
        provider_transaction_id: Option<String>,
        amount: Option<Decimal>,
    },
    /// Provider rejection or an unresolved-timeout sweep.
    Fail {
        provider_transaction_id: Option<String>,
        error_code: String,
        error_message: Option<String>,
    },
    /// Explicit user/operator cancellation before completion.
    Cancel { reason: String },
    /// Issued exclusively by the refund processor after the provider (or
    /// internal bookkeeping) accepted the refund.
    Refund {
        amount: Decimal,
        provider_refund_id: Option<String>,
        reason: Option<String>,
    },
}

impl PaymentEvent {
    pub fn transaction_type(&self) -> TransactionType {
        match self {
            PaymentEvent::Acknowledge { .. } => TransactionType::Initiation,
            PaymentEvent::Confirm { .. } => TransactionType::Confirmation,
            PaymentEvent::Fail { .. } | PaymentEvent::Cancel { .. } => {
                TransactionType::FailureNotice
            }
            PaymentEvent::Refund { .. } => TransactionType::Refund,
        }
    }

    /// The remote reference anchoring the idempotency barrier. Events without
    /// one rely on the transition table for replay safety.
    pub fn provider_reference(&self) -> Option<&str> {
        match self {
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
            } => provider_transaction_id.as_deref(),
            PaymentEvent::Refund {
                provider_refund_id, ..
            } => provider_refund_id.as_deref(),
            PaymentEvent::Cancel { .. } => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PaymentEvent::Acknowledge { .. } => "acknowledge",
            PaymentEvent::Confirm { .. } => "confirm",
            PaymentEvent::Fail { .. } => "fail",
            PaymentEvent::Cancel { .. } => "cancel",
            PaymentEvent::Refund { .. } => "refund",
        }
    }
}

/// Result of evaluating one event against the legal-transition table.
#[derive(Clone, Debug, PartialEq)]
pub enum Transition {
    To(PaymentStatus),
    /// Repeat of something already absorbed (e.g. a second acknowledgment);
    /// applying it again succeeds without changing state.
    Noop,
    Illegal,
}

impl PaymentStatus {
    /// The legal-transition table. `refund_exhausts` tells a refund whether it
    /// consumes the full remaining amount and must land on `Refunded`.
    pub fn on_event(&self, event: &PaymentEvent, refund_exhausts: bool) -> Transition {
        use PaymentStatus::*;

        match (self, event) {
            (Pending, PaymentEvent::Acknowledge { .. }) => Transition::To(Processing),
            (Processing, PaymentEvent::Acknowledge { .. }) => Transition::Noop,

            (Pending | Processing, PaymentEvent::Confirm { .. }) => Transition::To(Completed),

            (Pending | Processing, PaymentEvent::Fail { .. }) => Transition::To(Failed),
            (Pending | Processing, PaymentEvent::Cancel { .. }) => Transition::To(Cancelled),

            (Completed | PartiallyRefunded, PaymentEvent::Refund { .. }) => {
                if refund_exhausts {
                    Transition::To(Refunded)
                } else {
                    Transition::To(PartiallyRefunded)
                }
            }

            _ => Transition::Illegal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn confirm() -> PaymentEvent {
        PaymentEvent::Confirm {
            provider_transaction_id: Some("T1".into()),
            amount: None,
        }
    }

    fn refund(amount: Decimal) -> PaymentEvent {
        PaymentEvent::Refund {
            amount,
            provider_refund_id: None,
            reason: None,
        }
    }

    #[test]
    fn pending_confirms_directly() {
        assert_eq!(
            PaymentStatus::Pending.on_event(&confirm(), false),
            Transition::To(PaymentStatus::Completed)
        );
    }

    #[test]
    fn repeat_acknowledge_is_noop() {
        let ack = PaymentEvent::Acknowledge {
            provider_transaction_id: Some("T1".into()),
        };
        assert_eq!(
            PaymentStatus::Pending.on_event(&ack, false),
            Transition::To(PaymentStatus::Processing)
        );
        assert_eq!(
            PaymentStatus::Processing.on_event(&ack, false),
            Transition::Noop
        );
    }

    #[test]
    fn confirm_after_failure_is_illegal() {
        assert_eq!(
            PaymentStatus::Failed.on_event(&confirm(), false),
            Transition::Illegal
        );
    }

    #[test]
    fn refund_targets_depend_on_remaining() {
        assert_eq!(
            PaymentStatus::Completed.on_event(&refund(dec!(20)), false),
            Transition::To(PaymentStatus::PartiallyRefunded)
        );
        assert_eq!(
            PaymentStatus::PartiallyRefunded.on_event(&refund(dec!(30)), true),
            Transition::To(PaymentStatus::Refunded)
        );
    }

    #[test]
    fn refund_illegal_outside_refundable_states() {
        for status in [
            PaymentStatus::Pending,
            PaymentStatus::Processing,
            PaymentStatus::Failed,
            PaymentStatus::Cancelled,
            PaymentStatus::Refunded,
        ] {
            assert_eq!(
                status.on_event(&refund(dec!(5)), false),
                Transition::Illegal
            );
        }
    }

    #[test]
    fn event_reference_anchors_match_transaction_types() {
        let ev = PaymentEvent::Refund {
            amount: dec!(10),
            provider_refund_id: Some("rf_9".into()),
            reason: None,
        };
        assert_eq!(ev.transaction_type(), TransactionType::Refund);
        assert_eq!(ev.provider_reference(), Some("rf_9"));

        let cancel = PaymentEvent::Cancel {
            reason: "user".into(),
        };
        assert_eq!(cancel.transaction_type(), TransactionType::FailureNotice);
        assert_eq!(cancel.provider_reference(), None);
    }

    #[test]
    fn active_key_is_stable() {
        let id = Uuid::nil();
        let order = OrderRef::new(OrderType::PharmacyOrder, id);
        assert_eq!(order.active_key(), format!("PharmacyOrder:{}", id));
    }

    #[test]
    fn provider_parses_from_path_segment() {
        use std::str::FromStr;
        assert_eq!(
            PaymentProvider::from_str("swiftpay").ok(),
            Some(PaymentProvider::SwiftPay)
        );
        assert_eq!(
            PaymentProvider::from_str("SWIFTPAY").ok(),
            Some(PaymentProvider::SwiftPay)
        );
        assert_eq!(
            PaymentProvider::from_str("internal").ok(),
            Some(PaymentProvider::Internal)
        );
        assert!(PaymentProvider::from_str("other").is_err());
    }
}
