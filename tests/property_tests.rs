//! Property-based tests for the payment lifecycle core.
//!
//! These tests use proptest to verify the legal-transition table and the
//! refund arithmetic across a wide range of inputs, helping to catch edge
//! cases that unit tests might miss.

use proptest::prelude::*;
use rust_decimal::Decimal;
use uuid::Uuid;

use carepay_api::models::{
    OrderRef, OrderType, PaymentEvent, PaymentStatus, Transition, TransactionType,
};

// Strategies for generating test data

fn status_strategy() -> impl Strategy<Value = PaymentStatus> {
    prop_oneof![
        Just(PaymentStatus::Pending),
        Just(PaymentStatus::Processing),
        Just(PaymentStatus::Completed),
        Just(PaymentStatus::Failed),
        Just(PaymentStatus::Cancelled),
        Just(PaymentStatus::Refunded),
        Just(PaymentStatus::PartiallyRefunded),
    ]
}

fn amount_strategy() -> impl Strategy<Value = Decimal> {
    (1u64..1_000_000, 0u8..100).prop_map(|(units, cents)| {
        format!("{}.{:02}", units, cents)
            .parse::<Decimal>()
            .expect("valid decimal")
    })
}

fn reference_strategy() -> impl Strategy<Value = Option<String>> {
    proptest::option::of("[a-z]{2}_[a-z0-9]{6,12}")
}

fn event_strategy() -> impl Strategy<Value = PaymentEvent> {
    prop_oneof![
        reference_strategy().prop_map(|provider_transaction_id| PaymentEvent::Acknowledge {
            provider_transaction_id,
        }),
        (reference_strategy(), proptest::option::of(amount_strategy())).prop_map(
            |(provider_transaction_id, amount)| PaymentEvent::Confirm {
                provider_transaction_id,
                amount,
            }
        ),
        (reference_strategy(), "[a-z_]{3,20}").prop_map(
            |(provider_transaction_id, error_code)| PaymentEvent::Fail {
                provider_transaction_id,
                error_code,
                error_message: None,
            }
        ),
        "[a-z ]{1,30}".prop_map(|reason| PaymentEvent::Cancel { reason }),
        (amount_strategy(), reference_strategy()).prop_map(|(amount, provider_refund_id)| {
            PaymentEvent::Refund {
                amount,
                provider_refund_id,
                reason: None,
            }
        }),
    ]
}

// Property: the transition table only moves forward

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    #[test]
    fn transitions_never_land_in_pending(
        status in status_strategy(),
        event in event_strategy(),
        exhausts in any::<bool>(),
    ) {
        if let Transition::To(next) = status.on_event(&event, exhausts) {
            prop_assert_ne!(next, PaymentStatus::Pending, "nothing transitions back into Pending");
        }
    }

    #[test]
    fn terminal_failures_accept_no_events(event in event_strategy(), exhausts in any::<bool>()) {
        for status in [
            PaymentStatus::Failed,
            PaymentStatus::Cancelled,
            PaymentStatus::Refunded,
        ] {
            prop_assert_eq!(status.on_event(&event, exhausts), Transition::Illegal);
        }
    }

    #[test]
    fn refunds_apply_exactly_to_refundable_statuses(
        status in status_strategy(),
        amount in amount_strategy(),
        exhausts in any::<bool>(),
    ) {
        let refund = PaymentEvent::Refund {
            amount,
            provider_refund_id: None,
            reason: None,
        };
        let transition = status.on_event(&refund, exhausts);

        if status.is_refundable() {
            let expected = if exhausts {
                PaymentStatus::Refunded
            } else {
                PaymentStatus::PartiallyRefunded
            };
            prop_assert_eq!(transition, Transition::To(expected));
        } else {
            prop_assert_eq!(transition, Transition::Illegal);
        }
    }

    #[test]
    fn statuses_are_either_active_or_terminal(status in status_strategy()) {
        prop_assert_ne!(status.is_active(), status.is_terminal());
    }

    #[test]
    fn acknowledgments_are_absorbed_after_the_first(reference in reference_strategy()) {
        let ack = PaymentEvent::Acknowledge {
            provider_transaction_id: reference,
        };
        prop_assert_eq!(
            PaymentStatus::Pending.on_event(&ack, false),
            Transition::To(PaymentStatus::Processing)
        );
        prop_assert_eq!(
            PaymentStatus::Processing.on_event(&ack, false),
            Transition::Noop
        );
    }
}

// Property: event classification is stable

proptest! {
    #[test]
    fn provider_references_surface_verbatim(
        id in "[a-z]{2}_[a-z0-9]{6,12}",
        amount in amount_strategy(),
    ) {
        let confirm = PaymentEvent::Confirm {
            provider_transaction_id: Some(id.clone()),
            amount: None,
        };
        prop_assert_eq!(confirm.transaction_type(), TransactionType::Confirmation);
        prop_assert_eq!(confirm.provider_reference(), Some(id.as_str()));

        let refund = PaymentEvent::Refund {
            amount,
            provider_refund_id: Some(id.clone()),
            reason: None,
        };
        prop_assert_eq!(refund.transaction_type(), TransactionType::Refund);
        prop_assert_eq!(refund.provider_reference(), Some(id.as_str()));
    }

    #[test]
    fn cancellations_carry_no_provider_reference(reason in "[a-z ]{1,30}") {
        let event = PaymentEvent::Cancel { reason };
        prop_assert_eq!(event.transaction_type(), TransactionType::FailureNotice);
        prop_assert!(event.provider_reference().is_none());
    }
}

// Property: refund accumulation stays within the charge.
//
// Mirrors the ledger's arithmetic: requests over the remaining amount are
// rejected before the transition table, accepted ones accumulate.
fn simulate_refunds(amount: Decimal, requests: &[Decimal]) -> (PaymentStatus, Decimal) {
    let mut status = PaymentStatus::Completed;
    let mut refunded = Decimal::ZERO;

    for request in requests {
        let available = amount - refunded;
        if *request <= Decimal::ZERO || *request > available {
            continue;
        }
        let event = PaymentEvent::Refund {
            amount: *request,
            provider_refund_id: None,
            reason: None,
        };
        if let Transition::To(next) = status.on_event(&event, *request == available) {
            status = next;
            refunded += *request;
        }
    }

    (status, refunded)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn refund_totals_never_exceed_the_charge(
        amount in amount_strategy(),
        requests in proptest::collection::vec(amount_strategy(), 0..12),
    ) {
        let (status, refunded) = simulate_refunds(amount, &requests);

        prop_assert!(refunded >= Decimal::ZERO);
        prop_assert!(refunded <= amount, "refunded {} exceeds charge {}", refunded, amount);
        match status {
            PaymentStatus::Refunded => prop_assert_eq!(refunded, amount),
            PaymentStatus::PartiallyRefunded => {
                prop_assert!(refunded > Decimal::ZERO && refunded < amount)
            }
            PaymentStatus::Completed => prop_assert_eq!(refunded, Decimal::ZERO),
            other => prop_assert!(false, "unreachable refund status: {:?}", other),
        }
    }

    #[test]
    fn exhausted_payments_accept_no_further_refunds(amount in amount_strategy()) {
        let (status, refunded) = simulate_refunds(amount, &[amount, amount]);
        prop_assert_eq!(status, PaymentStatus::Refunded);
        prop_assert_eq!(refunded, amount);
    }
}

// Property: order keys are stable and collision-free

proptest! {
    #[test]
    fn order_keys_are_unique_per_order(a in any::<u128>(), b in any::<u128>()) {
        prop_assume!(a != b);
        let left = OrderRef::new(OrderType::PharmacyOrder, Uuid::from_u128(a));
        let right = OrderRef::new(OrderType::PharmacyOrder, Uuid::from_u128(b));
        prop_assert_ne!(left.active_key(), right.active_key());
    }

    #[test]
    fn order_keys_distinguish_order_families(id in any::<u128>()) {
        let order_id = Uuid::from_u128(id);
        let pharmacy = OrderRef::new(OrderType::PharmacyOrder, order_id).active_key();
        let lab = OrderRef::new(OrderType::LabOrder, order_id).active_key();
        prop_assert_ne!(pharmacy, lab);
    }
}
