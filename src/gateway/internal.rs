use async_trait::async_trait;
use http::HeaderMap;

use crate::models::PaymentProvider;

use super::{
    GatewayError, InitiateReceipt, InitiateRequest, ParsedCallback, PaymentGateway, RefundReceipt,
    RefundRequest, RemoteIntent, StatusProbe,
};

/// Bookkeeping adapter for payments that never touch an external provider.
/// Receipts are synthesized locally so every transition still carries a
/// reference for the transaction dedup barrier.
#[derive(Debug, Default, Clone)]
pub struct InternalGateway;

impl InternalGateway {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PaymentGateway for InternalGateway {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Internal
    }

    async fn initiate(&self, request: InitiateRequest) -> Result<InitiateReceipt, GatewayError> {
        Ok(InitiateReceipt {
            provider_transaction_id: format!("int-{}", request.payment_id),
            redirect_url: None,
        })
    }

    fn parse_callback(
        &self,
        _headers: &HeaderMap,
        _body: &[u8],
    ) -> Result<ParsedCallback, GatewayError> {
        Err(GatewayError::Unsupported(
            "internal payments emit no callbacks".to_string(),
        ))
    }

    async fn refund(&self, request: RefundRequest) -> Result<RefundReceipt, GatewayError> {
        Ok(RefundReceipt {
            provider_refund_id: format!("int-rf-{}-{}", request.payment_id, request.sequence),
        })
    }

    async fn query_status(
        &self,
        _probe: &StatusProbe,
    ) -> Result<Option<RemoteIntent>, GatewayError> {
        Err(GatewayError::Unsupported(
            "internal payments have no remote ledger".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OrderRef, OrderType, PaymentKind};
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn refund_request(payment_id: Uuid, sequence: u32) -> RefundRequest {
        RefundRequest {
            payment_id,
            provider_transaction_id: format!("cod-{}", payment_id),
            amount: dec!(25),
            currency: "SAR".to_string(),
            sequence,
            reason: Some("damaged item".to_string()),
        }
    }

    #[tokio::test]
    async fn initiate_synthesizes_receipt_without_io() {
        let payment_id = Uuid::new_v4();
        let receipt = InternalGateway::new()
            .initiate(InitiateRequest {
                payment_id,
                order: OrderRef::new(OrderType::PharmacyOrder, Uuid::new_v4()),
                amount: dec!(100),
                currency: "SAR".to_string(),
                kind: PaymentKind::Card,
                return_url: "https://app.example/return".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(receipt.provider_transaction_id, format!("int-{}", payment_id));
        assert!(receipt.redirect_url.is_none());
    }

    #[tokio::test]
    async fn refund_ids_are_deterministic_per_sequence() {
        let gateway = InternalGateway::new();
        let payment_id = Uuid::new_v4();

        let first = gateway.refund(refund_request(payment_id, 1)).await.unwrap();
        let again = gateway.refund(refund_request(payment_id, 1)).await.unwrap();
        let second = gateway.refund(refund_request(payment_id, 2)).await.unwrap();

        assert_eq!(first.provider_refund_id, again.provider_refund_id);
        assert_eq!(
            first.provider_refund_id,
            format!("int-rf-{}-1", payment_id)
        );
        assert_ne!(first.provider_refund_id, second.provider_refund_id);
    }

    #[tokio::test]
    async fn callbacks_and_status_queries_are_unsupported() {
        let gateway = InternalGateway::new();

        assert_matches!(
            gateway.parse_callback(&HeaderMap::new(), b"{}"),
            Err(GatewayError::Unsupported(_))
        );
        assert_matches!(
            gateway.query_status(&StatusProbe::default()).await,
            Err(GatewayError::Unsupported(_))
        );
    }
}
