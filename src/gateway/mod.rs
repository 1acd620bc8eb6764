/*!
 * # Payment Gateway Adapters
 *
 * This module defines the seam between the payment engine and external
 * payment providers. Adapters translate provider wire formats into the
 * engine's lifecycle events; nothing outside this module speaks a
 * provider protocol.
 */

use async_trait::async_trait;
use http::HeaderMap;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::errors::ServiceError;
use crate::models::{OrderRef, PaymentKind, PaymentProvider};

pub mod internal;
pub mod swiftpay;

/// Gateway adapter errors
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Provider unavailable: {0}")]
    Unavailable(String),
    #[error("Provider rejected the request: {code}")]
    Rejected { code: String, message: String },
    #[error("Provider timed out: {0}")]
    Timeout(String),
    /// Provider declined the refund because the settlement is too old.
    #[error("Refund window expired: {0}")]
    RefundWindowExpired(String),
    /// Provider declined the refund for lack of merchant balance.
    #[error("Insufficient balance: {0}")]
    InsufficientBalance(String),
    #[error("Invalid callback signature: {0}")]
    SignatureInvalid(String),
    #[error("Malformed callback payload: {0}")]
    Malformed(String),
    /// The adapter does not implement this capability.
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl From<GatewayError> for ServiceError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Unavailable(msg) => ServiceError::ProviderUnavailable(msg),
            GatewayError::Rejected { code, message } => {
                ServiceError::ProviderRejected { code, message }
            }
            GatewayError::Timeout(msg) => ServiceError::ProviderTimeout(msg),
            GatewayError::RefundWindowExpired(message) => ServiceError::ProviderRejected {
                code: "refund_window_expired".to_string(),
                message,
            },
            GatewayError::InsufficientBalance(message) => ServiceError::ProviderRejected {
                code: "insufficient_balance".to_string(),
                message,
            },
            GatewayError::SignatureInvalid(msg) => ServiceError::SignatureInvalid(msg),
            GatewayError::Malformed(msg) => ServiceError::MalformedCallback(msg),
            GatewayError::Unsupported(msg) => ServiceError::InvalidOperation(msg),
        }
    }
}

/// Request to open a payment intent with a provider.
#[derive(Debug, Clone)]
pub struct InitiateRequest {
    pub payment_id: Uuid,
    pub order: OrderRef,
    pub amount: Decimal,
    pub currency: String,
    pub kind: PaymentKind,
    pub return_url: String,
}

/// Provider-side handle for a freshly opened intent.
#[derive(Debug, Clone)]
pub struct InitiateReceipt {
    pub provider_transaction_id: String,
    /// Checkout page the payer is redirected to, when the provider has one.
    pub redirect_url: Option<String>,
}

/// Request to return funds against a settled intent.
#[derive(Debug, Clone)]
pub struct RefundRequest {
    pub payment_id: Uuid,
    pub provider_transaction_id: String,
    pub amount: Decimal,
    pub currency: String,
    /// 1-based ordinal of this refund against the payment. The internal
    /// adapter derives deterministic refund ids from it.
    pub sequence: u32,
    pub reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RefundReceipt {
    pub provider_refund_id: String,
}

/// What a provider callback reports, normalized across providers.
#[derive(Debug, Clone, PartialEq)]
pub enum CallbackOutcome {
    /// Intent registered on the provider side; money has not moved.
    Acknowledged,
    /// Funds captured. Providers may omit the settled amount.
    Succeeded { amount: Option<Decimal> },
    Failed {
        error_code: String,
        error_message: Option<String>,
    },
    /// A refund settled on the provider side.
    Refunded {
        amount: Decimal,
        provider_refund_id: String,
    },
    /// Recognized envelope, event type we do not act on.
    Ignored { event: String },
}

/// A verified, decoded provider callback.
#[derive(Debug, Clone)]
pub struct ParsedCallback {
    pub provider_transaction_id: String,
    /// Order reference echoed back by the provider. Used to locate payments
    /// whose remote id was never bound.
    pub order_ref: Option<OrderRef>,
    pub outcome: CallbackOutcome,
}

/// Lookup key for a provider status query. Carries the remote id when we
/// have one, and the order reference for intents that timed out before the
/// id was bound.
#[derive(Debug, Clone, Default)]
pub struct StatusProbe {
    pub provider_transaction_id: Option<String>,
    pub order_ref: Option<OrderRef>,
}

impl StatusProbe {
    pub fn by_transaction(provider_transaction_id: impl Into<String>) -> Self {
        Self {
            provider_transaction_id: Some(provider_transaction_id.into()),
            order_ref: None,
        }
    }

    pub fn by_order(order_ref: OrderRef) -> Self {
        Self {
            provider_transaction_id: None,
            order_ref: Some(order_ref),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRefund {
    pub provider_refund_id: String,
    pub amount: Decimal,
}

/// Authoritative intent state as reported by a provider status query.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteStatus {
    Pending,
    Paid { amount: Option<Decimal> },
    Failed { error_code: String },
    /// Paid, with one or more refunds settled against it.
    Refunded { refunds: Vec<RemoteRefund> },
}

/// A remote intent resolved by a status query. Carries the provider's
/// transaction id so callers can bind it when it was never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteIntent {
    pub provider_transaction_id: String,
    pub status: RemoteStatus,
}

/// Adapter contract every payment provider integration implements.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn provider(&self) -> PaymentProvider;

    /// Open an intent with the provider and obtain its transaction id.
    async fn initiate(&self, request: InitiateRequest) -> Result<InitiateReceipt, GatewayError>;

    /// Verify a callback's signature and decode its payload. Synchronous:
    /// adapters must not call out while holding raw webhook bytes.
    fn parse_callback(&self, headers: &HeaderMap, body: &[u8])
        -> Result<ParsedCallback, GatewayError>;

    /// Ask the provider to return funds.
    async fn refund(&self, request: RefundRequest) -> Result<RefundReceipt, GatewayError>;

    /// Query the provider for the authoritative state of an intent.
    /// `Ok(None)` means the provider has no record matching the probe.
    async fn query_status(
        &self,
        probe: &StatusProbe,
    ) -> Result<Option<RemoteIntent>, GatewayError>;
}

/// Lookup table from provider to adapter, built once at startup.
#[derive(Clone, Default)]
pub struct GatewayRegistry {
    gateways: HashMap<PaymentProvider, Arc<dyn PaymentGateway>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, gateway: Arc<dyn PaymentGateway>) {
        self.gateways.insert(gateway.provider(), gateway);
    }

    pub fn get(&self, provider: PaymentProvider) -> Result<Arc<dyn PaymentGateway>, ServiceError> {
        self.gateways.get(&provider).cloned().ok_or_else(|| {
            ServiceError::InvalidOperation(format!(
                "no gateway registered for provider {}",
                provider
            ))
        })
    }

    /// Adapter for a stored provider column. Payments with no provider
    /// (cash on delivery) route to the internal bookkeeping rail.
    pub fn for_payment(
        &self,
        provider: Option<PaymentProvider>,
    ) -> Result<Arc<dyn PaymentGateway>, ServiceError> {
        self.get(provider.unwrap_or(PaymentProvider::Internal))
    }

    /// Build the registry from configuration.
    pub fn from_config(config: &AppConfig) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(internal::InternalGateway::new()));
        if config.swiftpay.enabled {
            registry.register(Arc::new(swiftpay::SwiftPayGateway::new(
                config.swiftpay.clone(),
            )));
        }
        registry
    }
}

impl std::fmt::Debug for dyn PaymentGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentGateway")
            .field("provider", &self.provider())
            .finish()
    }
}

impl std::fmt::Debug for GatewayRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayRegistry")
            .field("providers", &self.gateways.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    struct NullGateway;

    #[async_trait]
    impl PaymentGateway for NullGateway {
        fn provider(&self) -> PaymentProvider {
            PaymentProvider::SwiftPay
        }

        async fn initiate(
            &self,
            _request: InitiateRequest,
        ) -> Result<InitiateReceipt, GatewayError> {
            Ok(InitiateReceipt {
                provider_transaction_id: "sp_null".to_string(),
                redirect_url: None,
            })
        }

        fn parse_callback(
            &self,
            _headers: &HeaderMap,
            _body: &[u8],
        ) -> Result<ParsedCallback, GatewayError> {
            Err(GatewayError::Malformed("null gateway".to_string()))
        }

        async fn refund(&self, _request: RefundRequest) -> Result<RefundReceipt, GatewayError> {
            Ok(RefundReceipt {
                provider_refund_id: "spr_null".to_string(),
            })
        }

        async fn query_status(
            &self,
            _probe: &StatusProbe,
        ) -> Result<Option<RemoteIntent>, GatewayError> {
            Ok(None)
        }
    }

    #[test]
    fn registry_resolves_registered_provider() {
        let mut registry = GatewayRegistry::new();
        registry.register(Arc::new(NullGateway));

        assert!(registry.get(PaymentProvider::SwiftPay).is_ok());
    }

    #[test]
    fn empty_registry_rejects_lookup() {
        let registry = GatewayRegistry::new();
        let err = registry.get(PaymentProvider::SwiftPay).unwrap_err();
        assert_eq!(err.status_code(), http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn payments_without_provider_route_to_internal_rail() {
        let mut registry = GatewayRegistry::new();
        registry.register(Arc::new(internal::InternalGateway::new()));

        let gateway = registry.for_payment(None).unwrap();
        assert_eq!(gateway.provider(), PaymentProvider::Internal);
    }

    #[test]
    fn gateway_errors_map_to_service_statuses() {
        let cases: Vec<(GatewayError, http::StatusCode)> = vec![
            (
                GatewayError::Unavailable("down".into()),
                http::StatusCode::BAD_GATEWAY,
            ),
            (
                GatewayError::Rejected {
                    code: "card_declined".into(),
                    message: "declined".into(),
                },
                http::StatusCode::PAYMENT_REQUIRED,
            ),
            (
                GatewayError::Timeout("slow".into()),
                http::StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                GatewayError::RefundWindowExpired("too old".into()),
                http::StatusCode::PAYMENT_REQUIRED,
            ),
            (
                GatewayError::InsufficientBalance("no funds".into()),
                http::StatusCode::PAYMENT_REQUIRED,
            ),
            (
                GatewayError::SignatureInvalid("bad mac".into()),
                http::StatusCode::UNAUTHORIZED,
            ),
            (
                GatewayError::Malformed("not json".into()),
                http::StatusCode::BAD_REQUEST,
            ),
            (
                GatewayError::Unsupported("no callbacks".into()),
                http::StatusCode::BAD_REQUEST,
            ),
        ];

        for (err, expected) in cases {
            let service_err: ServiceError = err.into();
            assert_eq!(service_err.status_code(), expected);
        }
    }

    #[test]
    fn callback_outcomes_compare_by_payload() {
        let a = CallbackOutcome::Succeeded {
            amount: Some(dec!(10)),
        };
        let b = CallbackOutcome::Succeeded {
            amount: Some(dec!(10)),
        };
        assert_eq!(a, b);
    }
}
