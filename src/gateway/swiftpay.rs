use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use http::HeaderMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

use super::{
    CallbackOutcome, GatewayError, InitiateReceipt, InitiateRequest, ParsedCallback,
    PaymentGateway, RefundReceipt, RefundRequest, RemoteIntent, RemoteRefund, RemoteStatus,
    StatusProbe,
};
use crate::config::SwiftPayConfig;
use crate::models::{OrderRef, OrderType, PaymentKind, PaymentProvider};

type HmacSha256 = Hmac<Sha256>;

/// Adapter for the SwiftPay card and mobile-wallet gateway.
///
/// Callbacks are authenticated with an HMAC-SHA256 over
/// `"{x-timestamp}.{body}"`, hex-encoded in the `x-signature` header.
pub struct SwiftPayGateway {
    config: SwiftPayConfig,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct CreateIntentBody<'a> {
    reference: Uuid,
    amount: Decimal,
    currency: &'a str,
    kind: &'a str,
    order_type: String,
    order_id: Uuid,
    return_url: &'a str,
}

#[derive(Debug, Deserialize)]
struct IntentCreated {
    transaction_id: String,
    checkout_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error_code: String,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Serialize)]
struct RefundBody<'a> {
    amount: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct RefundCreated {
    refund_id: String,
}

#[derive(Debug, Deserialize)]
struct IntentStatus {
    transaction_id: String,
    status: String,
    #[serde(default)]
    amount: Option<Decimal>,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    refunds: Vec<RefundEntry>,
}

#[derive(Debug, Deserialize)]
struct RefundEntry {
    refund_id: String,
    amount: Decimal,
}

#[derive(Debug, Deserialize)]
struct CallbackEnvelope {
    event: String,
    transaction_id: String,
    #[serde(default)]
    order_type: Option<String>,
    #[serde(default)]
    order_id: Option<Uuid>,
    #[serde(default)]
    amount: Option<Decimal>,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    refund_id: Option<String>,
}

impl SwiftPayGateway {
    pub fn new(config: SwiftPayConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap();

        Self { config, client }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn map_transport_error(err: reqwest::Error) -> GatewayError {
        if err.is_timeout() {
            GatewayError::Timeout(err.to_string())
        } else {
            GatewayError::Unavailable(err.to_string())
        }
    }

    /// 4xx responses carry a structured rejection we surface verbatim.
    async fn decode_rejection(response: reqwest::Response) -> GatewayError {
        let status = response.status();
        match response.json::<ApiError>().await {
            Ok(api) => {
                let message = api.message.unwrap_or_default();
                match api.error_code.as_str() {
                    "refund_window_expired" => GatewayError::RefundWindowExpired(message),
                    "insufficient_balance" => GatewayError::InsufficientBalance(message),
                    _ => GatewayError::Rejected {
                        code: api.error_code,
                        message,
                    },
                }
            }
            Err(_) => GatewayError::Unavailable(format!("provider returned {}", status)),
        }
    }

    /// HMAC over `"{timestamp}.{body}"`, hex-encoded.
    pub fn sign_payload(secret: &str, timestamp: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    fn kind_label(kind: PaymentKind) -> &'static str {
        match kind {
            PaymentKind::Card => "card",
            PaymentKind::Wallet => "wallet",
        }
    }
}

#[async_trait]
impl PaymentGateway for SwiftPayGateway {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::SwiftPay
    }

    #[instrument(skip(self, request), fields(payment_id = %request.payment_id))]
    async fn initiate(&self, request: InitiateRequest) -> Result<InitiateReceipt, GatewayError> {
        let body = CreateIntentBody {
            reference: request.payment_id,
            amount: request.amount,
            currency: &request.currency,
            kind: Self::kind_label(request.kind),
            order_type: request.order.order_type.to_string(),
            order_id: request.order.order_id,
            return_url: &request.return_url,
        };

        let response = self
            .client
            .post(self.endpoint("payments"))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        let status = response.status();
        if status.is_success() {
            let created: IntentCreated = response
                .json()
                .await
                .map_err(|e| GatewayError::Unavailable(format!("invalid provider response: {}", e)))?;

            info!(
                transaction_id = %created.transaction_id,
                "SwiftPay intent created"
            );

            Ok(InitiateReceipt {
                provider_transaction_id: created.transaction_id,
                redirect_url: created.checkout_url,
            })
        } else if status.is_client_error() {
            Err(Self::decode_rejection(response).await)
        } else {
            Err(GatewayError::Unavailable(format!(
                "provider returned {}",
                status
            )))
        }
    }

    fn parse_callback(
        &self,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<ParsedCallback, GatewayError> {
        let timestamp = headers
            .get("x-timestamp")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| GatewayError::SignatureInvalid("missing x-timestamp header".into()))?;
        let signature = headers
            .get("x-signature")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| GatewayError::SignatureInvalid("missing x-signature header".into()))?;

        let ts: i64 = timestamp
            .parse()
            .map_err(|_| GatewayError::SignatureInvalid("invalid x-timestamp header".into()))?;
        let now = Utc::now().timestamp();
        if (now - ts).abs() > self.config.signature_tolerance_secs {
            return Err(GatewayError::SignatureInvalid(
                "timestamp outside tolerance".into(),
            ));
        }

        let expected = Self::sign_payload(&self.config.webhook_secret, timestamp, body);
        if !constant_time_eq(&expected, signature) {
            return Err(GatewayError::SignatureInvalid("signature mismatch".into()));
        }

        let envelope: CallbackEnvelope = serde_json::from_slice(body)
            .map_err(|e| GatewayError::Malformed(format!("invalid json: {}", e)))?;

        let outcome = match envelope.event.as_str() {
            "payment.acknowledged" => CallbackOutcome::Acknowledged,
            "payment.succeeded" => CallbackOutcome::Succeeded {
                amount: envelope.amount,
            },
            "payment.failed" => CallbackOutcome::Failed {
                error_code: envelope
                    .error_code
                    .unwrap_or_else(|| "provider_failure".to_string()),
                error_message: envelope.error_message,
            },
            "refund.succeeded" => {
                let provider_refund_id = envelope.refund_id.ok_or_else(|| {
                    GatewayError::Malformed("refund.succeeded without refund_id".into())
                })?;
                let amount = envelope.amount.ok_or_else(|| {
                    GatewayError::Malformed("refund.succeeded without amount".into())
                })?;
                CallbackOutcome::Refunded {
                    amount,
                    provider_refund_id,
                }
            }
            other => CallbackOutcome::Ignored {
                event: other.to_string(),
            },
        };

        // Order echo is best-effort; an unparseable order_type only drops
        // the fallback lookup key, not the callback.
        let order_ref = match (envelope.order_type.as_deref(), envelope.order_id) {
            (Some(order_type), Some(order_id)) => order_type
                .parse::<OrderType>()
                .ok()
                .map(|t| OrderRef::new(t, order_id)),
            _ => None,
        };

        Ok(ParsedCallback {
            provider_transaction_id: envelope.transaction_id,
            order_ref,
            outcome,
        })
    }

    #[instrument(skip(self, request), fields(payment_id = %request.payment_id))]
    async fn refund(&self, request: RefundRequest) -> Result<RefundReceipt, GatewayError> {
        let body = RefundBody {
            amount: request.amount,
            reason: request.reason.as_deref(),
        };

        let response = self
            .client
            .post(self.endpoint(&format!(
                "payments/{}/refunds",
                request.provider_transaction_id
            )))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        let status = response.status();
        if status.is_success() {
            let created: RefundCreated = response
                .json()
                .await
                .map_err(|e| GatewayError::Unavailable(format!("invalid provider response: {}", e)))?;

            Ok(RefundReceipt {
                provider_refund_id: created.refund_id,
            })
        } else if status.is_client_error() {
            Err(Self::decode_rejection(response).await)
        } else {
            Err(GatewayError::Unavailable(format!(
                "provider returned {}",
                status
            )))
        }
    }

    #[instrument(skip(self, probe))]
    async fn query_status(
        &self,
        probe: &StatusProbe,
    ) -> Result<Option<RemoteIntent>, GatewayError> {
        let request = if let Some(transaction_id) = &probe.provider_transaction_id {
            self.client
                .get(self.endpoint(&format!("payments/{}", transaction_id)))
        } else if let Some(order) = &probe.order_ref {
            self.client.get(self.endpoint("payments/lookup")).query(&[
                ("order_type", order.order_type.to_string()),
                ("order_id", order.order_id.to_string()),
            ])
        } else {
            return Err(GatewayError::Unsupported(
                "status probe carries no lookup key".to_string(),
            ));
        };

        let response = request
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(GatewayError::Unavailable(format!(
                "provider returned {}",
                status
            )));
        }

        let intent: IntentStatus = response
            .json()
            .await
            .map_err(|e| GatewayError::Unavailable(format!("invalid provider response: {}", e)))?;

        let remote = match intent.status.as_str() {
            "created" | "processing" => RemoteStatus::Pending,
            "paid" => RemoteStatus::Paid {
                amount: intent.amount,
            },
            "failed" => RemoteStatus::Failed {
                error_code: intent
                    .error_code
                    .unwrap_or_else(|| "provider_failure".to_string()),
            },
            "refunded" | "partially_refunded" => RemoteStatus::Refunded {
                refunds: intent
                    .refunds
                    .into_iter()
                    .map(|r| RemoteRefund {
                        provider_refund_id: r.refund_id,
                        amount: r.amount,
                    })
                    .collect(),
            },
            other => {
                return Err(GatewayError::Malformed(format!(
                    "unrecognized intent status: {}",
                    other
                )))
            }
        };

        Ok(Some(RemoteIntent {
            provider_transaction_id: intent.transaction_id,
            status: remote,
        }))
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}
