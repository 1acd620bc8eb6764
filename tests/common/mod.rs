use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request},
    Router,
};
use carepay_api::{
    config::AppConfig,
    db,
    entities::payment,
    events::{self, EventSender},
    gateway::{swiftpay::SwiftPayGateway, GatewayRegistry},
    AppState,
};
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::{sea_query::Expr, ColumnTrait, EntityTrait, QueryFilter};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

/// Webhook secret shared between the test configuration and the signature
/// helpers below.
pub const WEBHOOK_SECRET: &str = "whsec_test_secret";

/// Helper harness: application state backed by an in-memory SQLite database,
/// with the online provider stubbed by a local wiremock server.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub provider: MockServer,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        let provider = MockServer::start().await;

        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.auto_migrate = true;
        // A pool larger than one would hand each connection its own
        // in-memory database.
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.swiftpay.enabled = true;
        cfg.swiftpay.base_url = provider.uri();
        cfg.swiftpay.api_key = "sk_test".to_string();
        cfg.swiftpay.webhook_secret = WEBHOOK_SECRET.to_string();
        cfg.swiftpay.timeout_secs = 2;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let config = Arc::new(cfg);
        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = Arc::new(EventSender::new(event_tx));
        let event_task = tokio::spawn(events::process_events(event_rx));

        let gateways = GatewayRegistry::from_config(&config);
        let state = AppState::build(db_arc, config, event_sender, gateways);

        let router = Router::new()
            .nest("/api/v1", carepay_api::api_v1_routes())
            .with_state(state.clone());

        Self {
            router,
            state,
            provider,
            _event_task: event_task,
        }
    }

    /// Send a JSON request against the router.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Deliver a provider callback with a valid HMAC signature over the body.
    pub async fn post_signed_callback(
        &self,
        provider: &str,
        payload: &Value,
    ) -> axum::response::Response {
        let body = serde_json::to_vec(payload).expect("failed to serialize callback payload");
        let timestamp = Utc::now().timestamp().to_string();
        let signature = SwiftPayGateway::sign_payload(WEBHOOK_SECRET, &timestamp, &body);
        self.post_callback_raw(provider, body, &timestamp, &signature)
            .await
    }

    /// Deliver a provider callback with explicit timestamp and signature
    /// headers, valid or not.
    pub async fn post_callback_raw(
        &self,
        provider: &str,
        body: Vec<u8>,
        timestamp: &str,
        signature: &str,
    ) -> axum::response::Response {
        let request = Request::builder()
            .method(Method::POST)
            .uri(format!("/api/v1/payments/callbacks/{}", provider))
            .header("content-type", "application/json")
            .header("x-timestamp", timestamp)
            .header("x-signature", signature)
            .body(Body::from(body))
            .expect("failed to build callback request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Open an online payment through the API with the provider stubbed to
    /// accept the intent under the given transaction id. Returns the payment
    /// id and the creation response body.
    pub async fn seed_online_payment(
        &self,
        transaction_id: &str,
        amount: &str,
        order_id: Uuid,
    ) -> (Uuid, Value) {
        let guard = Mock::given(method("POST"))
            .and(path("/payments"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "transaction_id": transaction_id,
                "checkout_url": format!("https://pay.swiftpay.example/c/{}", transaction_id),
            })))
            .expect(1)
            .mount_as_scoped(&self.provider)
            .await;

        let response = self
            .request(
                Method::POST,
                "/api/v1/payments",
                Some(json!({
                    "payer_id": Uuid::new_v4(),
                    "order_type": "PharmacyOrder",
                    "order_id": order_id,
                    "amount": amount,
                    "method": "Online",
                    "kind": "Card"
                })),
            )
            .await;
        drop(guard);

        assert_eq!(response.status(), 201, "online initiation should persist");
        let body = read_json(response).await;
        let payment_id = body["data"]["id"]
            .as_str()
            .and_then(|s| Uuid::parse_str(s).ok())
            .expect("payment id in creation response");
        (payment_id, body)
    }

    /// Open a cash-on-delivery payment through the API.
    pub async fn seed_cod_payment(&self, amount: &str, order_id: Uuid) -> Uuid {
        let response = self
            .request(
                Method::POST,
                "/api/v1/payments",
                Some(json!({
                    "payer_id": Uuid::new_v4(),
                    "order_type": "PharmacyOrder",
                    "order_id": order_id,
                    "amount": amount,
                    "method": "CashOnDelivery"
                })),
            )
            .await;
        assert_eq!(response.status(), 201, "cod initiation should persist");
        let body = read_json(response).await;
        body["data"]["id"]
            .as_str()
            .and_then(|s| Uuid::parse_str(s).ok())
            .expect("payment id in creation response")
    }

    /// Stub the provider's refund endpoint for one refund against the given
    /// transaction. The guard unmounts the stub when dropped.
    pub async fn stub_refund(
        &self,
        transaction_id: &str,
        refund_id: &str,
    ) -> wiremock::MockGuard {
        Mock::given(method("POST"))
            .and(path(format!("/payments/{}/refunds", transaction_id)))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "refund_id": refund_id })),
            )
            .expect(1)
            .mount_as_scoped(&self.provider)
            .await
    }

    /// Backdate a payment so the sweep treats it as stale.
    pub async fn age_payment(&self, payment_id: Uuid, minutes: i64) {
        payment::Entity::update_many()
            .filter(payment::Column::Id.eq(payment_id))
            .col_expr(
                payment::Column::CreatedAt,
                Expr::value(Utc::now() - Duration::minutes(minutes)),
            )
            .exec(self.state.db.as_ref())
            .await
            .expect("failed to backdate payment");
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

/// Decode a response body as JSON.
pub async fn read_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

/// Parse a decimal field that may serialize as a string or a bare number.
pub fn decimal_field(value: &Value) -> Decimal {
    match value {
        Value::String(s) => s.parse().expect("decimal string"),
        Value::Number(n) => n.to_string().parse().expect("decimal number"),
        other => panic!("not a decimal value: {}", other),
    }
}
