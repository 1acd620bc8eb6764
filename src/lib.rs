//! CarePay API Library
//!
//! Payment lifecycle and reconciliation engine for the CarePay marketplace.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod gateway;
pub mod handlers;
pub mod metrics;
pub mod migrator;
pub mod models;
pub mod observability;
pub mod openapi;
pub mod services;

use axum::{extract::State, response::Json, routing::get, Router};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use utoipa::ToSchema;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<config::AppConfig>,
    pub event_sender: Arc<events::EventSender>,
    pub payments: services::payments::PaymentService,
    pub refunds: services::refunds::RefundProcessor,
    pub reconciliation: services::reconciliation::ReconciliationService,
}

impl AppState {
    /// Wire the service graph from its shared resources. All services share
    /// one ledger so every durable transition takes the same write path.
    pub fn build(
        db: Arc<DatabaseConnection>,
        config: Arc<config::AppConfig>,
        event_sender: Arc<events::EventSender>,
        gateways: gateway::GatewayRegistry,
    ) -> Self {
        let ledger = services::ledger::PaymentLedger::new(db.clone(), event_sender.clone());
        let payments = services::payments::PaymentService::new(
            db.clone(),
            ledger.clone(),
            gateways.clone(),
            event_sender.clone(),
            config.clone(),
        );
        let refunds =
            services::refunds::RefundProcessor::new(db.clone(), ledger.clone(), gateways.clone());
        let reconciliation = services::reconciliation::ReconciliationService::new(
            db.clone(),
            ledger,
            gateways,
            config.clone(),
        );

        Self {
            db,
            config,
            event_sender,
            payments,
            refunds,
            reconciliation,
        }
    }
}

// Common response wrappers
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: observability::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub total_pages: u64,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn validation_errors(errors: Vec<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some("Validation failed".to_string()),
            errors: Some(errors),
            meta: Some(ResponseMeta::capture()),
        }
    }
}


/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

/// The v1 API surface: payment lifecycle, provider callbacks, status.
pub fn api_v1_routes() -> Router<AppState> {
    // Callback intake stays outside the payments nest; the webhook
    // signature is its authentication.
    let callbacks = handlers::callbacks::callback_routes();

    Router::new()
        .route("/status", get(api_status))
        .route("/health", get(health_check))
        .nest("/payments", handlers::payments::payment_routes())
        .merge(callbacks)
}

async fn api_status() -> Result<Json<ApiResponse<Value>>, errors::ServiceError> {
    let version = env!("CARGO_PKG_VERSION");
    let git = option_env!("GIT_HASH").unwrap_or("unknown");
    let status_data = json!({
        "status": "ok",
        "version": version,
        "git": git,
        "service": "carepay-api",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "environment": std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
    });

    Ok(Json(ApiResponse::success(status_data)))
}

async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Value>>, errors::ServiceError> {
    let db_status = match state.db.ping().await {
        Ok(_) => "healthy",
        Err(_) => "unhealthy",
    };

    let health_data = json!({
        "status": db_status,
        "checks": {
            "database": db_status,
        },
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });

    Ok(Json(ApiResponse::success(health_data)))
}

pub mod prelude {
    pub use crate::db::*;
    pub use crate::errors::*;
    pub use crate::events::*;
    pub use crate::metrics::*;
    pub use crate::observability::*;
    pub use crate::openapi::*;
}
