//! Order settlement pipeline
//!
//! Cart pricing, payment intents, purchase finalization, ERP settlement,
//! cancellation with refunds, and fulfillment callbacks.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod environment;
pub mod erp;
pub mod errors;
pub mod handlers;
pub mod identity;
pub mod metrics;
pub mod migrator;
pub mod notifications;
pub mod payments;
pub mod repositories;
pub mod request_context;
pub mod services;
pub mod settlement;

use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post, put},
    Router,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::{config::AppConfig, environment::Environment, request_context::RequestSpanMaker};

#[derive(Clone)]
pub struct AppState {
    pub env: Arc<Environment>,
    pub config: Arc<AppConfig>,
    /// Present when the repository is database-backed; used by the health check.
    pub db: Option<Arc<DatabaseConnection>>,
}

impl AppState {
    pub fn new(env: Environment, config: AppConfig) -> Self {
        Self {
            env: Arc::new(env),
            config: Arc::new(config),
            db: None,
        }
    }

    pub fn with_database(mut self, db: Arc<DatabaseConnection>) -> Self {
        self.db = Some(db);
        self
    }
}

// Common response wrappers
#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: request_context::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
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

pub fn api_v1_routes() -> Router<AppState> {
    let cart = Router::new()
        .route("/cart", get(handlers::cart::list_cart))
        .route("/cart/items", post(handlers::cart::add_item))
        .route(
            "/cart/items/:line_key",
            put(handlers::cart::update_item).delete(handlers::cart::remove_item),
        );

    let checkout = Router::new()
        .route("/checkout/intents", post(handlers::checkout::create_intent))
        .route(
            "/checkout/intents/:intent_id",
            put(handlers::checkout::update_intent),
        )
        .route(
            "/checkout/intents/:intent_id/finalize",
            post(handlers::checkout::finalize_intent),
        );

    let purchases = Router::new()
        .route(
            "/purchases/:purchase_key",
            get(handlers::purchases::get_purchase),
        )
        .route(
            "/purchases/:purchase_key/cancel",
            post(handlers::purchases::cancel_purchase),
        );

    let fulfillment = Router::new().route(
        "/fulfillment/callback",
        post(handlers::fulfillment::shipment_callback),
    );

    Router::new()
        .merge(cart)
        .merge(checkout)
        .merge(purchases)
        .merge(fulfillment)
        .route("/status", get(api_status))
}

/// Full application router: health, metrics, and the v1 API with request-id tracing.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .nest("/api/v1", api_v1_routes())
        .layer(TraceLayer::new_for_http().make_span_with(RequestSpanMaker))
        .layer(axum::middleware::from_fn(
            request_context::request_id_middleware,
        ))
        .with_state(state)
}

async fn api_status(State(state): State<AppState>) -> ApiResult<Value> {
    Ok(Json(ApiResponse::success(json!({
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "stage": state.env.policy.stage.to_string(),
        "currency": state.env.policy.currency,
    }))))
}

async fn health_check(State(state): State<AppState>) -> ApiResult<Value> {
    let db_status = match &state.db {
        Some(db) => match db.ping().await {
            Ok(_) => "healthy",
            Err(_) => "unhealthy",
        },
        None => "not_configured",
    };

    Ok(Json(ApiResponse::success(json!({
        "status": if db_status == "unhealthy" { "unhealthy" } else { "healthy" },
        "database": db_status,
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now().to_rfc3339(),
    }))))
}

async fn metrics_handler() -> (StatusCode, String) {
    (StatusCode::OK, metrics::render())
}
