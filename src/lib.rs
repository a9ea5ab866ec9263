pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod openapi;
pub mod services;

use axum::{
    extract::State,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::handlers::AppServices;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DbPool>,
    pub config: Arc<AppConfig>,
    pub event_sender: EventSender,
    pub services: AppServices,
}

/// Generic success envelope for endpoints without a bespoke response shape.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StatusResponse {
    pub service: String,
    pub version: String,
    pub status: String,
}

#[utoipa::path(
    get,
    path = "/api/v1/status",
    responses((status = 200, description = "Service status", body = StatusResponse)),
    tag = "system"
)]
async fn api_status() -> impl IntoResponse {
    Json(StatusResponse {
        service: "golclub-api".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        status: "ok".to_string(),
    })
}

#[utoipa::path(
    get,
    path = "/api/v1/health",
    responses(
        (status = 200, description = "Database reachable"),
        (status = 503, description = "Database unreachable"),
    ),
    tag = "system"
)]
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    match db::check_connection(&state.db).await {
        Ok(()) => (
            axum::http::StatusCode::OK,
            Json(serde_json::json!({"status": "healthy"})),
        ),
        Err(e) => {
            tracing::error!("Health check failed: {}", e);
            (
                axum::http::StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({"status": "unhealthy"})),
            )
        }
    }
}

pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .route("/status", get(api_status))
        .route("/health", get(health_check))
        .route("/checkout", post(handlers::checkout::process_checkout))
        .route("/orders", get(handlers::orders::list_orders))
        .route("/orders/:id", get(handlers::orders::get_order))
        .route(
            "/products",
            get(handlers::products::list_products).post(handlers::products::create_product),
        )
        .route("/products/:id", get(handlers::products::get_product))
        .route(
            "/payments/webhook",
            post(handlers::payment_webhooks::payment_webhook),
        )
}

/// Full application router: versioned API plus the Swagger UI.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", api_v1_routes())
        .merge(openapi::swagger_ui())
        .with_state(state)
}
