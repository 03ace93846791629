//! scopedb server library logic.

pub mod api;
pub mod api_users;
pub mod config;
pub mod models;

use axum::{
    extract::DefaultBodyLimit,
    routing::get,
    Extension, Json, Router,
};
use scopedb_session::Application;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Settings (including the session factory) and the worker pool.
    pub application: Arc<Application>,
}

/// Maximum request body size (64 KiB).
const MAX_REQUEST_BODY_BYTES: usize = 64 * 1024;

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/users",
            get(api_users::list_users_handler).post(api_users::create_user_handler),
        )
        .route("/api/users/count", get(api_users::count_users_handler))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(Arc::new(state)))
}
