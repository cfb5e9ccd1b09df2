//! HTTP surface: contact endpoint, health, security status, middleware.

pub mod contact;
pub mod middleware;

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::config::GuardConfig;
use crate::defense::DefensePipeline;
use crate::notify::Notifier;
use crate::store::GuardStore;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<DefensePipeline>,
    pub store: Arc<dyn GuardStore>,
    pub notifier: Arc<dyn Notifier>,
    pub config: Arc<GuardConfig>,
    pub log_requests: bool,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/contact", post(contact::submit_contact))
        .route("/api/security", get(contact::security_status))
        .route("/health", get(contact::health))
        .layer(axum::middleware::from_fn(
            middleware::security_headers_middleware,
        ))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::logging_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
