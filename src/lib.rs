use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

pub mod allowlist;
pub mod config;
pub mod dtos;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod idempotency;
pub mod models;
pub mod schema;
pub mod signature;
pub mod store;
pub mod webhook;

use config::Config;
use gateway::PaymentGateway;
use store::Store;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub gateway: Arc<dyn PaymentGateway>,
    pub config: Arc<Config>,
}

pub fn app(state: AppState) -> Router {
    let guarded = Router::new()
        .route("/payments", post(handlers::create_payment))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            idempotency::idempotency_guard,
        ));

    Router::new()
        .route("/healthz", get(handlers::health))
        .route("/payments/:id", get(handlers::get_payment))
        .route("/webhooks/yookassa", post(webhook::handle_webhook))
        .merge(guarded)
        .with_state(state)
}
