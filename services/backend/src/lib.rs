// Library interface for backend - exposes modules for the processor and tests

pub mod config;
pub mod domain;
pub mod errors;
pub mod extractors;
pub mod fanout;
pub mod handlers;
pub mod ledger;
pub mod repository;
pub mod services;
pub mod state;

use axum::{
    routing::{get, post},
    Router,
};
use state::AppState;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health::health_check))
        .route("/health/detailed", get(handlers::health::detailed_health))
        // Aggregator
        .route("/api/provider/transactions", post(handlers::provider::process_transaction))
        .route(
            "/api/provider/transactions/batch",
            post(handlers::provider::process_wager_batch),
        )
        .route("/api/provider/accounts", post(handlers::provider::create_account))
        .route(
            "/api/provider/accounts/:account_id/balance",
            get(handlers::provider::get_balance),
        )
        // Player
        .route("/api/balance", get(handlers::balance::get_balance))
        .route("/api/cashback/summary", get(handlers::cashback::summary))
        .route("/api/cashback/earnings", get(handlers::cashback::earnings))
        .route("/api/cashback/claim", post(handlers::cashback::claim))
        // Retry administration
        .route("/api/admin/operations", get(handlers::admin::list_operations))
        .route(
            "/api/admin/operations/:operation_id/replay",
            post(handlers::admin::replay_operation),
        )
        .route(
            "/api/admin/cashback/rate-override",
            get(handlers::admin::get_rate_override).put(handlers::admin::update_rate_override),
        )
        // Real-time channel
        .route("/ws", get(handlers::ws::ws_handler))
        // State
        .with_state(state)
        // Middleware
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
}
