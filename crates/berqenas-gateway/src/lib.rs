//! Berqenas HTTP/JSON Gateway.
//!
//! Exposes the migration engine over REST: registration, listing, batch and
//! single runs, rollback, re-queue, crash recovery and the attempt ledger.

pub mod config;
pub mod error;
pub mod json;
pub mod routes;

pub use config::{Args, GatewayConfig};
pub use error::AppError;

use std::sync::Arc;

use axum::Router;
use berqenas_core::MigrationEngine;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    /// Migration engine.
    pub engine: Arc<MigrationEngine>,
    /// Gateway configuration.
    pub config: GatewayConfig,
}

impl AppState {
    /// Create new application state.
    pub fn new(engine: MigrationEngine, config: GatewayConfig) -> Self {
        Self {
            engine: Arc::new(engine),
            config,
        }
    }
}

/// Create the router with all routes.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(routes::health::routes())
        .merge(routes::migrations::routes())
        .merge(routes::databases::routes())
        .merge(routes::history::routes())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}
