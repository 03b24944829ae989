//! Axum router construction.
//!
//! [`build`] assembles the complete application router, including:
//! - Middleware layers (CORS, per-request trace-ID injection)
//! - Optional OpenAPI document endpoint (disable with `OMNI_ENABLE_DOCS=false`)
//! - Health / heartbeat route
//! - Chat turn and history routes under `/api`

mod api;
pub mod doc;
mod health;

use std::sync::Arc;

use axum::routing::get;
use axum::{middleware, Router};
use tower::ServiceBuilder;

use crate::middleware::{cors, trace};
use crate::state::AppState;

// ── Router builder ────────────────────────────────────────────────────────────

/// Build the complete Axum [`Router`] for the application.
pub fn build(state: Arc<AppState>) -> Router {
    let api_router = Router::new()
        .merge(health::router())
        .merge(api::router());

    let mut app = Router::new().nest("/api", api_router);

    if state.config.enable_docs {
        app = app.route("/api-docs/openapi.json", get(doc::get_openapi));
    }

    app
        // Outermost layers execute first on the way in.
        .layer(ServiceBuilder::new().layer(cors::cors_layer(&state.config)))
        .layer(middleware::from_fn(trace::trace_middleware))
        .with_state(state)
}
