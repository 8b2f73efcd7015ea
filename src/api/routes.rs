use crate::api::handlers;
use crate::api::health::{self, HealthRegistry};
use crate::api::middleware::{in_flight_middleware, request_id_middleware, InFlightGate};
use crate::cache::ResultCache;
use crate::search::Orchestrator;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::get,
    Router,
};
use std::sync::Arc;
use tower_http::{catch_panic::CatchPanicLayer, cors::CorsLayer, trace::TraceLayer};

const MAX_BODY_BYTES: usize = 1 << 20; // 1 MiB

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub cache: Arc<dyn ResultCache>,
}

/// Build the full router. Health probes and `/metrics` are wired outside the
/// in-flight gate so they stay reachable under load.
pub fn build_router(
    state: AppState,
    health: Arc<HealthRegistry>,
    max_in_flight: usize,
) -> Router {
    let gate = InFlightGate::new(max_in_flight);

    let api = Router::new()
        .route("/search", get(handlers::search).post(handlers::search))
        .route("/autocomplete", get(handlers::autocomplete))
        .route("/trending", get(handlers::trending))
        .with_state(state)
        .layer(middleware::from_fn_with_state(gate, in_flight_middleware))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES));

    Router::new()
        .route("/healthz", get(health::liveness))
        .route("/readyz", get(health::readiness).with_state(health))
        .route("/metrics", get(handlers::metrics))
        .nest("/api/v1", api)
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(CatchPanicLayer::custom(
            crate::api::middleware::panic_response,
        ))
}
