//! Thin HTTP surface over the orchestrator.

mod handlers;
mod health;
mod middleware;
mod routes;

pub use health::{HealthRegistry, IndexHealthCheck};
pub use routes::{build_router, AppState};
