use axum::{
    extract::{Request, State},
    http::{HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::warn;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Accept the caller's request id or mint one, and echo it on the response.
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    request
        .extensions_mut()
        .insert(RequestId(request_id.clone()));

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Request id carried through handler extensions
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Concurrency gate over the API routes. Health probes and metrics must stay
/// reachable when the service is saturated, so they are routed outside this
/// layer entirely.
#[derive(Clone)]
pub struct InFlightGate {
    permits: Arc<Semaphore>,
}

impl InFlightGate {
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
        }
    }
}

pub async fn in_flight_middleware(
    State(gate): State<InFlightGate>,
    request: Request,
    next: Next,
) -> Response {
    match gate.permits.clone().try_acquire_owned() {
        Ok(_permit) => next.run(request).await,
        Err(_) => {
            warn!(path = %request.uri().path(), "in-flight limit reached");
            (
                StatusCode::TOO_MANY_REQUESTS,
                axum::Json(serde_json::json!({
                    "error": "rate limit exceeded",
                    "code": "rate_limited",
                })),
            )
                .into_response()
        }
    }
}

/// Body for panics caught by the catch-panic layer
pub fn panic_response(_err: Box<dyn std::any::Any + Send + 'static>) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        axum::Json(serde_json::json!({
            "error": "Internal Server Error",
            "code": "internal_error",
        })),
    )
        .into_response()
}
