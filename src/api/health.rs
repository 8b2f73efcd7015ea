use crate::backends::HealthCheck;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

const READINESS_DEADLINE: Duration = Duration::from_secs(5);

/// Cluster-color probe for the index backend; anything but `red` is up
#[async_trait::async_trait]
pub trait IndexHealthCheck: Send + Sync {
    async fn cluster_color(&self) -> crate::error::Result<String>;
}

#[async_trait::async_trait]
impl IndexHealthCheck for crate::backends::elasticsearch::ElasticsearchClient {
    async fn cluster_color(&self) -> crate::error::Result<String> {
        self.cluster_health().await
    }
}

#[derive(Debug, Serialize)]
struct ComponentHealth {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Registered component checkers driven concurrently by the readiness probe
#[derive(Clone, Default)]
pub struct HealthRegistry {
    checks: Vec<(String, Arc<dyn HealthCheck>)>,
    index_check: Option<Arc<dyn IndexHealthCheck>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, checker: Arc<dyn HealthCheck>) {
        self.checks.push((name.into(), checker));
    }

    pub fn register_index(&mut self, checker: Arc<dyn IndexHealthCheck>) {
        self.index_check = Some(checker);
    }

    async fn run_checks(&self) -> HashMap<String, ComponentHealth> {
        let mut futures = Vec::new();
        for (name, checker) in &self.checks {
            let name = name.clone();
            let checker = checker.clone();
            futures.push(tokio::spawn(async move {
                let start = Instant::now();
                let outcome =
                    tokio::time::timeout(READINESS_DEADLINE, checker.health_check()).await;
                let health = match outcome {
                    Ok(Ok(())) => ComponentHealth {
                        status: "healthy".to_string(),
                        latency_ms: Some(start.elapsed().as_millis() as u64),
                        error: None,
                    },
                    Ok(Err(e)) => ComponentHealth {
                        status: "unhealthy".to_string(),
                        latency_ms: Some(start.elapsed().as_millis() as u64),
                        error: Some(e.to_string()),
                    },
                    Err(_) => ComponentHealth {
                        status: "unhealthy".to_string(),
                        latency_ms: None,
                        error: Some("health check timed out".to_string()),
                    },
                };
                (name, health)
            }));
        }

        let index_future = self.index_check.clone().map(|checker| {
            tokio::spawn(async move {
                let start = Instant::now();
                let outcome =
                    tokio::time::timeout(READINESS_DEADLINE, checker.cluster_color()).await;
                let health = match outcome {
                    Ok(Ok(color)) => ComponentHealth {
                        status: color,
                        latency_ms: Some(start.elapsed().as_millis() as u64),
                        error: None,
                    },
                    Ok(Err(e)) => ComponentHealth {
                        status: "red".to_string(),
                        latency_ms: Some(start.elapsed().as_millis() as u64),
                        error: Some(e.to_string()),
                    },
                    Err(_) => ComponentHealth {
                        status: "red".to_string(),
                        latency_ms: None,
                        error: Some("health check timed out".to_string()),
                    },
                };
                ("elasticsearch".to_string(), health)
            })
        });

        let mut results = HashMap::new();
        for handle in futures {
            if let Ok((name, health)) = handle.await {
                results.insert(name, health);
            }
        }
        if let Some(handle) = index_future {
            if let Ok((name, health)) = handle.await {
                results.insert(name, health);
            }
        }
        results
    }
}

/// `GET /healthz`: process liveness only
pub async fn liveness() -> impl IntoResponse {
    Json(serde_json::json!({"status": "alive"}))
}

/// `GET /readyz`: aggregate component readiness
pub async fn readiness(State(registry): State<Arc<HealthRegistry>>) -> impl IntoResponse {
    let components = registry.run_checks().await;

    let degraded = components
        .values()
        .any(|c| c.status == "unhealthy" || c.status == "red");

    let status = if degraded {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    let overall = if degraded { "degraded" } else { "healthy" };

    (
        status,
        Json(serde_json::json!({
            "status": overall,
            "components": components,
            "timestamp": Utc::now().to_rfc3339(),
        })),
    )
}
