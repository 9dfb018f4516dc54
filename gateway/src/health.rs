//! Health aggregation
//!
//! Checks the health endpoint of every registered backend concurrently and
//! reduces the results to a single status. The reduction is a strict AND: one
//! unhealthy backend makes the whole gateway `degraded`.

use http::{StatusCode, Uri};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;

use crate::client::{BackendClient, BackendRequest, BackendResult};
use crate::metrics_defs::BACKEND_HEALTH;
use crate::registry::{ServiceRegistry, join_path};
use crate::responses::timestamp;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Healthy,
    Degraded,
}

impl OverallStatus {
    pub fn http_status(&self) -> StatusCode {
        match self {
            OverallStatus::Healthy => StatusCode::OK,
            OverallStatus::Degraded => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct BackendHealth {
    pub status: HealthStatus,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<JsonValue>,
}

impl BackendHealth {
    fn from_result(url: &Uri, result: BackendResult) -> Self {
        match result {
            Ok(response) => Self {
                status: HealthStatus::Healthy,
                url: url.to_string(),
                response_time_ms: Some(response.elapsed.as_millis() as u64),
                error: None,
                code: None,
                details: Some(response.payload()),
            },
            Err(error) => Self {
                status: HealthStatus::Unhealthy,
                url: url.to_string(),
                response_time_ms: None,
                error: Some(error.message().to_string()),
                code: Some(error.code()),
                details: None,
            },
        }
    }

    fn unreachable(url: &str, message: String) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            url: url.to_string(),
            response_time_ms: None,
            error: Some(message),
            code: Some("internal".to_string()),
            details: None,
        }
    }
}

/// The gateway's own entry in the report
#[derive(Clone, Debug, Serialize)]
pub struct GatewayHealth {
    pub service: String,
    pub status: HealthStatus,
    pub timestamp: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct HealthReport {
    pub overall_status: OverallStatus,
    pub gateway: GatewayHealth,
    /// Keyed by backend name, in registry order
    pub microservices: IndexMap<String, BackendHealth>,
    pub check_duration_ms: u64,
    pub timestamp: String,
}

impl HealthReport {
    pub fn http_status(&self) -> StatusCode {
        self.overall_status.http_status()
    }
}

/// Strict AND over every backend; vacuously healthy when there are none.
pub fn reduce_status<'a>(statuses: impl IntoIterator<Item = &'a HealthStatus>) -> OverallStatus {
    if statuses
        .into_iter()
        .all(|status| *status == HealthStatus::Healthy)
    {
        OverallStatus::Healthy
    } else {
        OverallStatus::Degraded
    }
}

pub struct HealthAggregator {
    client: BackendClient,
    registry: ServiceRegistry,
    health_path: String,
    timeout: Duration,
    service_name: String,
}

impl HealthAggregator {
    pub fn new(
        client: BackendClient,
        registry: ServiceRegistry,
        health_path: String,
        timeout: Duration,
        service_name: String,
    ) -> Self {
        Self {
            client,
            registry,
            health_path,
            timeout,
            service_name,
        }
    }

    pub async fn check_all(&self) -> HealthReport {
        let start = Instant::now();
        let mut join_set = JoinSet::new();
        let mut uris = HashMap::with_capacity(self.registry.len());

        for (name, base) in self.registry.iter() {
            let Ok(uri) = join_path(base, &self.health_path) else {
                continue;
            };
            uris.insert(name.clone(), uri.clone());

            let client = self.client.clone();
            let backend = name.clone();
            let request = BackendRequest::get(uri, self.timeout);
            join_set.spawn(async move {
                let result = client.call(&backend, request).await;
                (backend, result)
            });
        }

        let mut settled = HashMap::with_capacity(uris.len());
        while let Some(join_result) = join_set.join_next().await {
            match join_result {
                Ok((backend, result)) => {
                    settled.insert(backend, result);
                }
                Err(e) => tracing::error!("Health check task panicked: {}", e),
            }
        }

        let mut microservices = IndexMap::with_capacity(self.registry.len());
        for (name, base) in self.registry.iter() {
            let url = format!("{}{}", base.as_str().trim_end_matches('/'), self.health_path);
            let health = match (settled.remove(name), uris.get(name)) {
                (Some(result), Some(uri)) => BackendHealth::from_result(uri, result),
                (_, None) => BackendHealth::unreachable(&url, "Invalid health check URL".into()),
                (None, Some(_)) => {
                    BackendHealth::unreachable(&url, "Health check did not complete".into())
                }
            };

            if let (HealthStatus::Unhealthy, Some(error)) = (health.status, &health.error) {
                tracing::warn!(
                    backend = %name,
                    url = %url,
                    code = health.code.as_deref().unwrap_or_default(),
                    error = %error,
                    "backend unhealthy"
                );
            }
            let healthy = if health.status == HealthStatus::Healthy {
                1.0
            } else {
                0.0
            };
            shared::gauge!(BACKEND_HEALTH, "backend" => name.clone()).set(healthy);

            microservices.insert(name.clone(), health);
        }

        let overall_status = reduce_status(microservices.values().map(|health| &health.status));
        let now = timestamp();

        HealthReport {
            overall_status,
            gateway: GatewayHealth {
                service: self.service_name.clone(),
                status: HealthStatus::Healthy,
                timestamp: now.clone(),
            },
            microservices,
            check_duration_ms: start.elapsed().as_millis() as u64,
            timestamp: now,
        }
    }
}
