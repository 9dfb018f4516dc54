//! Search fan-out
//!
//! Every configured target is called concurrently for a single key. All calls
//! are spawned before any is awaited and the set is drained completely, so a
//! slow or failing backend never blocks or cancels its siblings. Results are
//! merged afterwards, see `merger`.

use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;

use crate::client::{BackendClient, BackendError, BackendRequest};
use crate::config::SearchTarget;
use crate::errors::GatewayError;
use crate::merger::{AggregatedResponse, merge_results};
use crate::metrics_defs::SEARCH_BACKEND_RESULTS;
use crate::registry::{ServiceRegistry, expand_template, to_uri};

pub struct Aggregator {
    client: BackendClient,
    registry: ServiceRegistry,
    targets: Vec<SearchTarget>,
    timeout: Duration,
}

impl Aggregator {
    pub fn new(
        client: BackendClient,
        registry: ServiceRegistry,
        targets: Vec<SearchTarget>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            registry,
            targets,
            timeout,
        }
    }

    /// Queries every target for `key` and merges whatever comes back.
    ///
    /// Backend failures are reported inside the response. An error is returned
    /// only when the fan-out itself breaks.
    pub async fn search(&self, key: &str) -> Result<AggregatedResponse, GatewayError> {
        let start = Instant::now();
        let settled = self.execute_parallel(key).await?;
        let merged = merge_results(key, &self.targets, settled)?;

        tracing::info!(
            key,
            succeeded = merged.succeeded(),
            failed = merged.status.len() - merged.succeeded(),
            duration_ms = start.elapsed().as_millis() as u64,
            "search completed"
        );

        Ok(merged)
    }

    async fn execute_parallel(
        &self,
        key: &str,
    ) -> Result<HashMap<String, Result<JsonValue, BackendError>>, GatewayError> {
        let mut join_set = JoinSet::new();

        for target in &self.targets {
            let base = self.registry.get(&target.backend).ok_or_else(|| {
                GatewayError::InternalError(format!(
                    "Search target not registered: {}",
                    target.backend
                ))
            })?;
            let uri = expand_template(base, &target.path, key)
                .map_err(|e| e.to_string())
                .and_then(|url| to_uri(&url).map_err(|e| e.to_string()))
                .map_err(|e| {
                    GatewayError::InternalError(format!("Invalid search target URL: {e}"))
                })?;

            let client = self.client.clone();
            let backend = target.backend.clone();
            let request = BackendRequest::get(uri, self.timeout);

            join_set.spawn(async move {
                let result = client
                    .call(&backend, request)
                    .await
                    .map(|response| response.payload());
                (backend, result)
            });
        }

        let mut settled = HashMap::with_capacity(self.targets.len());

        while let Some(join_result) = join_set.join_next().await {
            match join_result {
                Ok((backend, result)) => {
                    let status = match &result {
                        Ok(_) => "success",
                        Err(error) => {
                            tracing::debug!(
                                backend = %backend,
                                code = %error.code(),
                                error = %error,
                                "search target failed"
                            );
                            "error"
                        }
                    };
                    shared::counter!(
                        SEARCH_BACKEND_RESULTS,
                        "backend" => backend.clone(),
                        "status" => status,
                    )
                    .increment(1);
                    settled.insert(backend, result);
                }
                Err(e) => {
                    tracing::error!("Search task panicked: {}", e);
                    return Err(GatewayError::InternalError(format!(
                        "Search task failed: {e}"
                    )));
                }
            }
        }

        Ok(settled)
    }
}
