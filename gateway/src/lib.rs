pub mod aggregator;
pub mod client;
pub mod config;
pub mod errors;
pub mod health;
pub mod merger;
pub mod metrics_defs;
pub mod proxy;
pub mod registry;
pub mod responses;
pub mod service;

#[cfg(test)]
mod testutils;

use shared::http::run_http_service;
use std::future::Future;

use crate::errors::GatewayError;
use crate::metrics_defs::ALL_METRICS;
use crate::service::GatewayService;

/// Validates `config` and serves the gateway until `shutdown` resolves.
pub async fn run<F>(config: config::Config, shutdown: F) -> Result<(), GatewayError>
where
    F: Future<Output = ()>,
{
    config.validate()?;
    shared::metrics_defs::describe_all(ALL_METRICS);

    tracing::info!(
        service = %config.service_name,
        backends = config.backends.len(),
        proxy_routes = config.proxy_routes.len(),
        search_targets = config.search.targets.len(),
        "starting gateway"
    );

    let service = GatewayService::new(&config);
    run_http_service(
        &config.listener.host,
        config.listener.port,
        service,
        shutdown,
    )
    .await
}
