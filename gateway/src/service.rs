//! Request dispatch
//!
//! The single hyper service behind the listener. Routes, in order:
//! - `GET /health`: the gateway's own liveness
//! - `GET /status`: aggregated backend health
//! - `GET <search path>?<query param>=<key>`: search fan-out
//! - any method under a configured proxy prefix: reverse proxy
//! - everything else: 404

use http::{Method, StatusCode};
use http_body_util::BodyExt;
use hyper::body::{Bytes, Incoming};
use hyper::service::Service;
use hyper::{Request, Response};
use serde_json::json;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use crate::aggregator::Aggregator;
use crate::client::BackendClient;
use crate::config::Config;
use crate::errors::GatewayError;
use crate::health::{HealthAggregator, HealthStatus};
use crate::metrics_defs::{REQUEST_DURATION, REQUESTS_INFLIGHT};
use crate::proxy::ReverseProxy;
use crate::registry::ServiceRegistry;
use crate::responses::{GatewayBody, error_response, full_body, json_response, timestamp};

/// Which handler a request was dispatched to; used to tag metrics and logs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteKind {
    Health,
    Status,
    Search,
    Proxy,
    NotFound,
}

impl RouteKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            RouteKind::Health => "health",
            RouteKind::Status => "status",
            RouteKind::Search => "search",
            RouteKind::Proxy => "proxy",
            RouteKind::NotFound => "not_found",
        }
    }
}

/// One slot of the in-flight gauge, released on drop. hyper drops the handler
/// future when the client disconnects, so the release cannot live after an
/// `.await`.
struct InflightGuard;

impl InflightGuard {
    fn acquire() -> Self {
        shared::gauge!(REQUESTS_INFLIGHT).increment(1.0);
        Self
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        shared::gauge!(REQUESTS_INFLIGHT).decrement(1.0);
    }
}

struct GatewayInner {
    service_name: String,
    search_path: String,
    query_param: String,
    aggregator: Aggregator,
    health: HealthAggregator,
    proxy: ReverseProxy,
}

#[derive(Clone)]
pub struct GatewayService {
    inner: Arc<GatewayInner>,
}

impl GatewayService {
    /// Builds every component from a validated configuration. All of them share
    /// one registry and one connection pool.
    pub fn new(config: &Config) -> Self {
        let registry = ServiceRegistry::new(config.backends.clone());
        let client = BackendClient::new();

        let aggregator = Aggregator::new(
            client.clone(),
            registry.clone(),
            config.search.targets.clone(),
            config.timeouts.search(),
        );
        let health = HealthAggregator::new(
            client.clone(),
            registry.clone(),
            config.health_path.clone(),
            config.timeouts.health(),
            config.service_name.clone(),
        );
        let proxy = ReverseProxy::new(
            client,
            registry,
            config.proxy_routes.clone(),
            config.timeouts.proxy(),
        );

        Self {
            inner: Arc::new(GatewayInner {
                service_name: config.service_name.clone(),
                search_path: config.search.path.clone(),
                query_param: config.search.query_param.clone(),
                aggregator,
                health,
                proxy,
            }),
        }
    }

    /// Handles a request whose body has already been collected.
    ///
    /// Never fails: gateway errors are logged and turned into error responses.
    pub async fn handle(&self, request: Request<Bytes>) -> Response<Bytes> {
        let start = Instant::now();
        let _inflight = InflightGuard::acquire();

        let route = self.route_kind(&request);
        let method = request.method().clone();
        let path = request.uri().path().to_string();

        let response = self.dispatch(route, request).await.unwrap_or_else(|error| {
            tracing::error!(
                route = route.as_str(),
                method = %method,
                path = %path,
                error = %error,
                "request failed"
            );
            error_response(&error)
        });

        shared::histogram!(
            REQUEST_DURATION,
            "route" => route.as_str(),
            "status" => response.status().as_str().to_string(),
        )
        .record(start.elapsed().as_secs_f64());

        response
    }

    fn route_kind(&self, request: &Request<Bytes>) -> RouteKind {
        let path = request.uri().path();

        if request.method() == Method::GET {
            if path == "/health" {
                return RouteKind::Health;
            }
            if path == "/status" {
                return RouteKind::Status;
            }
            if path == self.inner.search_path {
                return RouteKind::Search;
            }
        }

        match self.inner.proxy.match_route(path) {
            Some(_) => RouteKind::Proxy,
            None => RouteKind::NotFound,
        }
    }

    async fn dispatch(
        &self,
        route: RouteKind,
        request: Request<Bytes>,
    ) -> Result<Response<Bytes>, GatewayError> {
        match route {
            RouteKind::Health => json_response(
                StatusCode::OK,
                &json!({
                    "service": self.inner.service_name,
                    "status": HealthStatus::Healthy,
                    "timestamp": timestamp(),
                }),
            ),
            RouteKind::Status => {
                let report = self.inner.health.check_all().await;
                json_response(report.http_status(), &report)
            }
            RouteKind::Search => {
                let key = self.search_key(&request)?;
                let response = self.inner.aggregator.search(&key).await?;
                json_response(StatusCode::OK, &response)
            }
            RouteKind::Proxy => {
                let service = self
                    .inner
                    .proxy
                    .match_route(request.uri().path())
                    .map(str::to_string)
                    .ok_or_else(|| GatewayError::InternalError("Proxy route vanished".into()))?;
                self.inner.proxy.proxy(&service, request).await
            }
            RouteKind::NotFound => {
                tracing::debug!(
                    method = %request.method(),
                    path = %request.uri().path(),
                    "no route matched"
                );
                json_response(
                    StatusCode::NOT_FOUND,
                    &json!({"error": "Not found", "path": request.uri().path()}),
                )
            }
        }
    }

    /// The search key from the query string; missing or empty is a caller error.
    fn search_key(&self, request: &Request<Bytes>) -> Result<String, GatewayError> {
        let query = request.uri().query().unwrap_or_default();
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(name, _)| name == self.inner.query_param.as_str())
            .map(|(_, value)| value.into_owned())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| GatewayError::MissingParameter(self.inner.query_param.clone()))
    }
}

impl Service<Request<Incoming>> for GatewayService {
    type Response = Response<GatewayBody>;
    type Error = GatewayError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let service = self.clone();

        Box::pin(async move {
            let (parts, body) = req.into_parts();
            let body = match body.collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(e) => {
                    let error = GatewayError::RequestBodyError(e.to_string());
                    tracing::warn!(error = %error, "failed to read request body");
                    return Ok(error_response(&error).map(full_body));
                }
            };

            let response = service.handle(Request::from_parts(parts, body)).await;
            Ok(response.map(full_body))
        })
    }
}
