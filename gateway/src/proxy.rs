//! Reverse proxy
//!
//! Forwards requests under a configured path prefix to a named backend and
//! relays what comes back. Backend failures never surface as errors: they are
//! turned into a JSON "Service unavailable" body carrying the backend's status
//! when it answered, or 503 when it could not be reached.

use http::StatusCode;
use hyper::body::Bytes;
use hyper::{Request, Response};
use serde_json::json;
use shared::http::add_via_header;
use std::time::{Duration, Instant};

use crate::client::{BackendClient, BackendError, BackendRequest};
use crate::config::ProxyRoute;
use crate::errors::GatewayError;
use crate::registry::{ServiceRegistry, join_path};
use crate::responses::{json_response, timestamp};

pub struct ReverseProxy {
    client: BackendClient,
    registry: ServiceRegistry,
    /// Sorted longest prefix first, trailing slashes trimmed
    routes: Vec<ProxyRoute>,
    timeout: Duration,
}

impl ReverseProxy {
    pub fn new(
        client: BackendClient,
        registry: ServiceRegistry,
        routes: Vec<ProxyRoute>,
        timeout: Duration,
    ) -> Self {
        let mut routes: Vec<ProxyRoute> = routes
            .into_iter()
            .map(|route| ProxyRoute {
                prefix: route.prefix.trim_end_matches('/').to_string(),
                backend: route.backend,
            })
            .collect();
        routes.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));

        Self {
            client,
            registry,
            routes,
            timeout,
        }
    }

    /// Backend serving `path`, using the longest prefix that matches on a
    /// segment boundary: "/api/x" matches "/api/x" and "/api/x/5" but not
    /// "/api/xy".
    pub fn match_route(&self, path: &str) -> Option<&str> {
        self.routes
            .iter()
            .find(|route| {
                route.prefix.is_empty()
                    || path
                        .strip_prefix(route.prefix.as_str())
                        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
            })
            .map(|route| route.backend.as_str())
    }

    /// Forwards `request` to `service`.
    ///
    /// Returns an error only if the gateway itself cannot build the call or
    /// the response; every backend failure becomes a response.
    pub async fn proxy(
        &self,
        service: &str,
        request: Request<Bytes>,
    ) -> Result<Response<Bytes>, GatewayError> {
        let base = self.registry.get(service).ok_or_else(|| {
            GatewayError::InternalError(format!("Proxy target not registered: {service}"))
        })?;

        let (parts, body) = request.into_parts();
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let target = join_path(base, path_and_query)
            .map_err(|e| GatewayError::InternalError(format!("Invalid proxy target: {e}")))?;

        let method = parts.method.clone();
        let backend_request = BackendRequest {
            method: parts.method,
            uri: target.clone(),
            headers: parts.headers,
            body,
            timeout: self.timeout,
        };

        let start = Instant::now();
        let result = self.client.call(service, backend_request).await;
        let latency_ms = start.elapsed().as_millis() as u64;

        let response = match result {
            Ok(backend_response) => {
                let mut builder = Response::builder().status(backend_response.status);
                let mut headers = backend_response.headers;
                add_via_header(&mut headers, parts.version);
                for (name, value) in headers.iter() {
                    builder = builder.header(name, value);
                }
                builder
                    .body(backend_response.body)
                    .map_err(|e| GatewayError::ResponseBuildError(e.to_string()))?
            }
            Err(error) => unavailable_response(service, &error)?,
        };

        tracing::info!(
            service,
            target = %target,
            method = %method,
            status = response.status().as_u16(),
            latency_ms,
            "proxied request"
        );

        Ok(response)
    }
}

fn unavailable_response(
    service: &str,
    error: &BackendError,
) -> Result<Response<Bytes>, GatewayError> {
    let status = error.status().unwrap_or(StatusCode::SERVICE_UNAVAILABLE);

    tracing::warn!(service, code = %error.code(), error = %error, "proxy call failed");

    let mut response = json_response(
        status,
        &json!({
            "error": "Service unavailable",
            "service": service,
            "message": error.message(),
            "timestamp": timestamp(),
        }),
    )?;
    add_via_header(response.headers_mut(), http::Version::HTTP_11);
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::{MockResponse, refused_url, start_mock_server};
    use http::header::{HOST, HeaderValue};
    use indexmap::IndexMap;
    use serde_json::Value as JsonValue;
    use url::Url;

    fn test_proxy(backends: Vec<(&str, Url)>, routes: Vec<(&str, &str)>) -> ReverseProxy {
        let registry = ServiceRegistry::new(
            backends
                .into_iter()
                .map(|(name, url)| (name.to_string(), url))
                .collect::<IndexMap<_, _>>(),
        );
        let routes = routes
            .into_iter()
            .map(|(prefix, backend)| ProxyRoute {
                prefix: prefix.to_string(),
                backend: backend.to_string(),
            })
            .collect();
        ReverseProxy::new(
            BackendClient::new(),
            registry,
            routes,
            Duration::from_secs(5),
        )
    }

    fn body_json(response: &Response<Bytes>) -> JsonValue {
        serde_json::from_slice(response.body()).unwrap()
    }

    #[test]
    fn test_match_route() {
        let url = Url::parse("http://x:9").unwrap();
        let proxy = test_proxy(
            vec![("x", url.clone()), ("xdetail", url)],
            vec![("/api/x", "x"), ("/api/x/detail/", "xdetail")],
        );

        assert_eq!(proxy.match_route("/api/x"), Some("x"));
        assert_eq!(proxy.match_route("/api/x/5"), Some("x"));
        assert_eq!(proxy.match_route("/api/x/detail"), Some("xdetail"));
        assert_eq!(proxy.match_route("/api/x/detail/7"), Some("xdetail"));
        assert_eq!(proxy.match_route("/api/xy"), None);
        assert_eq!(proxy.match_route("/other"), None);
    }

    #[tokio::test]
    async fn test_forwards_method_path_query_and_body() {
        let server = start_mock_server(|req| {
            let echo = serde_json::json!({
                "method": req.method.as_str(),
                "uri": req.uri.to_string(),
                "body": String::from_utf8_lossy(&req.body),
                "host": req.headers.get(HOST).and_then(|h| h.to_str().ok()),
                "custom": req.headers.get("x-custom").and_then(|h| h.to_str().ok()),
            });
            MockResponse::json(201, &echo.to_string())
        })
        .await;
        let proxy = test_proxy(vec![("x", server.base_url())], vec![("/api/x", "x")]);

        let request = Request::builder()
            .method("POST")
            .uri("/api/x/5?q=1&name=mr%20mime")
            .header(HOST, "gateway.example.com")
            .header("x-custom", "kept")
            .body(Bytes::from_static(b"{\"level\":5}"))
            .unwrap();

        let response = proxy.proxy("x", request).await.unwrap();

        // Backend status relayed unchanged
        assert_eq!(response.status(), StatusCode::CREATED);
        let echo = body_json(&response);
        assert_eq!(echo["method"], "POST");
        assert_eq!(echo["uri"], "/api/x/5?q=1&name=mr%20mime");
        assert_eq!(echo["body"], "{\"level\":5}");
        assert_eq!(echo["custom"], "kept");
        assert_ne!(echo["host"], "gateway.example.com");
        assert!(response.headers().contains_key("via"));
    }

    #[tokio::test]
    async fn test_dot_segments_forwarded_verbatim() {
        let server = start_mock_server(|req| {
            MockResponse::json(200, &serde_json::json!({"uri": req.uri.to_string()}).to_string())
        })
        .await;
        let proxy = test_proxy(vec![("x", server.base_url())], vec![("/api/x", "x")]);

        for uri in ["/api/x/../../admin?q=1", "/api/x/%2e%2e/%2E%2E/secret"] {
            let request = Request::builder().uri(uri).body(Bytes::new()).unwrap();
            let response = proxy.proxy("x", request).await.unwrap();

            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(body_json(&response)["uri"], uri);
        }
    }

    #[tokio::test]
    async fn test_network_failure_is_503() {
        let proxy = test_proxy(vec![("X", refused_url().await)], vec![("/api/x", "X")]);

        let request = Request::builder()
            .uri("/api/x/5?q=1")
            .body(Bytes::new())
            .unwrap();
        let response = proxy.proxy("X", request).await.unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = body_json(&response);
        assert_eq!(body["error"], "Service unavailable");
        assert_eq!(body["service"], "X");
        assert!(body["message"].as_str().is_some());
        assert!(body["timestamp"].as_str().is_some());
    }

    #[tokio::test]
    async fn test_upstream_failure_relays_status() {
        let server = start_mock_server(|_req| MockResponse::text(404, "Pokemon not found")).await;
        let proxy = test_proxy(vec![("x", server.base_url())], vec![("/api/x", "x")]);

        let request = Request::builder()
            .uri("/api/x/missingno")
            .body(Bytes::new())
            .unwrap();
        let response = proxy.proxy("x", request).await.unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(&response);
        assert_eq!(body["error"], "Service unavailable");
        assert_eq!(body["service"], "x");
        assert_eq!(body["message"], "Pokemon not found");
    }

    #[tokio::test]
    async fn test_timeout_is_503() {
        let server = start_mock_server(|_req| {
            MockResponse::json(200, "{}").with_delay(Duration::from_millis(500))
        })
        .await;
        let mut proxy = test_proxy(vec![("x", server.base_url())], vec![("/api/x", "x")]);
        proxy.timeout = Duration::from_millis(50);

        let request = Request::builder().uri("/api/x").body(Bytes::new()).unwrap();
        let response = proxy.proxy("x", request).await.unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(
            body_json(&response)["message"]
                .as_str()
                .unwrap()
                .contains("timed out")
        );
    }

    #[tokio::test]
    async fn test_unregistered_service_is_internal_error() {
        let proxy = test_proxy(vec![], vec![]);
        let request = Request::builder()
            .uri("/api/x")
            .header(HOST, HeaderValue::from_static("gateway"))
            .body(Bytes::new())
            .unwrap();

        assert!(matches!(
            proxy.proxy("x", request).await,
            Err(GatewayError::InternalError(_))
        ));
    }
}
