//! Backend client
//!
//! A thin wrapper over the hyper client that every component uses to reach a
//! backend. It applies a per-call timeout and classifies every outcome into
//! exactly one of: a 2xx response, a network failure, or an upstream (non-2xx)
//! failure. It never retries.

use http::header::{HOST, HeaderMap};
use http::{Method, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use hyper::Request;
use hyper::body::Bytes;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use serde_json::Value as JsonValue;
use shared::http::{add_via_header, filter_hop_by_hop};
use std::error::Error as StdError;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::timeout;

use crate::metrics_defs::BACKEND_REQUEST_DURATION;

/// Transport-level failure classification
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NetworkErrorKind {
    /// The call did not complete within its timeout
    Timeout,
    /// The backend actively refused the connection
    ConnectionRefused,
    /// Any other failure while connecting (DNS, unreachable host, ...)
    Connect,
    /// The connection was established but the exchange failed
    Transport,
}

impl NetworkErrorKind {
    pub const fn code(&self) -> &'static str {
        match self {
            NetworkErrorKind::Timeout => "timeout",
            NetworkErrorKind::ConnectionRefused => "connection_refused",
            NetworkErrorKind::Connect => "connect_failed",
            NetworkErrorKind::Transport => "transport",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    /// The backend could not be reached; there is no status code
    #[error("{message}")]
    Network {
        kind: NetworkErrorKind,
        message: String,
    },

    /// The backend answered with a non-2xx status
    #[error("{message}")]
    Upstream { status: StatusCode, message: String },
}

impl BackendError {
    /// Upstream status code, if the backend answered at all
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            BackendError::Network { .. } => None,
            BackendError::Upstream { status, .. } => Some(*status),
        }
    }

    /// Short machine-readable classification, e.g. "timeout" or "http_404"
    pub fn code(&self) -> String {
        match self {
            BackendError::Network { kind, .. } => kind.code().to_string(),
            BackendError::Upstream { status, .. } => format!("http_{}", status.as_u16()),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            BackendError::Network { message, .. } | BackendError::Upstream { message, .. } => {
                message
            }
        }
    }
}

/// A successful (2xx) backend response with its body fully collected
#[derive(Debug)]
pub struct BackendResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Wall-clock time from sending the request to collecting the body
    pub elapsed: Duration,
}

impl BackendResponse {
    /// The body as JSON.
    ///
    /// Non-JSON bodies become a JSON string and an empty body becomes null,
    /// so callers always get something they can embed in a JSON document.
    pub fn payload(&self) -> JsonValue {
        if self.body.is_empty() {
            return JsonValue::Null;
        }
        serde_json::from_slice(&self.body)
            .unwrap_or_else(|_| JsonValue::String(String::from_utf8_lossy(&self.body).into_owned()))
    }
}

pub type BackendResult = Result<BackendResponse, BackendError>;

/// A single outbound call
#[derive(Debug)]
pub struct BackendRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub timeout: Duration,
}

impl BackendRequest {
    /// A bodiless GET, the shape used by search and health fan-outs
    pub fn get(uri: Uri, timeout: Duration) -> Self {
        Self {
            method: Method::GET,
            uri,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            timeout,
        }
    }
}

#[derive(Clone)]
pub struct BackendClient {
    client: Client<HttpConnector, Full<Bytes>>,
}

impl Default for BackendClient {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendClient {
    pub fn new() -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self { client }
    }

    /// Sends `request` and classifies the outcome.
    ///
    /// The timeout applies to the entire request/response cycle, including
    /// collecting the complete response body. `backend` is only used to label
    /// logs and metrics.
    pub async fn call(&self, backend: &str, request: BackendRequest) -> BackendResult {
        let start = Instant::now();
        let timeout_duration = request.timeout;
        let target = request.uri.clone();

        let result = match timeout(timeout_duration, self.send(request)).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Network {
                kind: NetworkErrorKind::Timeout,
                message: format!(
                    "Request to {} timed out after {}ms",
                    target,
                    timeout_duration.as_millis()
                ),
            }),
        };

        let elapsed = start.elapsed();
        let outcome = match &result {
            Ok(_) => "success".to_string(),
            Err(e) => e.code(),
        };
        shared::histogram!(
            BACKEND_REQUEST_DURATION,
            "backend" => backend.to_string(),
            "outcome" => outcome,
        )
        .record(elapsed.as_secs_f64());

        result.map(|mut response| {
            response.elapsed = elapsed;
            response
        })
    }

    async fn send(&self, request: BackendRequest) -> BackendResult {
        let BackendRequest {
            method,
            uri,
            mut headers,
            body,
            ..
        } = request;

        // The client derives Host from the URI; the caller's Host must not leak
        headers.remove(HOST);
        filter_hop_by_hop(&mut headers, http::Version::HTTP_11);
        add_via_header(&mut headers, http::Version::HTTP_11);

        let mut req_builder = Request::builder().method(method).uri(uri.clone());
        for (name, value) in headers.iter() {
            req_builder = req_builder.header(name, value);
        }

        let upstream_request = req_builder
            .body(Full::new(body))
            .map_err(|e| BackendError::Network {
                kind: NetworkErrorKind::Transport,
                message: format!("Failed to build request: {e}"),
            })?;

        let response = self
            .client
            .request(upstream_request)
            .await
            .map_err(|e| classify_client_error(&uri, &e))?;

        let (mut parts, body) = response.into_parts();
        filter_hop_by_hop(&mut parts.headers, parts.version);

        let body = body
            .collect()
            .await
            .map(|collected| collected.to_bytes())
            .map_err(|e| BackendError::Network {
                kind: NetworkErrorKind::Transport,
                message: format!("Failed to read response from {uri}: {e}"),
            })?;

        if !parts.status.is_success() {
            let message = if body.is_empty() {
                format!("Request failed with status code {}", parts.status.as_u16())
            } else {
                String::from_utf8_lossy(&body).into_owned()
            };
            return Err(BackendError::Upstream {
                status: parts.status,
                message,
            });
        }

        Ok(BackendResponse {
            status: parts.status,
            headers: parts.headers,
            body,
            elapsed: Duration::ZERO,
        })
    }
}

fn classify_client_error(uri: &Uri, error: &hyper_util::client::legacy::Error) -> BackendError {
    let refused = error_chain(error).any(|source| {
        source
            .downcast_ref::<std::io::Error>()
            .is_some_and(|io| io.kind() == std::io::ErrorKind::ConnectionRefused)
    });

    let kind = if refused {
        NetworkErrorKind::ConnectionRefused
    } else if error.is_connect() {
        NetworkErrorKind::Connect
    } else {
        NetworkErrorKind::Transport
    };

    let detail = error_chain(error)
        .last()
        .map(ToString::to_string)
        .unwrap_or_else(|| error.to_string());

    BackendError::Network {
        kind,
        message: format!("Request to {uri} failed: {detail}"),
    }
}

fn error_chain<'a>(
    error: &'a (dyn StdError + 'static),
) -> impl Iterator<Item = &'a (dyn StdError + 'static)> {
    std::iter::successors(Some(error), |&e| e.source())
}
