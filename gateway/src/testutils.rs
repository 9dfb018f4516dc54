use http::header::{CONTENT_TYPE, HeaderMap};
use http::{Method, Uri};
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use url::Url;

/// What a mock backend saw
#[derive(Clone, Debug)]
pub struct CapturedRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// What a mock backend answers, optionally after a delay
pub struct MockResponse {
    status: u16,
    content_type: &'static str,
    body: String,
    delay: Duration,
}

impl MockResponse {
    pub fn json(status: u16, body: &str) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: body.to_string(),
            delay: Duration::ZERO,
        }
    }

    pub fn text(status: u16, body: &str) -> Self {
        Self {
            content_type: "text/plain",
            ..Self::json(status, body)
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

pub struct MockServer {
    pub port: u16,
}

impl MockServer {
    pub fn base_url(&self) -> Url {
        Url::parse(&format!("http://127.0.0.1:{}", self.port)).unwrap()
    }

    pub fn url(&self, path: &str) -> Url {
        Url::parse(&format!("http://127.0.0.1:{}{}", self.port, path)).unwrap()
    }

    pub fn uri(&self, path: &str) -> Uri {
        format!("http://127.0.0.1:{}{}", self.port, path).parse().unwrap()
    }
}

/// Start a mock HTTP backend that answers every request with `handler`
pub async fn start_mock_server<F>(handler: F) -> MockServer
where
    F: Fn(CapturedRequest) -> MockResponse + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let handler = Arc::new(handler);

    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            let io = TokioIo::new(stream);
            let handler = handler.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| {
                    let handler = handler.clone();
                    async move {
                        let (parts, body) = req.into_parts();
                        let body = body
                            .collect()
                            .await
                            .map(|collected| collected.to_bytes())
                            .unwrap_or_default();
                        let captured = CapturedRequest {
                            method: parts.method,
                            uri: parts.uri,
                            headers: parts.headers,
                            body,
                        };

                        let mock = handler(captured);
                        if !mock.delay.is_zero() {
                            tokio::time::sleep(mock.delay).await;
                        }

                        let response = Response::builder()
                            .status(mock.status)
                            .header(CONTENT_TYPE, mock.content_type)
                            .body(Full::new(Bytes::from(mock.body)))
                            .unwrap();
                        Ok::<_, Infallible>(response)
                    }
                });

                let _ = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                    .serve_connection(io, service)
                    .await;
            });
        }
    });

    MockServer { port }
}

/// A URL nothing listens on: connecting to it is refused
pub async fn refused_url() -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    Url::parse(&format!("http://127.0.0.1:{port}")).unwrap()
}
