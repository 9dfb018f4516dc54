use chrono::{SecondsFormat, Utc};
use http::header::CONTENT_TYPE;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Response, StatusCode};
use serde::Serialize;
use serde_json::json;

use crate::errors::GatewayError;

pub type GatewayBody = BoxBody<Bytes, GatewayError>;

pub fn full_body(bytes: Bytes) -> GatewayBody {
    Full::new(bytes).map_err(|e| match e {}).boxed()
}

/// Serializes `value` into a JSON response with the given status.
pub fn json_response<T: Serialize>(
    status: StatusCode,
    value: &T,
) -> Result<Response<Bytes>, GatewayError> {
    let bytes = serde_json::to_vec(value).map(Bytes::from)?;
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(bytes)
        .map_err(|e| GatewayError::ResponseBuildError(e.to_string()))
}

/// Maps a gateway error onto the response the caller sees.
///
/// Only a missing parameter is the caller's fault; everything else is an
/// internal fault and gets a generic body.
pub fn error_response(error: &GatewayError) -> Response<Bytes> {
    let (status, body) = match error {
        GatewayError::MissingParameter(_) => (
            StatusCode::BAD_REQUEST,
            json!({"error": "Missing parameter", "message": error.to_string()}),
        ),
        _ => (
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({"error": "Internal server error", "message": "An unexpected error occurred"}),
        ),
    };

    json_response(status, &body).unwrap_or_else(|_| {
        let mut response = Response::new(Bytes::from_static(b"Internal server error"));
        *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        response
    })
}

/// Current time as an RFC 3339 timestamp with millisecond precision
pub fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
