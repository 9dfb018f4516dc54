use thiserror::Error;

use crate::config::ValidationError;

/// Errors raised by the gateway itself.
///
/// Failures of individual backends are not represented here: they are
/// `BackendError`s and are always converted into response data.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Invalid configuration: {0}")]
    Configuration(#[from] ValidationError),

    #[error("{0} query parameter is required")]
    MissingParameter(String),

    #[error("Failed to read request body: {0}")]
    RequestBodyError(String),

    #[error("Failed to build response: {0}")]
    ResponseBuildError(String),

    #[error("Response serialization error: {0}")]
    ResponseSerializationError(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
