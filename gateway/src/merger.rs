//! Merging of search fan-out results.
//!
//! Results are folded in configuration order once every call has settled, so
//! the merged document never depends on which backend answered first:
//! - Success with a configured `field`: payload stored under that field
//! - Success with an object payload: keys merged into `data`, later targets win
//! - Success with any other payload: stored under the backend name
//! - Failure: message stored under `<backend>_error`

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;

use crate::client::BackendError;
use crate::config::SearchTarget;
use crate::errors::GatewayError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendStatus {
    Success,
    Error,
}

/// Outcome of one search: per-backend status plus the merged payloads.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AggregatedResponse {
    /// The search key
    pub name: String,
    /// One entry per configured target, in configuration order
    pub status: IndexMap<String, BackendStatus>,
    pub data: Map<String, JsonValue>,
}

impl AggregatedResponse {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: IndexMap::new(),
            data: Map::new(),
        }
    }

    pub fn record_success(&mut self, target: &SearchTarget, payload: JsonValue) {
        self.status
            .insert(target.backend.clone(), BackendStatus::Success);

        match (&target.field, payload) {
            (Some(field), payload) => {
                self.data.insert(field.clone(), payload);
            }
            (None, JsonValue::Object(fields)) => {
                self.data.extend(fields);
            }
            (None, payload) => {
                self.data.insert(target.backend.clone(), payload);
            }
        }
    }

    pub fn record_failure(&mut self, backend: &str, error: &BackendError) {
        self.status.insert(backend.to_string(), BackendStatus::Error);
        self.data.insert(
            format!("{backend}_error"),
            JsonValue::String(error.message().to_string()),
        );
    }

    pub fn succeeded(&self) -> usize {
        self.status
            .values()
            .filter(|status| **status == BackendStatus::Success)
            .count()
    }
}

/// Folds settled results into an `AggregatedResponse`, in `targets` order.
///
/// Every target must have settled; a missing result means the fan-out itself
/// is broken and is reported as an internal error.
pub fn merge_results(
    key: &str,
    targets: &[SearchTarget],
    mut settled: HashMap<String, Result<JsonValue, BackendError>>,
) -> Result<AggregatedResponse, GatewayError> {
    let mut merged = AggregatedResponse::new(key);

    for target in targets {
        match settled.remove(&target.backend) {
            Some(Ok(payload)) => merged.record_success(target, payload),
            Some(Err(error)) => merged.record_failure(&target.backend, &error),
            None => {
                return Err(GatewayError::InternalError(format!(
                    "No result for search target {}",
                    target.backend
                )));
            }
        }
    }

    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::NetworkErrorKind;
    use http::StatusCode;
    use serde_json::json;

    fn target(backend: &str, field: Option<&str>) -> SearchTarget {
        SearchTarget {
            backend: backend.to_string(),
            path: format!("/{backend}/{{key}}"),
            field: field.map(str::to_string),
        }
    }

    fn timeout_error() -> BackendError {
        BackendError::Network {
            kind: NetworkErrorKind::Timeout,
            message: "Request to http://b/ timed out after 4000ms".to_string(),
        }
    }

    #[test]
    fn test_partial_failure() {
        let targets = vec![target("A", None), target("B", None)];
        let settled = HashMap::from([
            ("A".to_string(), Ok(json!({"v": 1}))),
            ("B".to_string(), Err(timeout_error())),
        ]);

        let merged = merge_results("pikachu", &targets, settled).unwrap();

        assert_eq!(merged.name, "pikachu");
        assert_eq!(merged.status["A"], BackendStatus::Success);
        assert_eq!(merged.status["B"], BackendStatus::Error);
        assert_eq!(
            JsonValue::Object(merged.data),
            json!({"v": 1, "B_error": "Request to http://b/ timed out after 4000ms"})
        );
    }

    #[test]
    fn test_field_and_non_object_payloads() {
        let targets = vec![target("pokemon", Some("pokemon")), target("images", None)];
        let settled = HashMap::from([
            ("pokemon".to_string(), Ok(json!({"id": 25, "type": "electric"}))),
            (
                "images".to_string(),
                Ok(json!("https://img.example/25.png")),
            ),
        ]);

        let merged = merge_results("pikachu", &targets, settled).unwrap();

        assert_eq!(merged.succeeded(), 2);
        assert_eq!(
            JsonValue::Object(merged.data),
            json!({
                "pokemon": {"id": 25, "type": "electric"},
                "images": "https://img.example/25.png",
            })
        );
    }

    #[test]
    fn test_later_targets_win_conflicts() {
        let targets = vec![target("first", None), target("second", None)];
        let settled = HashMap::from([
            ("second".to_string(), Ok(json!({"name": "from-second"}))),
            ("first".to_string(), Ok(json!({"name": "from-first", "hp": 35}))),
        ]);

        let merged = merge_results("pikachu", &targets, settled).unwrap();

        assert_eq!(merged.data["name"], "from-second");
        assert_eq!(merged.data["hp"], 35);
    }

    #[test]
    fn test_upstream_error_message() {
        let targets = vec![target("stats", None)];
        let settled = HashMap::from([(
            "stats".to_string(),
            Err(BackendError::Upstream {
                status: StatusCode::NOT_FOUND,
                message: "Stats not found".to_string(),
            }),
        )]);

        let merged = merge_results("missingno", &targets, settled).unwrap();

        assert_eq!(merged.data["stats_error"], "Stats not found");
        assert_eq!(merged.succeeded(), 0);
    }

    #[test]
    fn test_missing_result_is_internal_error() {
        let targets = vec![target("A", None)];
        assert!(matches!(
            merge_results("pikachu", &targets, HashMap::new()),
            Err(GatewayError::InternalError(_))
        ));
    }

    #[test]
    fn test_serialized_shape() {
        let targets = vec![target("A", None), target("B", None)];
        let settled = HashMap::from([
            ("A".to_string(), Ok(json!({"v": 1}))),
            ("B".to_string(), Err(timeout_error())),
        ]);

        let merged = merge_results("pikachu", &targets, settled).unwrap();
        let value = serde_json::to_value(&merged).unwrap();

        assert_eq!(value["name"], "pikachu");
        assert_eq!(value["status"], json!({"A": "success", "B": "error"}));
        assert_eq!(value["data"]["v"], 1);
    }
}
