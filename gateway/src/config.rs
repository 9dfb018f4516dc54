use indexmap::IndexMap;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Placeholder substituted with the search key in search target paths.
pub const KEY_PLACEHOLDER: &str = "{key}";

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Service name cannot be empty")]
    EmptyServiceName,

    #[error("Empty backend name")]
    EmptyBackendName,

    #[error("Backend {0} uses unsupported scheme '{1}', only http is supported")]
    UnsupportedScheme(String, String),

    #[error("{0} references unknown backend: {1}")]
    UnknownBackend(String, String),

    #[error("Path must start with '/': {0}")]
    InvalidPath(String),

    #[error("Duplicate proxy prefix: {0}")]
    DuplicatePrefix(String),

    #[error("Search target path must contain a '{{key}}' segment: {0}")]
    MissingKeyPlaceholder(String),

    #[error("Duplicate search target backend: {0}")]
    DuplicateSearchTarget(String),

    #[error("Search query parameter cannot be empty")]
    EmptyQueryParam,

    #[error("Timeout {0} must be greater than 0")]
    ZeroTimeout(&'static str),

    #[error("Invalid URL in {0}: {1}")]
    InvalidOverride(String, url::ParseError),
}

/// Gateway configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Name reported by the gateway's own health endpoints
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// Listener for incoming requests
    pub listener: Listener,
    /// The service registry: logical backend name to base URL.
    ///
    /// Iteration order is the order in the configuration file and is the
    /// order used when reporting per-backend results.
    pub backends: IndexMap<String, Url>,
    /// Path prefixes that are reverse-proxied to a backend
    #[serde(default)]
    pub proxy_routes: Vec<ProxyRoute>,
    /// Fan-out search endpoint
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub timeouts: Timeouts,
    /// Path queried on every backend by the status endpoint
    #[serde(default = "default_health_path")]
    pub health_path: String,
}

impl Config {
    /// Validates the gateway configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;

        if self.service_name.is_empty() {
            return Err(ValidationError::EmptyServiceName);
        }

        if self.backends.keys().any(|name| name.is_empty()) {
            return Err(ValidationError::EmptyBackendName);
        }

        // The backend client only speaks plain HTTP
        for (name, url) in &self.backends {
            if url.scheme() != "http" {
                return Err(ValidationError::UnsupportedScheme(
                    name.clone(),
                    url.scheme().to_string(),
                ));
            }
        }

        validate_path(&self.health_path)?;

        let mut prefixes = HashSet::new();
        for route in &self.proxy_routes {
            validate_path(&route.prefix)?;
            if !prefixes.insert(route.prefix.trim_end_matches('/')) {
                return Err(ValidationError::DuplicatePrefix(route.prefix.clone()));
            }
            if !self.backends.contains_key(&route.backend) {
                return Err(ValidationError::UnknownBackend(
                    format!("proxy route {}", route.prefix),
                    route.backend.clone(),
                ));
            }
        }

        self.search.validate(&self.backends)?;
        self.timeouts.validate()?;

        Ok(())
    }

    /// Replaces backend URLs with values from `<NAME>_SERVICE_URL` variables.
    ///
    /// Takes the variables explicitly so callers decide where they come from
    /// (usually `std::env::vars()`).
    pub fn apply_env_overrides<I>(&mut self, vars: I) -> Result<(), ValidationError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: HashMap<String, String> = vars.into_iter().collect();

        for (name, url) in self.backends.iter_mut() {
            let variable = env_var_name(name);
            if let Some(value) = vars.get(&variable) {
                *url = Url::parse(value)
                    .map_err(|e| ValidationError::InvalidOverride(variable.clone(), e))?;
                tracing::info!(backend = %name, %variable, url = %url, "backend URL overridden");
            }
        }

        Ok(())
    }
}

/// Environment variable that overrides the base URL of `backend`.
pub fn env_var_name(backend: &str) -> String {
    format!("{}_SERVICE_URL", backend.to_uppercase().replace('-', "_"))
}

fn validate_path(path: &str) -> Result<(), ValidationError> {
    if !path.starts_with('/') {
        return Err(ValidationError::InvalidPath(path.to_string()));
    }
    Ok(())
}

fn default_service_name() -> String {
    "api-gateway".to_string()
}

fn default_health_path() -> String {
    "/health".to_string()
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Listener {
    /// Validates the listener configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

/// Reverse-proxy rule: requests under `prefix` go to `backend`
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ProxyRoute {
    /// Path prefix, matched on a segment boundary (e.g. "/api/pokemon")
    pub prefix: String,
    /// Name of the backend in the registry
    pub backend: String,
}

/// Fan-out search configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct SearchConfig {
    /// Path the search endpoint is served on
    #[serde(default = "default_search_path")]
    pub path: String,
    /// Query parameter carrying the search key
    #[serde(default = "default_query_param")]
    pub query_param: String,
    /// Backends queried for every search, in merge order
    #[serde(default)]
    pub targets: Vec<SearchTarget>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            path: default_search_path(),
            query_param: default_query_param(),
            targets: Vec::new(),
        }
    }
}

impl SearchConfig {
    fn validate(&self, backends: &IndexMap<String, Url>) -> Result<(), ValidationError> {
        validate_path(&self.path)?;

        if self.query_param.is_empty() {
            return Err(ValidationError::EmptyQueryParam);
        }

        let mut seen = HashSet::new();
        for target in &self.targets {
            if !backends.contains_key(&target.backend) {
                return Err(ValidationError::UnknownBackend(
                    "search target".to_string(),
                    target.backend.clone(),
                ));
            }
            if !seen.insert(&target.backend) {
                return Err(ValidationError::DuplicateSearchTarget(target.backend.clone()));
            }
            validate_path(&target.path)?;
            if !target.path.split('/').any(|segment| segment == KEY_PLACEHOLDER) {
                return Err(ValidationError::MissingKeyPlaceholder(target.path.clone()));
            }
        }

        Ok(())
    }
}

fn default_search_path() -> String {
    "/poke/search".to_string()
}

fn default_query_param() -> String {
    "pokemon_name".to_string()
}

/// A single backend queried by the search endpoint
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct SearchTarget {
    /// Name of the backend in the registry
    pub backend: String,
    /// Path template with a `{key}` segment, e.g. "/pokemon/{key}"
    pub path: String,
    /// When set, the payload is nested under this field instead of being
    /// merged into the top level of `data`
    #[serde(default)]
    pub field: Option<String>,
}

/// Per-call timeouts in milliseconds
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Timeouts {
    #[serde(default = "default_proxy_ms")]
    pub proxy_ms: u64,
    #[serde(default = "default_search_ms")]
    pub search_ms: u64,
    #[serde(default = "default_health_ms")]
    pub health_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            proxy_ms: default_proxy_ms(),
            search_ms: default_search_ms(),
            health_ms: default_health_ms(),
        }
    }
}

impl Timeouts {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.proxy_ms == 0 {
            return Err(ValidationError::ZeroTimeout("proxy_ms"));
        }
        if self.search_ms == 0 {
            return Err(ValidationError::ZeroTimeout("search_ms"));
        }
        if self.health_ms == 0 {
            return Err(ValidationError::ZeroTimeout("health_ms"));
        }
        Ok(())
    }

    pub fn proxy(&self) -> Duration {
        Duration::from_millis(self.proxy_ms)
    }

    pub fn search(&self) -> Duration {
        Duration::from_millis(self.search_ms)
    }

    pub fn health(&self) -> Duration {
        Duration::from_millis(self.health_ms)
    }
}

fn default_proxy_ms() -> u64 {
    30_000
}

fn default_search_ms() -> u64 {
    5_000
}

fn default_health_ms() -> u64 {
    5_000
}
