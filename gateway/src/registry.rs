//! Service registry
//!
//! Maps logical backend names (e.g. "pokemon", "stats") to base URLs. The
//! registry is built once at startup from configuration, validated there, and
//! shared read-only by every request handler.
//!
//! ```text
//! "pokemon" → http://pokemon-service:3001
//! "stats"   → http://stats-service:3002
//! "images"  → http://image-service:3003
//! ```

use http::Uri;
use http::uri::InvalidUri;
use indexmap::IndexMap;
use std::sync::Arc;
use url::Url;

use crate::config::KEY_PLACEHOLDER;

#[derive(Clone, Debug)]
pub struct ServiceRegistry {
    /// Preserves configuration order, which is the reporting order
    inner: Arc<IndexMap<String, Url>>,
}

impl ServiceRegistry {
    pub fn new(backends: IndexMap<String, Url>) -> Self {
        Self {
            inner: Arc::new(backends),
        }
    }

    /// Base URL of a backend, or None if the name is not registered
    pub fn get(&self, name: &str) -> Option<&Url> {
        self.inner.get(name)
    }

    /// Backends in configuration order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Url)> {
        self.inner.iter()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Appends a request path (and optional query) to a backend base URL.
///
/// The result is an `http::Uri`, not a `Url`: the path is concatenated
/// verbatim with no dot-segment resolution, so the backend sees exactly what
/// the client sent after the base URL's own path.
pub fn join_path(base: &Url, path_and_query: &str) -> Result<Uri, InvalidUri> {
    let base = base.as_str().trim_end_matches('/');
    Uri::try_from(format!("{base}{path_and_query}"))
}

/// Converts an already normalized URL into a request URI.
pub fn to_uri(url: &Url) -> Result<Uri, InvalidUri> {
    Uri::try_from(url.as_str())
}

/// Expands a `{key}` path template against a base URL.
///
/// The key always lands in its own path segment and is percent-encoded, so a
/// key such as `mr. mime` or `../admin` cannot escape the template.
pub fn expand_template(base: &Url, template: &str, key: &str) -> Result<Url, url::ParseError> {
    let mut url = base.clone();
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?;
        segments.pop_if_empty();
        for segment in template.trim_start_matches('/').split('/') {
            if segment == KEY_PLACEHOLDER {
                segments.push(key);
            } else {
                segments.push(segment);
            }
        }
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_registry() -> ServiceRegistry {
        ServiceRegistry::new(IndexMap::from([
            (
                "pokemon".to_string(),
                Url::parse("http://pokemon-service:3001").unwrap(),
            ),
            (
                "stats".to_string(),
                Url::parse("http://stats-service:3002/v1/").unwrap(),
            ),
        ]))
    }

    #[test]
    fn test_lookup_and_order() {
        let registry = test_registry();

        assert_eq!(registry.len(), 2);
        assert!(!registry.is_empty());
        assert!(registry.get("images").is_none());
        assert_eq!(
            registry.get("stats").unwrap().as_str(),
            "http://stats-service:3002/v1/"
        );

        let names: Vec<_> = registry.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["pokemon", "stats"]);
    }

    #[test]
    fn test_join_path_preserves_path_and_query() {
        let registry = test_registry();

        let uri = join_path(registry.get("pokemon").unwrap(), "/api/pokemon/5?q=1&x=a%20b").unwrap();
        assert_eq!(uri.to_string(), "http://pokemon-service:3001/api/pokemon/5?q=1&x=a%20b");

        let uri = join_path(registry.get("stats").unwrap(), "/health").unwrap();
        assert_eq!(uri.to_string(), "http://stats-service:3002/v1/health");
    }

    #[test]
    fn test_join_path_keeps_dot_segments() {
        let registry = test_registry();
        let base = registry.get("pokemon").unwrap();

        let uri = join_path(base, "/api/x/../../admin?q=1").unwrap();
        assert_eq!(uri.path(), "/api/x/../../admin");
        assert_eq!(uri.query(), Some("q=1"));

        let uri = join_path(base, "/api/x/%2e%2e/%2E%2E/secret").unwrap();
        assert_eq!(uri.path(), "/api/x/%2e%2e/%2E%2E/secret");
    }

    #[test]
    fn test_to_uri() {
        let registry = test_registry();
        let uri = to_uri(registry.get("stats").unwrap()).unwrap();
        assert_eq!(uri.to_string(), "http://stats-service:3002/v1/");
    }

    #[test]
    fn test_expand_template() {
        let registry = test_registry();

        let url = expand_template(registry.get("pokemon").unwrap(), "/pokemon/{key}", "pikachu")
            .unwrap();
        assert_eq!(url.as_str(), "http://pokemon-service:3001/pokemon/pikachu");

        let url = expand_template(registry.get("stats").unwrap(), "/stats/{key}/base", "mr. mime")
            .unwrap();
        assert_eq!(url.as_str(), "http://stats-service:3002/v1/stats/mr.%20mime/base");

        let url = expand_template(registry.get("pokemon").unwrap(), "/pokemon/{key}", "a/b")
            .unwrap();
        assert_eq!(url.as_str(), "http://pokemon-service:3001/pokemon/a%2Fb");
    }
}
