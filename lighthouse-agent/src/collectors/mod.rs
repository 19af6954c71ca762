//! Metric collectors
//!
//! A collector turns an instance's opaque parameters into zero or more flat metric
//! records for one cycle. Collectors are looked up by source name; several names can
//! alias the same collector.
//!
//! Every built-in collector bounds its own runtime (probe timeouts, subprocess
//! timeouts). The worker adds an outer budget on top.

mod docker;
mod exec;
mod meshtastic;
mod ollama;
mod starlink;
mod system;
mod uptime;

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use docker::DockerCollector;
pub use exec::ExecCollector;
pub use meshtastic::MeshtasticCollector;
pub use ollama::OllamaCollector;
pub use starlink::StarlinkCollector;
pub use system::SystemCollector;
pub use uptime::UptimeCollector;

/// One flat record: field name to scalar value
pub type MetricRecord = Map<String, Value>;

/// Instance parameters handed verbatim to the collector
pub type Params = HashMap<String, String>;

#[derive(Debug, Error)]
pub enum CollectError {
    #[error("unknown source: {0}")]
    UnknownSource(String),

    #[error("missing '{0}' param")]
    MissingParam(&'static str),

    #[error("{what} timed out after {after:?}")]
    Timeout { what: String, after: Duration },

    #[error("command failed: {0}")]
    Command(String),

    #[error("probe failed: {0}")]
    Probe(#[from] reqwest::Error),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait Collector: Send + Sync {
    async fn collect(&self, params: &Params) -> Result<Vec<MetricRecord>, CollectError>;
}

/// Name to collector mapping, built once and shared read-only
#[derive(Clone, Default)]
pub struct CollectorRegistry {
    collectors: HashMap<String, Arc<dyn Collector>>,
}

impl CollectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in collector under all of its aliases
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_aliases(
            &["linux", "system", "windows", "macos"],
            Arc::new(SystemCollector),
        );
        registry.register_aliases(&["exec", "script", "custom"], Arc::new(ExecCollector));
        registry.register("uptime", Arc::new(UptimeCollector));
        registry.register("docker", Arc::new(DockerCollector));
        registry.register_aliases(&["ollama", "llm", "ai"], Arc::new(OllamaCollector));
        registry.register_aliases(&["starlink", "dishy"], Arc::new(StarlinkCollector));
        registry.register("meshtastic", Arc::new(MeshtasticCollector));
        registry
    }

    pub fn register(&mut self, name: &str, collector: Arc<dyn Collector>) {
        self.collectors.insert(name.to_string(), collector);
    }

    fn register_aliases(&mut self, names: &[&str], collector: Arc<dyn Collector>) {
        for name in names {
            self.register(name, collector.clone());
        }
    }

    pub fn resolve(&self, source: &str) -> Result<Arc<dyn Collector>, CollectError> {
        self.collectors
            .get(source)
            .cloned()
            .ok_or_else(|| CollectError::UnknownSource(source.to_string()))
    }
}

/// `timeout_ms` param, falling back to `default` when absent or not a positive integer
pub(crate) fn timeout_param(params: &Params, default: Duration) -> Duration {
    params
        .get("timeout_ms")
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
        .unwrap_or(default)
}

/// Build a record from `(field, value)` pairs
pub(crate) fn record<I>(fields: I) -> MetricRecord
where
    I: IntoIterator<Item = (&'static str, Value)>,
{
    fields
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_aliases_resolve() {
        let registry = CollectorRegistry::with_builtins();
        for name in [
            "linux", "system", "windows", "macos", "exec", "script", "custom", "uptime",
            "docker", "ollama", "llm", "ai", "starlink", "dishy", "meshtastic",
        ] {
            assert!(registry.resolve(name).is_ok(), "missing collector {}", name);
        }
    }

    #[test]
    fn test_unknown_source() {
        let registry = CollectorRegistry::with_builtins();
        match registry.resolve("telepathy") {
            Err(CollectError::UnknownSource(name)) => assert_eq!(name, "telepathy"),
            Err(e) => panic!("unexpected error {}", e),
            Ok(_) => panic!("telepathy should not resolve"),
        }
        assert_eq!(
            CollectError::UnknownSource("x".into()).to_string(),
            "unknown source: x"
        );
    }

    #[test]
    fn test_timeout_param() {
        let mut params = Params::new();
        let default = Duration::from_secs(10);
        assert_eq!(timeout_param(&params, default), default);

        params.insert("timeout_ms".into(), "250".into());
        assert_eq!(timeout_param(&params, default), Duration::from_millis(250));

        params.insert("timeout_ms".into(), "0".into());
        assert_eq!(timeout_param(&params, default), default);

        params.insert("timeout_ms".into(), "soon".into());
        assert_eq!(timeout_param(&params, default), default);
    }
}
