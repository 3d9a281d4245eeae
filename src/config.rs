//! Process-wide engine limits, never mutated during a run: a plain struct
//! with documented defaults, fluent `#[must_use]` `with_*` builder methods,
//! and a `dotenvy`-backed `from_env()` constructor.

use std::time::Duration;

/// Engine-wide resource limits. Construct via [`EngineConfig::default`] and
/// override with the `with_*` builders, or via [`EngineConfig::from_env`].
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub max_execution_time: Duration,
    pub max_node_executions: u64,
    pub max_http_calls_per_exec: u64,
    pub max_loop_iterations: u64,
    pub max_response_size: usize,
    pub max_string_length: usize,
    pub max_array_size: usize,
    pub max_object_depth: usize,
    pub max_object_keys: usize,
    /// Schemes the SSRF Guard accepts by default (spec.md §4.2).
    pub allowed_schemes: Vec<String>,
    pub allow_private_ips: bool,
    pub allow_localhost: bool,
    pub allow_link_local: bool,
    pub allow_cloud_metadata: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_execution_time: Duration::from_secs(5 * 60),
            max_node_executions: 10_000,
            max_http_calls_per_exec: 100,
            max_loop_iterations: 10_000,
            max_response_size: 10 * 1024 * 1024,
            max_string_length: 1024 * 1024,
            max_array_size: 10_000,
            max_object_depth: 10,
            max_object_keys: 1_000,
            allowed_schemes: vec!["https".to_string()],
            allow_private_ips: false,
            allow_localhost: false,
            allow_link_local: false,
            allow_cloud_metadata: false,
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn with_max_execution_time(mut self, d: Duration) -> Self {
        self.max_execution_time = d;
        self
    }

    #[must_use]
    pub fn with_max_node_executions(mut self, n: u64) -> Self {
        self.max_node_executions = n;
        self
    }

    #[must_use]
    pub fn with_max_http_calls_per_exec(mut self, n: u64) -> Self {
        self.max_http_calls_per_exec = n;
        self
    }

    #[must_use]
    pub fn with_max_loop_iterations(mut self, n: u64) -> Self {
        self.max_loop_iterations = n;
        self
    }

    #[must_use]
    pub fn with_allow_http_dev_scheme(mut self) -> Self {
        if !self.allowed_schemes.iter().any(|s| s == "http") {
            self.allowed_schemes.push("http".to_string());
        }
        self
    }

    /// Opt into `127.0.0.1`/`localhost` egress — for local development and
    /// test fixtures (mock HTTP servers) only, never production.
    #[must_use]
    pub fn with_allow_localhost(mut self) -> Self {
        self.allow_localhost = true;
        self
    }

    /// Load overrides from the environment. Calls `dotenvy::dotenv()` first
    /// (ignoring a missing `.env`, matching `RuntimeConfig::from_env`), then
    /// reads `FLOWGRAPH_MAX_*` variables, falling back to the default for
    /// anything unset or unparsable.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let mut cfg = Self::default();

        if let Some(v) = env_u64("FLOWGRAPH_MAX_EXECUTION_TIME_MS") {
            cfg.max_execution_time = Duration::from_millis(v);
        }
        if let Some(v) = env_u64("FLOWGRAPH_MAX_NODE_EXECUTIONS") {
            cfg.max_node_executions = v;
        }
        if let Some(v) = env_u64("FLOWGRAPH_MAX_HTTP_CALLS") {
            cfg.max_http_calls_per_exec = v;
        }
        if let Some(v) = env_u64("FLOWGRAPH_MAX_LOOP_ITERATIONS") {
            cfg.max_loop_iterations = v;
        }
        if let Some(v) = env_usize("FLOWGRAPH_MAX_RESPONSE_SIZE") {
            cfg.max_response_size = v;
        }
        if let Some(v) = env_usize("FLOWGRAPH_MAX_STRING_LENGTH") {
            cfg.max_string_length = v;
        }
        if let Some(v) = env_usize("FLOWGRAPH_MAX_ARRAY_SIZE") {
            cfg.max_array_size = v;
        }
        if let Some(v) = env_usize("FLOWGRAPH_MAX_OBJECT_DEPTH") {
            cfg.max_object_depth = v;
        }
        if let Some(v) = env_usize("FLOWGRAPH_MAX_OBJECT_KEYS") {
            cfg.max_object_keys = v;
        }
        cfg
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

fn env_usize(name: &str) -> Option<usize> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.max_execution_time, Duration::from_secs(300));
        assert_eq!(cfg.max_node_executions, 10_000);
        assert_eq!(cfg.max_http_calls_per_exec, 100);
        assert_eq!(cfg.allowed_schemes, vec!["https".to_string()]);
    }

    #[test]
    fn builder_overrides_apply() {
        let cfg = EngineConfig::default().with_max_node_executions(5);
        assert_eq!(cfg.max_node_executions, 5);
    }
}
