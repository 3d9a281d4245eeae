//! HTTP Client Registry (spec.md §4.8) — a boundary collaborator consumed
//! only by the `http` node executor. Built around a registry-keyed-by-
//! string-id lookup (the same shape as the node kind registry) carrying
//! per-client auth and an `SsrfPolicy` rather than a single global reqwest
//! client.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client as ReqwestClient;

use crate::config::EngineConfig;
use crate::ssrf::SsrfPolicy;

#[derive(Debug, Clone)]
pub enum AuthPlacement {
    Header,
    Query,
}

#[derive(Debug, Clone)]
pub enum AuthPolicy {
    None,
    Basic { username: String, password: String },
    Bearer { token: String },
    ApiKey { name: String, value: String, placement: AuthPlacement },
}

/// A pre-configured HTTP client: base URL prefix, default headers, auth,
/// redirect cap, and its own SSRF Guard instance.
pub struct HttpClient {
    pub base_url: Option<String>,
    pub default_headers: HashMap<String, String>,
    pub auth: AuthPolicy,
    pub redirect_cap: usize,
    pub ssrf_policy: SsrfPolicy,
    pub(crate) inner: ReqwestClient,
}

impl HttpClient {
    fn new(base_url: Option<String>, auth: AuthPolicy, redirect_cap: usize, ssrf_policy: SsrfPolicy) -> Self {
        let inner = ReqwestClient::builder()
            .redirect(reqwest::redirect::Policy::none()) // redirects are re-validated manually, see engine's http node
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client configuration is static and known-valid");
        Self {
            base_url,
            default_headers: HashMap::new(),
            auth,
            redirect_cap,
            ssrf_policy,
            inner,
        }
    }

    pub fn resolve_url(&self, path_or_url: &str) -> String {
        match (&self.base_url, path_or_url.starts_with("http://") || path_or_url.starts_with("https://")) {
            (_, true) => path_or_url.to_string(),
            (Some(base), false) => format!("{}{}", base.trim_end_matches('/'), path_or_url),
            (None, false) => path_or_url.to_string(),
        }
    }

    pub fn apply_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth {
            AuthPolicy::None => builder,
            AuthPolicy::Basic { username, password } => builder.basic_auth(username, Some(password)),
            AuthPolicy::Bearer { token } => builder.bearer_auth(token),
            AuthPolicy::ApiKey { name, value, placement } => match placement {
                AuthPlacement::Header => builder.header(name, value),
                AuthPlacement::Query => builder.query(&[(name, value)]),
            },
        }
    }
}

/// Process-lifetime registry of named HTTP clients (spec.md §4.8).
/// Registration happens once at startup; the engine treats it as read-only.
#[derive(Default)]
pub struct HttpClientRegistry {
    clients: HashMap<String, Arc<HttpClient>>,
    default: Option<Arc<HttpClient>>,
}

#[derive(Debug, thiserror::Error)]
pub enum HttpClientRegistryError {
    #[error("client '{0}' is already registered")]
    DuplicateUid(String),
    #[error("no HTTP client registered for uid '{0}'")]
    UnknownUid(String),
}

impl HttpClientRegistry {
    pub fn new(config: &EngineConfig) -> Self {
        let mut registry = Self::default();
        let policy = SsrfPolicy::from_config(config);
        registry.default = Some(Arc::new(HttpClient::new(None, AuthPolicy::None, 5, policy)));
        registry
    }

    pub fn register(
        &mut self,
        uid: impl Into<String>,
        base_url: Option<String>,
        auth: AuthPolicy,
        redirect_cap: usize,
        policy: SsrfPolicy,
    ) -> Result<(), HttpClientRegistryError> {
        let uid = uid.into();
        if self.clients.contains_key(&uid) {
            return Err(HttpClientRegistryError::DuplicateUid(uid));
        }
        self.clients
            .insert(uid, Arc::new(HttpClient::new(base_url, auth, redirect_cap, policy)));
        Ok(())
    }

    pub fn get(&self, uid: Option<&str>) -> Result<Arc<HttpClient>, HttpClientRegistryError> {
        match uid {
            None => self.default.clone().ok_or_else(|| HttpClientRegistryError::UnknownUid("<default>".to_string())),
            Some(uid) => self
                .clients
                .get(uid)
                .cloned()
                .ok_or_else(|| HttpClientRegistryError::UnknownUid(uid.to_string())),
        }
    }
}
