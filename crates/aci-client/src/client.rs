//! ACI API client
//!
//! Holds the connection settings shared by every endpoint and record: the API
//! base URL, the token, the HTTP session and the pagination switches.

use crate::common::query::{DEFAULT_MAX_WORKERS, Request};
use crate::common::{HttpSession, ReqwestSession};
use crate::endpoint::Endpoint;
use crate::error::AciError;
use reqwest::Url;
use serde_json::Value;
use std::env;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Client configuration
#[derive(Clone)]
pub struct ClientConfig {
    /// API root, e.g. "http://netbox:80/api"
    pub base_url: String,
    pub token: Option<String>,
    /// Fetch remaining pages concurrently once the first page is known
    pub threading: bool,
    pub max_workers: usize,
    /// Validate filter names against the OpenAPI document
    pub strict_filters: bool,
    pub timeout: Duration,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("threading", &self.threading)
            .field("max_workers", &self.max_workers)
            .field("strict_filters", &self.strict_filters)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
            threading: false,
            max_workers: DEFAULT_MAX_WORKERS,
            strict_filters: false,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_threading(mut self, threading: bool) -> Self {
        self.threading = threading;
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_strict_filters(mut self, strict_filters: bool) -> Self {
        self.strict_filters = strict_filters;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Load configuration from environment variables
    ///
    /// * `ACI_URL` - API root (default "http://localhost:8000/api")
    /// * `ACI_TOKEN` - API token (optional)
    /// * `ACI_THREADING` - "true"/"false"
    /// * `ACI_MAX_WORKERS` - concurrent page fetches
    /// * `ACI_STRICT_FILTERS` - "true"/"false"
    /// * `ACI_TIMEOUT_SECS` - request timeout in seconds
    pub fn from_env() -> Result<Self, AciError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AciError> {
        let base_url = lookup("ACI_URL").unwrap_or_else(|| "http://localhost:8000/api".to_string());
        let mut config = Self::new(base_url);
        config.token = lookup("ACI_TOKEN").filter(|t| !t.is_empty());

        if let Some(raw) = lookup("ACI_THREADING") {
            config.threading = parse_bool("ACI_THREADING", &raw)?;
        }
        if let Some(raw) = lookup("ACI_STRICT_FILTERS") {
            config.strict_filters = parse_bool("ACI_STRICT_FILTERS", &raw)?;
        }
        if let Some(raw) = lookup("ACI_MAX_WORKERS") {
            config.max_workers = raw.trim().parse().map_err(|_| {
                AciError::InvalidConfig(format!(
                    "ACI_MAX_WORKERS must be a positive integer, got {:?}",
                    raw
                ))
            })?;
        }
        if let Some(raw) = lookup("ACI_TIMEOUT_SECS") {
            let secs: u64 = raw.trim().parse().map_err(|_| {
                AciError::InvalidConfig(format!(
                    "ACI_TIMEOUT_SECS must be a number of seconds, got {:?}",
                    raw
                ))
            })?;
            config.timeout = Duration::from_secs(secs);
        }

        if config.max_workers == 0 {
            return Err(AciError::InvalidConfig(
                "ACI_MAX_WORKERS must be at least 1".to_string(),
            ));
        }
        Ok(config)
    }
}

fn parse_bool(name: &str, raw: &str) -> Result<bool, AciError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(AciError::InvalidConfig(format!(
            "{} must be a boolean, got {:?}",
            name, raw
        ))),
    }
}

/// ACI API client
///
/// Cheap to clone; endpoints and records each hold a clone.
#[derive(Clone)]
pub struct AciClient {
    config: Arc<ClientConfig>,
    session: Arc<dyn HttpSession>,
}

impl fmt::Debug for AciClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AciClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AciClient {
    /// Create a new client backed by reqwest
    pub fn new(config: ClientConfig) -> Result<Self, AciError> {
        let session = ReqwestSession::new(config.timeout)?;
        Ok(Self::with_session(config, Arc::new(session)))
    }

    /// Create a client over any [`HttpSession`]
    pub fn with_session(config: ClientConfig, session: Arc<dyn HttpSession>) -> Self {
        Self {
            config: Arc::new(config),
            session,
        }
    }

    /// Get the base URL (no trailing slash)
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    pub fn token(&self) -> Option<&str> {
        self.config.token.as_deref()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Endpoint `{base_url}/{app}/{name}`; underscores in `name` become dashes
    pub fn endpoint(&self, app: &str, name: &str) -> Endpoint {
        Endpoint::new(self.clone(), app, name)
    }

    /// Request against `base` carrying this client's token and session
    pub fn request(&self, base: &str) -> Request {
        Request::new(base, Arc::clone(&self.session)).with_token(self.config.token.clone())
    }

    /// Like [`AciClient::request`], with the concurrent pagination settings applied
    pub(crate) fn list_request(&self, base: &str) -> Request {
        self.request(base)
            .with_threading(self.config.threading, self.config.max_workers)
    }

    /// API version from the `API-Version` header ("" when absent)
    pub async fn version(&self) -> Result<String, AciError> {
        self.request(&self.config.base_url).get_version().await
    }

    /// OpenAPI document for this API
    pub async fn openapi(&self) -> Result<Value, AciError> {
        self.request(&self.config.base_url).get_openapi().await
    }

    /// Server status (`{base_url}/status/`)
    pub async fn status(&self) -> Result<Value, AciError> {
        self.request(&self.config.base_url).get_status().await
    }

    /// Path component of the base URL, e.g. "/api"
    pub(crate) fn base_path(&self) -> String {
        Url::parse(&self.config.base_url)
            .map(|url| url.path().trim_end_matches('/').to_string())
            .unwrap_or_default()
    }

    /// Resolve the endpoint a record URL belongs to
    ///
    /// `http://host/api/dcim/devices/1/` resolves to the `dcim/devices`
    /// endpoint and `http://host/api/plugins/bgp/sessions/4/` to
    /// `plugins/bgp/sessions`.
    pub fn endpoint_from_url(&self, url: &str) -> Option<Endpoint> {
        let path = Url::parse(url).ok()?.path().to_string();
        let relative = path.strip_prefix(&self.base_path()).unwrap_or(&path);
        let segments: Vec<&str> = relative.split('/').filter(|s| !s.is_empty()).collect();

        let endpoint = match segments.as_slice() {
            ["plugins", plugin, name, ..] => {
                self.endpoint(&format!("plugins/{}", plugin), name)
            }
            [app, name, ..] => self.endpoint(app, name),
            _ => return None,
        };
        debug!("Resolved {} to endpoint {}", url, endpoint.url());
        Some(endpoint)
    }
}
