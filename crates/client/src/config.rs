//! Client configuration and endpoint derivation.

use jobsync_shared::JobSubscription;
use url::Url;

use crate::error::ClientError;
use crate::ws::ReconnectConfig;

/// Path appended to the API base URL to reach the job event socket.
pub const DEFAULT_WS_PATH: &str = "/ws/jobs";

/// Default capacity of the per-event change stream.
pub const DEFAULT_CHANGE_BUFFER: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// HTTP(S) base URL of the API, e.g. `https://media.example.com/api/v1`.
    pub api_base_url: String,
    pub ws_path: String,
    pub reconnect: ReconnectConfig,
    /// Filter sent on every (re-)authentication.
    pub subscription: JobSubscription,
    pub change_buffer: usize,
}

impl ClientConfig {
    pub fn new(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            ws_path: DEFAULT_WS_PATH.to_string(),
            reconnect: ReconnectConfig::default(),
            subscription: JobSubscription::all_active(),
            change_buffer: DEFAULT_CHANGE_BUFFER,
        }
    }

    pub fn with_subscription(mut self, subscription: JobSubscription) -> Self {
        self.subscription = subscription;
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Parse configuration from environment variables.
    ///
    /// Environment variables:
    /// - `JOBSYNC_API_URL`: API base URL (default: "http://localhost:8000/api")
    /// - `JOBSYNC_WS_PATH`: socket path appended to the base URL (default: "/ws/jobs")
    /// - `JOBSYNC_RECONNECT_INITIAL_MS`: first backoff delay (default: 1000)
    /// - `JOBSYNC_RECONNECT_MAX_MS`: backoff cap (default: 30000)
    /// - `JOBSYNC_RECONNECT_MAX_ATTEMPTS`: give up after this many attempts (default: 0 = never)
    /// - `JOBSYNC_JOB_TYPES`: comma-separated job type filter (default: no filter)
    /// - `JOBSYNC_JOB_IDS`: comma-separated job id filter (default: no filter)
    /// - `JOBSYNC_INCLUDE_ACTIVE`: replay in-flight jobs on subscribe (default: true)
    pub fn from_env() -> Self {
        let api_base_url = std::env::var("JOBSYNC_API_URL")
            .unwrap_or_else(|_| "http://localhost:8000/api".to_string());
        let mut config = Self::new(api_base_url);

        if let Ok(path) = std::env::var("JOBSYNC_WS_PATH") {
            config.ws_path = path;
        }
        if let Some(ms) = env_parse("JOBSYNC_RECONNECT_INITIAL_MS") {
            config.reconnect.initial_delay_ms = ms;
        }
        if let Some(ms) = env_parse("JOBSYNC_RECONNECT_MAX_MS") {
            config.reconnect.max_delay_ms = ms;
        }
        if let Some(attempts) = env_parse("JOBSYNC_RECONNECT_MAX_ATTEMPTS") {
            config.reconnect.max_attempts = attempts;
        }
        config.subscription = JobSubscription {
            job_types: env_list("JOBSYNC_JOB_TYPES"),
            job_ids: env_list("JOBSYNC_JOB_IDS"),
            include_active_state: std::env::var("JOBSYNC_INCLUDE_ACTIVE")
                .map(|v| !matches!(v.trim().to_lowercase().as_str(), "0" | "false" | "no"))
                .unwrap_or(true),
        };
        config
    }

    /// The socket URL derived from the API base URL.
    pub fn ws_endpoint(&self) -> Result<String, ClientError> {
        ws_endpoint(&self.api_base_url, &self.ws_path)
    }
}

/// Convert an HTTP(S) base URL to WS/WSS and append `path`.
///
/// Query and fragment of the base URL are dropped.
pub fn ws_endpoint(api_base_url: &str, path: &str) -> Result<String, ClientError> {
    let mut url = Url::parse(api_base_url.trim())
        .map_err(|e| ClientError::InvalidBaseUrl(format!("{api_base_url}: {e}")))?;

    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => return Err(ClientError::UnsupportedScheme(other.to_string())),
    };
    url.set_scheme(scheme)
        .map_err(|_| ClientError::UnsupportedScheme(scheme.to_string()))?;

    let joined = format!(
        "{}/{}",
        url.path().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    url.set_path(&joined);
    url.set_query(None);
    url.set_fragment(None);
    Ok(url.to_string())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            crate::log_warn!("Ignoring invalid {}={:?}", name, raw);
            None
        }
    }
}

fn env_list(name: &str) -> Option<Vec<String>> {
    let raw = std::env::var(name).ok()?;
    let items: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToOwned::to_owned)
        .collect();
    (!items.is_empty()).then_some(items)
}
