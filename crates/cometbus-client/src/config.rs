//! Client configuration.

use std::time::Duration;

use cometbus_core::config::env_or;
use cometbus_core::{defaults, DeploymentFingerprint};

/// Where the server lives and how patiently to retry it.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server base URL, without a trailing slash.
    pub base_url: String,
    /// Fixed delay before every resume or new-session attempt.
    pub retry_delay: Duration,
    /// Per-request timeout; must exceed the server's max wait.
    pub request_timeout: Duration,
    /// Fingerprint this client was built against.
    pub fingerprint: DeploymentFingerprint,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::SERVER_URL.to_string(),
            retry_delay: Duration::from_millis(defaults::RETRY_DELAY_MS),
            request_timeout: Duration::from_millis(defaults::REQUEST_TIMEOUT_MS),
            fingerprint: DeploymentFingerprint::compiled(),
        }
    }
}

impl ClientConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `COMETBUS_URL` | `http://127.0.0.1:3000` | Server base URL |
    /// | `COMETBUS_RETRY_DELAY_MS` | `3000` | Resume / new-session retry delay |
    /// | `COMETBUS_REQUEST_TIMEOUT_MS` | `30000` | Per-request timeout |
    /// | `COMETBUS_FINGERPRINT` | build value | Expected deployment fingerprint |
    pub fn from_env() -> Self {
        let base = Self::default();
        Self {
            base_url: std::env::var("COMETBUS_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(base.base_url),
            retry_delay: Duration::from_millis(env_or(
                "COMETBUS_RETRY_DELAY_MS",
                defaults::RETRY_DELAY_MS,
            )),
            request_timeout: Duration::from_millis(env_or(
                "COMETBUS_REQUEST_TIMEOUT_MS",
                defaults::REQUEST_TIMEOUT_MS,
            )),
            fingerprint: DeploymentFingerprint::from_env(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_fingerprint(mut self, fingerprint: DeploymentFingerprint) -> Self {
        self.fingerprint = fingerprint;
        self
    }
}
