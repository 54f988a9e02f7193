//! Server configuration.

use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::defaults;
use crate::error::{Error, Result};
use crate::fingerprint::DeploymentFingerprint;

/// Tunables for the log, the registry and the long-poll coordinator.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Number of events the broadcast log retains.
    pub buffer_capacity: usize,
    /// Coalescing window once events are available.
    pub min_wait: Duration,
    /// Longest an idle poll is held open.
    pub max_wait: Duration,
    /// Sliding idle TTL for sessions.
    pub session_ttl: Duration,
    /// How often the sweeper looks for idle sessions.
    pub sweep_interval: Duration,
    /// Budget of the enclosing request; a poll still waiting past it fails
    /// with a connection timeout.
    pub request_timeout: Duration,
    /// Deployment fingerprint served to the compatibility probe.
    pub fingerprint: DeploymentFingerprint,
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: defaults::BUFFER_CAPACITY,
            min_wait: Duration::from_millis(defaults::MIN_WAIT_MS),
            max_wait: Duration::from_millis(defaults::MAX_WAIT_MS),
            session_ttl: Duration::from_secs(defaults::SESSION_TTL_SECS),
            sweep_interval: Duration::from_secs(defaults::SWEEP_INTERVAL_SECS),
            request_timeout: Duration::from_millis(defaults::REQUEST_TIMEOUT_MS),
            fingerprint: DeploymentFingerprint::compiled(),
            host: "0.0.0.0".to_string(),
            port: defaults::SERVER_PORT,
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `COMETBUS_BUFFER_SIZE` | `1024` | Events retained by the log |
    /// | `COMETBUS_MIN_WAIT_MS` | `1000` | Coalescing window |
    /// | `COMETBUS_MAX_WAIT_MS` | `10000` | Idle poll hold time |
    /// | `COMETBUS_SESSION_TTL_SECS` | `30` | Sliding session idle TTL |
    /// | `COMETBUS_SWEEP_INTERVAL_SECS` | `5` | Expiry sweep interval |
    /// | `COMETBUS_REQUEST_TIMEOUT_MS` | `30000` | Request budget around a poll |
    /// | `COMETBUS_FINGERPRINT` | build value | Deployment fingerprint |
    /// | `HOST` | `0.0.0.0` | Bind address |
    /// | `PORT` | `3000` | Bind port |
    pub fn from_env() -> Self {
        let base = Self::default();
        Self {
            buffer_capacity: env_or("COMETBUS_BUFFER_SIZE", base.buffer_capacity),
            min_wait: Duration::from_millis(env_or(
                "COMETBUS_MIN_WAIT_MS",
                defaults::MIN_WAIT_MS,
            )),
            max_wait: Duration::from_millis(env_or(
                "COMETBUS_MAX_WAIT_MS",
                defaults::MAX_WAIT_MS,
            )),
            session_ttl: Duration::from_secs(env_or(
                "COMETBUS_SESSION_TTL_SECS",
                defaults::SESSION_TTL_SECS,
            )),
            sweep_interval: Duration::from_secs(
                env_or("COMETBUS_SWEEP_INTERVAL_SECS", defaults::SWEEP_INTERVAL_SECS).max(1),
            ),
            request_timeout: Duration::from_millis(env_or(
                "COMETBUS_REQUEST_TIMEOUT_MS",
                defaults::REQUEST_TIMEOUT_MS,
            )),
            fingerprint: DeploymentFingerprint::from_env(),
            host: std::env::var("HOST").unwrap_or(base.host),
            port: env_or("PORT", base.port),
        }
    }

    /// Reject combinations the coordinator cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.buffer_capacity == 0 {
            return Err(Error::Config("buffer capacity must be positive".into()));
        }
        if self.min_wait > self.max_wait {
            return Err(Error::Config(format!(
                "min wait {:?} exceeds max wait {:?}",
                self.min_wait, self.max_wait
            )));
        }
        if self.request_timeout <= self.max_wait {
            return Err(Error::Config(format!(
                "request timeout {:?} must exceed max wait {:?}",
                self.request_timeout, self.max_wait
            )));
        }
        Ok(())
    }

    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    /// Set both wait bounds.
    pub fn with_waits(mut self, min_wait: Duration, max_wait: Duration) -> Self {
        self.min_wait = min_wait;
        self.max_wait = max_wait;
        self
    }

    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
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

    /// `host:port` for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Parse `var`, falling back to `default` when unset or invalid.
pub fn env_or<T>(var: &str, default: T) -> T
where
    T: FromStr + std::fmt::Debug,
{
    match std::env::var(var) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(var, value = %raw, ?default, "Invalid value, using default");
            default
        }),
        Err(_) => default,
    }
}
