//! Deployment fingerprint used by the compatibility probe.
//!
//! The server publishes its fingerprint at `/variant/<fingerprint>`; a client
//! that lost its poll loop checks that path with its own compiled-in copy
//! before resuming. A 404 means the server was redeployed and the old session
//! identity space is gone.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::defaults::FINGERPRINT_PATH;
use crate::error::{Error, Result};

/// Fingerprint baked in at build time, falling back to the crate version.
const COMPILED_FINGERPRINT: &str = match option_env!("COMETBUS_FINGERPRINT") {
    Some(value) => value,
    None => env!("CARGO_PKG_VERSION"),
};

/// Opaque build/deployment token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeploymentFingerprint(String);

impl DeploymentFingerprint {
    /// Build a fingerprint; it must be usable as a single URL path segment.
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        let valid = !value.is_empty()
            && value
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(Error::Config(format!("invalid deployment fingerprint: {:?}", value)));
        }
        Ok(Self(value))
    }

    /// The value compiled into this binary.
    pub fn compiled() -> Self {
        Self(COMPILED_FINGERPRINT.to_string())
    }

    /// `COMETBUS_FINGERPRINT` from the environment, else the compiled value.
    pub fn from_env() -> Self {
        std::env::var("COMETBUS_FINGERPRINT")
            .ok()
            .and_then(|v| Self::new(v).ok())
            .unwrap_or_else(Self::compiled)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn matches(&self, candidate: &str) -> bool {
        self.0 == candidate
    }

    /// Relative resource path probed by clients, e.g. `variant/1.2.0`.
    pub fn resource_path(&self) -> String {
        format!("{}/{}", FINGERPRINT_PATH, self.0)
    }
}

impl Default for DeploymentFingerprint {
    fn default() -> Self {
        Self::compiled()
    }
}

impl fmt::Display for DeploymentFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
