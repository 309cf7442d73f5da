//! Configuration.
//!
//! Every section and field has a default, so an empty file is a valid
//! configuration:
//!
//! ```toml
//! [auth]
//! session_timeout_secs = 3600
//! session_token_ttl_secs = 3600
//! persistent_token_ttl_secs = 2592000
//! persistent_cookie = "remember_token"
//! token_bytes = 128
//!
//! [throttle]
//! window_secs = 900
//! escalation_secs = [0, 0, 0, 2, 4, 8, 16, 30, 60, 120, 300]
//! ```
//!
//! Syntax errors come from serde; semantic checks live in [`Config::validate`]
//! and report every problem at once.

use std::fs;
use std::path::Path;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::auth::throttle::{DEFAULT_ESCALATION_SECS, DEFAULT_WINDOW_SECS};
use crate::error::ConfigError;

const MIN_TOKEN_BYTES: usize = 16;

/// Upper bound for every configured duration and escalation wait (100 years).
/// Larger values would overflow token expiry arithmetic.
pub const MAX_DURATION_SECS: i64 = 100 * 365 * 24 * 60 * 60;

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub auth: AuthConfig,
    pub throttle: ThrottleConfig,
}

/// Session and token lifetimes.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AuthConfig {
    /// Idle time after which a session login is dropped.
    pub session_timeout_secs: i64,

    /// Lifetime of a session token record.
    pub session_token_ttl_secs: i64,

    /// Lifetime of a persistent ("remember me") token and its cookie.
    pub persistent_token_ttl_secs: i64,

    /// Name of the persistent-token cookie.
    pub persistent_cookie: String,

    /// Random bytes per generated token.
    pub token_bytes: usize,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_timeout_secs: 60 * 60,
            session_token_ttl_secs: 60 * 60,
            persistent_token_ttl_secs: 30 * 24 * 60 * 60,
            persistent_cookie: "remember_token".to_owned(),
            token_bytes: 128,
        }
    }
}

impl AuthConfig {
    pub fn session_timeout(&self) -> TimeDelta {
        saturating_seconds(self.session_timeout_secs)
    }

    pub fn session_token_ttl(&self) -> TimeDelta {
        saturating_seconds(self.session_token_ttl_secs)
    }

    pub fn persistent_token_ttl(&self) -> TimeDelta {
        saturating_seconds(self.persistent_token_ttl_secs)
    }
}

/// `secs` as a `TimeDelta`, clamped to the representable range.
pub(crate) fn saturating_seconds(secs: i64) -> TimeDelta {
    TimeDelta::try_seconds(secs).unwrap_or(if secs < 0 { TimeDelta::MIN } else { TimeDelta::MAX })
}

/// Failed-attempt throttling.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Look-back window for counting failures.
    pub window_secs: i64,

    /// Wait in seconds, indexed by the number of failures in the window.
    pub escalation_secs: Vec<i64>,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            window_secs: DEFAULT_WINDOW_SECS,
            escalation_secs: DEFAULT_ESCALATION_SECS.to_vec(),
        }
    }
}

impl Config {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate().map_err(ConfigError::Invalid)?;
        Ok(config)
    }

    /// Loads and validates a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Semantic checks. Returns every problem found, not just the first.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        let auth = &self.auth;

        for (field, value) in [
            ("auth.session_timeout_secs", auth.session_timeout_secs),
            ("auth.session_token_ttl_secs", auth.session_token_ttl_secs),
            ("auth.persistent_token_ttl_secs", auth.persistent_token_ttl_secs),
            ("throttle.window_secs", self.throttle.window_secs),
        ] {
            if value <= 0 {
                errors.push(format!("{field} must be positive, got {value}"));
            } else if value > MAX_DURATION_SECS {
                errors.push(format!("{field} must be at most {MAX_DURATION_SECS}, got {value}"));
            }
        }

        if auth.persistent_cookie.trim().is_empty() {
            errors.push("auth.persistent_cookie must not be empty".to_owned());
        }
        if auth.token_bytes < MIN_TOKEN_BYTES {
            errors.push(format!(
                "auth.token_bytes must be at least {MIN_TOKEN_BYTES}, got {}",
                auth.token_bytes
            ));
        }

        let table = &self.throttle.escalation_secs;
        if table.is_empty() {
            errors.push("throttle.escalation_secs must not be empty".to_owned());
        }
        if table.iter().any(|s| *s < 0) {
            errors.push("throttle.escalation_secs must not contain negative waits".to_owned());
        }
        if table.iter().any(|s| *s > MAX_DURATION_SECS) {
            errors.push(format!(
                "throttle.escalation_secs must not contain waits above {MAX_DURATION_SECS}"
            ));
        }
        if table.windows(2).any(|w| w[1] < w[0]) {
            errors.push("throttle.escalation_secs must be non-decreasing".to_owned());
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}
