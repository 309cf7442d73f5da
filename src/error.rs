//! Error types.
//!
//! Two families live here. [`RouteError`] is a configuration failure: it is
//! raised while route and filter tables are being built and is always fatal
//! to that build. [`AuthError`] is a per-request outcome of the
//! authentication engine that callers branch on.
//!
//! "No route matched" is not an error anywhere in this crate. Lookups return
//! `Option` and the caller decides what a miss means (usually a 404).

use std::path::PathBuf;

use chrono::TimeDelta;

use crate::method::Method;

/// A route or filter table could not be built.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    #[error("invalid pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("duplicate route {method} `{pattern}`")]
    DuplicateRoute { method: Method, pattern: String },

    #[error("duplicate filter `{name}` on `{pattern}`")]
    DuplicateFilter { name: String, pattern: String },

    #[error("unknown HTTP method `{0}`")]
    UnknownMethod(String),
}

impl RouteError {
    pub(crate) fn invalid(pattern: &str, reason: impl Into<String>) -> Self {
        Self::InvalidPattern { pattern: pattern.to_owned(), reason: reason.into() }
    }
}

/// A collaborator (token store, user store) failed.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),

    #[error("store unavailable")]
    Unavailable,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Why an authentication operation did not succeed.
///
/// The `Display` text of every variant is safe to show an end user.
/// [`AuthError::Driver`] shows only a generic message;
/// the store failure is reachable through `source()` for logs.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid username")]
    InvalidUsername,

    #[error("invalid password")]
    InvalidPassword,

    #[error("too many failed attempts from this address, retry in {}s", .retry_after.num_seconds())]
    IpThrottled { retry_after: TimeDelta },

    #[error("too many failed attempts for this account, retry in {}s", .retry_after.num_seconds())]
    UserThrottled { retry_after: TimeDelta },

    #[error("this account is disabled")]
    UserBanned,

    #[error("you must be logged in")]
    NoUser,

    #[error("internal authentication error")]
    Driver(#[source] StoreError),

    /// A configured lifetime does not fit the clock. The detail is for logs.
    #[error("internal authentication error")]
    Misconfigured(&'static str),
}

/// Fieldless mirror of [`AuthError`] for `match`-heavy callers.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum AuthErrorKind {
    InvalidUsername,
    InvalidPassword,
    IpThrottled,
    UserThrottled,
    UserBanned,
    NoUser,
    Driver,
    Misconfigured,
}

impl AuthError {
    pub fn kind(&self) -> AuthErrorKind {
        match self {
            Self::InvalidUsername => AuthErrorKind::InvalidUsername,
            Self::InvalidPassword => AuthErrorKind::InvalidPassword,
            Self::IpThrottled { .. } => AuthErrorKind::IpThrottled,
            Self::UserThrottled { .. } => AuthErrorKind::UserThrottled,
            Self::UserBanned => AuthErrorKind::UserBanned,
            Self::NoUser => AuthErrorKind::NoUser,
            Self::Driver(_) => AuthErrorKind::Driver,
            Self::Misconfigured(_) => AuthErrorKind::Misconfigured,
        }
    }

    /// How long the caller should wait before retrying, for throttling errors.
    pub fn retry_after(&self) -> Option<TimeDelta> {
        match self {
            Self::IpThrottled { retry_after } | Self::UserThrottled { retry_after } => {
                Some(*retry_after)
            }
            _ => None,
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        Self::Driver(e)
    }
}

pub type AuthResult<T> = Result<T, AuthError>;

/// Configuration could not be loaded.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation failed: {}", .0.join(", "))]
    Invalid(Vec<String>),
}
