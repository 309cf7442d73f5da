//! Collaborator interfaces consumed by the authentication engine.
//!
//! The engine owns no storage. Tokens, attempt history and users live
//! behind [`TokenStore`] and [`UserStore`], which are shared by every
//! request and are expected to do I/O. The session and the cookie jar are
//! request-scoped and in-memory from the engine's point of view; persisting
//! them (and signing cookies) is the caller's job.

use std::fmt;
use std::net::IpAddr;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};

use crate::error::StoreResult;

/// Stable identifier of a user account.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A stored session or persistent token. Only the hash is ever persisted.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AuthToken {
    pub hash: String,
    pub user_id: UserId,
    pub expires_at: DateTime<Utc>,
}

impl AuthToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// The two token namespaces. A hash is only ever looked up in its own.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TokenKind {
    /// Short-lived, proves a login for the current browser session.
    Session,
    /// Long-lived, single-use, carried in a cookie to re-establish a session.
    Persistent,
}

/// One entry of the append-only login audit log.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AuthAttempt {
    pub success: bool,
    pub fraud: bool,
    pub ip: IpAddr,
    pub at: DateTime<Utc>,
    /// `None` when the attempt could not be tied to an account.
    pub user_id: Option<UserId>,
}

/// Failed attempts within a look-back window.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct AttemptWindow {
    pub failures: u32,
    pub last_failure: Option<DateTime<Utc>>,
}

/// Token and attempt persistence.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn find_token(&self, kind: TokenKind, hash: &str) -> StoreResult<Option<AuthToken>>;

    async fn insert_token(&self, kind: TokenKind, token: AuthToken) -> StoreResult<()>;

    /// Moves the expiration of an existing token. A missing token is not an error.
    async fn update_token_expiry(
        &self,
        kind: TokenKind,
        hash: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Deletes a token. A missing token is not an error.
    async fn delete_token(&self, kind: TokenKind, hash: &str) -> StoreResult<()>;

    /// Deletes every session and persistent token belonging to `user_id`.
    async fn delete_tokens_for_user(&self, user_id: UserId) -> StoreResult<()>;

    async fn record_attempt(&self, attempt: AuthAttempt) -> StoreResult<()>;

    async fn failed_attempts_by_ip(
        &self,
        ip: IpAddr,
        since: DateTime<Utc>,
    ) -> StoreResult<AttemptWindow>;

    async fn failed_attempts_by_user(
        &self,
        user_id: UserId,
        since: DateTime<Utc>,
    ) -> StoreResult<AttemptWindow>;
}

/// What the engine needs to know about an account.
pub trait AuthUser: Clone + Send + Sync {
    fn id(&self) -> UserId;
    fn is_banned(&self) -> bool;
}

/// Account lookup and credential checks.
#[async_trait]
pub trait UserStore: Send + Sync {
    type User: AuthUser;

    async fn find_by_id(&self, id: UserId) -> StoreResult<Option<Self::User>>;

    async fn find_by_username(&self, username: &str) -> StoreResult<Option<Self::User>>;

    async fn verify_password(&self, user: &Self::User, plaintext: &str) -> StoreResult<bool>;

    /// Called once per successful login, after tokens are issued.
    async fn record_login(&self, user: &Self::User, at: DateTime<Utc>) -> StoreResult<()>;
}

/// A value kept in the session.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionValue {
    Int(i64),
    Text(String),
    Time(DateTime<Utc>),
}

/// The current request's session.
pub trait SessionStore: Send {
    fn get(&self, key: &str) -> Option<SessionValue>;

    /// Stores a value and marks the session dirty.
    fn set(&mut self, key: &str, value: SessionValue);

    fn forget(&mut self, key: &str);

    /// Issues a new session identifier, keeping the stored values.
    fn regenerate_id(&mut self);

    fn get_int(&self, key: &str) -> Option<i64> {
        match self.get(key)? {
            SessionValue::Int(v) => Some(v),
            _ => None,
        }
    }

    fn get_text(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            SessionValue::Text(v) => Some(v),
            _ => None,
        }
    }

    fn get_time(&self, key: &str) -> Option<DateTime<Utc>> {
        match self.get(key)? {
            SessionValue::Time(v) => Some(v),
            _ => None,
        }
    }
}

/// The current request/response cookie pair. Values are assumed signed.
pub trait CookieStore: Send {
    fn get(&self, name: &str) -> Option<String>;

    fn set(&mut self, name: &str, value: &str, max_age: TimeDelta);

    fn delete(&mut self, name: &str);
}

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
