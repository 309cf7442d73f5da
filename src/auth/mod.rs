//! Session and persistent-token authentication.
//!
//! # Shape
//!
//! [`AuthServices`] holds everything shared between requests: the token and
//! user stores, the clock, configuration and throttling policy. For each
//! request, [`AuthServices::for_request`] produces an [`Auth`] context that
//! borrows that request's session, cookie jar and client address. Nothing is
//! thread-local; tests build a context from in-memory collaborators.
//!
//! # Resolution
//!
//! The first call that needs the current user resolves it, and the result is
//! memoized for the rest of the request:
//!
//! ```text
//! session has {token, last_active, user_id}?
//!     idle longer than session_timeout     → end session
//!     token missing / other user / expired → end session
//!     otherwise                            → refresh last_active, load user
//! no user yet and persistent cookie present?
//!     address throttled                    → Err(IpThrottled)
//!     token unknown or expired             → record failure, drop cookie
//!     token's user gone                    → record failure, drop cookie
//!     token's user banned                  → not authenticated, token kept
//!     otherwise                            → full login, token rotated
//! user banned                              → not authenticated
//! ```
//!
//! Store failures surface as [`AuthError::Driver`]. A user that no longer
//! exists, or is banned, is simply "not authenticated".

pub mod store;
pub mod throttle;
pub mod token;

use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info, warn};

use crate::config::{AuthConfig, Config};
use crate::error::{AuthError, AuthResult};

use self::store::{
    AuthAttempt, AuthToken, AuthUser, Clock, CookieStore, SessionStore, SessionValue, SystemClock,
    TokenKind, TokenStore, UserId, UserStore,
};
use self::throttle::Throttle;

/// Session keys owned by the engine. All of them are cleared on logout.
pub mod session_keys {
    pub const TOKEN: &str = "auth.token";
    pub const USER_ID: &str = "auth.user_id";
    pub const LAST_ACTIVE: &str = "auth.last_active";
    pub const PASSWORD_ENTERED_AT: &str = "auth.password_entered_at";

    pub const ALL: [&str; 4] = [TOKEN, USER_ID, LAST_ACTIVE, PASSWORD_ENTERED_AT];
}

/// Collaborators and policy shared by every request.
pub struct AuthServices<U: UserStore> {
    tokens: Arc<dyn TokenStore>,
    users: Arc<U>,
    clock: Arc<dyn Clock>,
    config: AuthConfig,
    throttle: Throttle,
}

impl<U: UserStore> AuthServices<U> {
    pub fn new(tokens: Arc<dyn TokenStore>, users: Arc<U>, config: &Config) -> Self {
        Self {
            tokens,
            users,
            clock: Arc::new(SystemClock),
            config: config.auth.clone(),
            throttle: Throttle::from(&config.throttle),
        }
    }

    /// Replaces the wall clock, typically with a controllable one in tests.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn throttle(&self) -> &Throttle {
        &self.throttle
    }

    /// Authentication context for one request.
    pub fn for_request<'r>(
        &'r self,
        session: &'r mut dyn SessionStore,
        cookies: &'r mut dyn CookieStore,
        ip: IpAddr,
    ) -> Auth<'r, U> {
        Auth { services: self, session, cookies, ip, state: Resolution::Unresolved }
    }
}

enum Resolution<T> {
    Unresolved,
    Tried(Option<T>),
}

/// Per-request authentication state.
pub struct Auth<'r, U: UserStore> {
    services: &'r AuthServices<U>,
    session: &'r mut dyn SessionStore,
    cookies: &'r mut dyn CookieStore,
    ip: IpAddr,
    state: Resolution<U::User>,
}

impl<'r, U: UserStore> Auth<'r, U> {
    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    /// The authenticated user, resolving it on first use.
    ///
    /// If resolution fails, the error is returned once and the request is
    /// treated as anonymous from then on. That includes `IpThrottled` from a
    /// persistent-cookie login: later calls return `Ok(None)`.
    pub async fn user(&mut self) -> AuthResult<Option<U::User>> {
        if let Resolution::Tried(user) = &self.state {
            return Ok(user.clone());
        }
        self.state = Resolution::Tried(None);

        let user = self.resolve().await?.filter(|user| {
            if user.is_banned() {
                debug!(user_id = %user.id(), "banned user treated as anonymous");
                return false;
            }
            true
        });
        self.state = Resolution::Tried(user.clone());
        Ok(user)
    }

    pub async fn user_id(&mut self) -> AuthResult<Option<UserId>> {
        Ok(self.user().await?.map(|user| user.id()))
    }

    pub async fn is_logged_in(&mut self) -> AuthResult<bool> {
        Ok(self.user().await?.is_some())
    }

    /// Logs in with a username and password.
    ///
    /// Checks run in a fixed order and the first failure is returned:
    /// blank username, blank password, address throttle, unknown username,
    /// account throttle, wrong password, banned account.
    pub async fn attempt(
        &mut self,
        username: &str,
        password: &str,
        persistent: bool,
    ) -> AuthResult<U::User> {
        if username.trim().is_empty() {
            return Err(AuthError::InvalidUsername);
        }
        if password.is_empty() {
            return Err(AuthError::InvalidPassword);
        }

        let services = self.services;
        let now = self.now();
        services.throttle.check_ip(&*services.tokens, self.ip, now).await?;

        let Some(user) = services.users.find_by_username(username).await? else {
            warn!(ip = %self.ip, "login failed: unknown username");
            self.record_attempt(false, false, None).await?;
            return Err(AuthError::InvalidUsername);
        };
        let user_id = user.id();

        // Counted per account as well, so spreading guesses over many
        // addresses does not help. The same rule lets anyone lock an
        // account for a while by failing on purpose.
        services.throttle.check_user(&*services.tokens, user_id, now).await?;

        if !services.users.verify_password(&user, password).await? {
            warn!(%user_id, ip = %self.ip, "login failed: wrong password");
            self.record_attempt(false, false, Some(user_id)).await?;
            return Err(AuthError::InvalidPassword);
        }

        if user.is_banned() {
            warn!(%user_id, "login refused: account banned");
            return Err(AuthError::UserBanned);
        }

        self.establish(&user, persistent, None).await?;
        Ok(user)
    }

    /// Logs `user` in without checking credentials.
    pub async fn login_as(&mut self, user: &U::User, persistent: bool) -> AuthResult<()> {
        self.establish(user, persistent, None).await
    }

    /// Re-checks the logged-in user's password, e.g. before a privileged action.
    ///
    /// A wrong password is `Ok(false)` and is recorded as a failed attempt.
    pub async fn check_password(&mut self, plaintext: &str) -> AuthResult<bool> {
        let user = self.user().await?.ok_or(AuthError::NoUser)?;
        let services = self.services;
        let now = self.now();

        services.throttle.check_ip(&*services.tokens, self.ip, now).await?;

        if !services.users.verify_password(&user, plaintext).await? {
            warn!(user_id = %user.id(), ip = %self.ip, "password re-check failed");
            self.record_attempt(false, false, Some(user.id())).await?;
            return Ok(false);
        }

        self.session.set(session_keys::PASSWORD_ENTERED_AT, SessionValue::Time(now));
        Ok(true)
    }

    /// Whether the logged-in user typed their password within `window`.
    ///
    /// Logins from a persistent token do not count as typing the password.
    pub async fn password_entered_within(&mut self, window: TimeDelta) -> AuthResult<bool> {
        if !self.is_logged_in().await? {
            return Ok(false);
        }
        let now = self.now();
        Ok(self
            .session
            .get_time(session_keys::PASSWORD_ENTERED_AT)
            .is_some_and(|at| now - at <= window))
    }

    /// Ends the current login. Does nothing when nobody is logged in.
    ///
    /// With `kill_persistent`, the "remember me" cookie and its stored token
    /// are removed too.
    pub async fn logout(&mut self, kill_persistent: bool) -> AuthResult<()> {
        let Some(user_id) = self.user_id().await? else {
            return Ok(());
        };
        let services = self.services;

        if kill_persistent {
            let cookie = services.config.persistent_cookie.as_str();
            if let Some(raw) = self.cookies.get(cookie) {
                services.tokens.delete_token(TokenKind::Persistent, &token::hash(&raw)).await?;
            }
            self.cookies.delete(cookie);
        }

        self.end_session().await?;
        self.state = Resolution::Tried(None);
        info!(%user_id, kill_persistent, "user logged out");
        Ok(())
    }

    /// Revokes every session and persistent token of the current user, on
    /// every device, then logs out here.
    pub async fn logout_everywhere(&mut self) -> AuthResult<()> {
        let Some(user_id) = self.user_id().await? else {
            return Ok(());
        };
        self.services.tokens.delete_tokens_for_user(user_id).await?;
        info!(%user_id, "all sessions terminated");
        self.logout(true).await
    }

    // ── Resolution ────────────────────────────────────────────────────────────

    async fn resolve(&mut self) -> AuthResult<Option<U::User>> {
        if let Some(user) = self.resume_session().await? {
            return Ok(Some(user));
        }
        self.login_from_cookie().await
    }

    async fn resume_session(&mut self) -> AuthResult<Option<U::User>> {
        let (Some(raw), Some(last_active), Some(user_id)) = (
            self.session.get_text(session_keys::TOKEN),
            self.session.get_time(session_keys::LAST_ACTIVE),
            self.session.get_int(session_keys::USER_ID),
        ) else {
            return Ok(None);
        };
        let user_id = UserId(user_id);
        let services = self.services;
        let config = &services.config;
        let now = self.now();

        if now - last_active > config.session_timeout() {
            debug!(%user_id, "session idle timeout");
            self.end_session().await?;
            return Ok(None);
        }

        let hash = token::hash(&raw);
        let stored = services.tokens.find_token(TokenKind::Session, &hash).await?;
        let Some(stored) = stored.filter(|t| t.user_id == user_id && !t.is_expired(now)) else {
            debug!(%user_id, "session token missing, expired or owned by another user");
            self.end_session().await?;
            return Ok(None);
        };

        self.session.set(session_keys::LAST_ACTIVE, SessionValue::Time(now));

        let ttl = config.session_token_ttl();
        if stored.expires_at - now < ttl / 2 {
            services
                .tokens
                .update_token_expiry(TokenKind::Session, &hash, expiry(now, ttl)?)
                .await?;
        }

        let user = services.users.find_by_id(user_id).await?;
        if user.is_none() {
            debug!(%user_id, "session belongs to a user that no longer exists");
        }
        Ok(user)
    }

    async fn login_from_cookie(&mut self) -> AuthResult<Option<U::User>> {
        let services = self.services;
        let Some(raw) = self.cookies.get(&services.config.persistent_cookie) else {
            return Ok(None);
        };
        let now = self.now();

        services.throttle.check_ip(&*services.tokens, self.ip, now).await?;

        let hash = token::hash(&raw);
        let stored = match services.tokens.find_token(TokenKind::Persistent, &hash).await? {
            Some(stored) if !stored.is_expired(now) => stored,
            Some(_) => {
                services.tokens.delete_token(TokenKind::Persistent, &hash).await?;
                return self.reject_cookie().await;
            }
            None => return self.reject_cookie().await,
        };

        let Some(user) = services.users.find_by_id(stored.user_id).await? else {
            return self.reject_cookie().await;
        };
        if user.is_banned() {
            debug!(user_id = %stored.user_id, "persistent token of banned user ignored");
            return Ok(None);
        }

        debug!(user_id = %stored.user_id, "logging in from persistent token");
        self.establish(&user, true, Some(hash.as_str())).await?;
        Ok(Some(user))
    }

    async fn reject_cookie(&mut self) -> AuthResult<Option<U::User>> {
        warn!(ip = %self.ip, "persistent token rejected");
        self.cookies.delete(&self.services.config.persistent_cookie);
        self.record_attempt(false, true, None).await?;
        Ok(None)
    }

    // ── Login / logout plumbing ───────────────────────────────────────────────

    /// Issues fresh tokens for `user` and binds them to the session.
    ///
    /// `consumed` is the hash of the persistent token this login came from;
    /// it is always deleted, whether or not a replacement is issued.
    async fn establish(
        &mut self,
        user: &U::User,
        persistent: bool,
        consumed: Option<&str>,
    ) -> AuthResult<()> {
        let services = self.services;
        let config = &services.config;
        let tokens = &*services.tokens;
        let user_id = user.id();
        let now = self.now();
        let session_expires = expiry(now, config.session_token_ttl())?;
        let persistent_ttl = config.persistent_token_ttl();
        let persistent_expires =
            if persistent { Some(expiry(now, persistent_ttl)?) } else { None };

        if let Some(previous) = self.session.get_text(session_keys::TOKEN) {
            tokens.delete_token(TokenKind::Session, &token::hash(&previous)).await?;
        }

        let (session_raw, session_hash) =
            token::fresh(tokens, TokenKind::Session, config.token_bytes).await?;
        tokens
            .insert_token(
                TokenKind::Session,
                AuthToken { hash: session_hash, user_id, expires_at: session_expires },
            )
            .await?;

        if let Some(hash) = consumed {
            tokens.delete_token(TokenKind::Persistent, hash).await?;
        }

        if let Some(expires_at) = persistent_expires {
            let (raw, hash) = token::fresh(tokens, TokenKind::Persistent, config.token_bytes).await?;
            tokens
                .insert_token(
                    TokenKind::Persistent,
                    AuthToken { hash, user_id, expires_at },
                )
                .await?;
            self.cookies.set(&config.persistent_cookie, &raw, persistent_ttl);
        }

        self.session.regenerate_id();
        self.session.set(session_keys::TOKEN, SessionValue::Text(session_raw));
        self.session.set(session_keys::USER_ID, SessionValue::Int(user_id.0));
        self.session.set(session_keys::LAST_ACTIVE, SessionValue::Time(now));
        if consumed.is_none() {
            self.session.set(session_keys::PASSWORD_ENTERED_AT, SessionValue::Time(now));
        }

        self.record_attempt(true, false, Some(user_id)).await?;
        services.users.record_login(user, now).await?;

        self.state = Resolution::Tried(Some(user.clone()));
        info!(%user_id, persistent, from_token = consumed.is_some(), "user logged in");
        Ok(())
    }

    /// Deletes the session token record and clears the engine's session keys.
    async fn end_session(&mut self) -> AuthResult<()> {
        if let Some(raw) = self.session.get_text(session_keys::TOKEN) {
            self.services
                .tokens
                .delete_token(TokenKind::Session, &token::hash(&raw))
                .await?;
        }
        for key in session_keys::ALL {
            self.session.forget(key);
        }
        Ok(())
    }

    async fn record_attempt(
        &self,
        success: bool,
        fraud: bool,
        user_id: Option<UserId>,
    ) -> AuthResult<()> {
        let attempt = AuthAttempt { success, fraud, ip: self.ip, at: self.now(), user_id };
        self.services.tokens.record_attempt(attempt).await?;
        Ok(())
    }

    fn now(&self) -> DateTime<Utc> {
        self.services.clock.now()
    }
}

/// `now + ttl`, or an error when the configured lifetime runs past the clock.
fn expiry(now: DateTime<Utc>, ttl: TimeDelta) -> AuthResult<DateTime<Utc>> {
    now.checked_add_signed(ttl)
        .ok_or(AuthError::Misconfigured("token lifetime overflows the clock"))
}
