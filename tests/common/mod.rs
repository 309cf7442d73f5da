//! In-memory collaborators for driving the authentication engine in tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use trellis::auth::session_keys;
use trellis::{
    AttemptWindow, Auth, AuthAttempt, AuthServices, AuthToken, AuthUser, Clock, Config,
    CookieStore, SessionStore, SessionValue, StoreError, StoreResult, TokenKind, TokenStore,
    UserId, UserStore,
};

pub const CLIENT: IpAddr = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7));

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn ip(last: u8) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(198, 51, 100, last))
}

// ── Token store ──────────────────────────────────────────────────────────────

#[derive(Default)]
struct TokenState {
    session: HashMap<String, AuthToken>,
    persistent: HashMap<String, AuthToken>,
    attempts: Vec<AuthAttempt>,
    reads: usize,
    writes: usize,
    failing: bool,
    colliding: bool,
}

impl TokenState {
    fn check(&self) -> StoreResult<()> {
        if self.failing { Err(StoreError::Unavailable) } else { Ok(()) }
    }

    fn map(&mut self, kind: TokenKind) -> &mut HashMap<String, AuthToken> {
        match kind {
            TokenKind::Session => &mut self.session,
            TokenKind::Persistent => &mut self.persistent,
        }
    }

    fn window(&self, since: DateTime<Utc>, matches: impl Fn(&AuthAttempt) -> bool) -> AttemptWindow {
        let failures = self
            .attempts
            .iter()
            .filter(|a| !a.success && a.at >= since && matches(a));
        let mut window = AttemptWindow::default();
        for attempt in failures {
            window.failures += 1;
            window.last_failure = window.last_failure.max(Some(attempt.at));
        }
        window
    }
}

/// Token and attempt storage with failure injection.
#[derive(Default)]
pub struct MemoryTokenStore {
    state: Mutex<TokenState>,
}

impl MemoryTokenStore {
    fn lock(&self) -> MutexGuard<'_, TokenState> {
        self.state.lock().unwrap()
    }

    /// Every call fails with [`StoreError::Unavailable`] while set.
    pub fn set_failing(&self, failing: bool) {
        self.lock().failing = failing;
    }

    /// Every token lookup reports a hit while set.
    pub fn set_colliding(&self, colliding: bool) {
        self.lock().colliding = colliding;
    }

    pub fn tokens(&self, kind: TokenKind) -> Vec<AuthToken> {
        self.lock().map(kind).values().cloned().collect()
    }

    pub fn token(&self, kind: TokenKind, hash: &str) -> Option<AuthToken> {
        self.lock().map(kind).get(hash).cloned()
    }

    pub fn attempts(&self) -> Vec<AuthAttempt> {
        self.lock().attempts.clone()
    }

    pub fn reads(&self) -> usize {
        self.lock().reads
    }

    pub fn writes(&self) -> usize {
        self.lock().writes
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn find_token(&self, kind: TokenKind, hash: &str) -> StoreResult<Option<AuthToken>> {
        let mut state = self.lock();
        state.check()?;
        state.reads += 1;
        if state.colliding {
            return Ok(Some(AuthToken {
                hash: hash.to_owned(),
                user_id: UserId(0),
                expires_at: Utc::now() + TimeDelta::days(1),
            }));
        }
        Ok(state.map(kind).get(hash).cloned())
    }

    async fn insert_token(&self, kind: TokenKind, token: AuthToken) -> StoreResult<()> {
        let mut state = self.lock();
        state.check()?;
        state.writes += 1;
        state.map(kind).insert(token.hash.clone(), token);
        Ok(())
    }

    async fn update_token_expiry(
        &self,
        kind: TokenKind,
        hash: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut state = self.lock();
        state.check()?;
        state.writes += 1;
        if let Some(token) = state.map(kind).get_mut(hash) {
            token.expires_at = expires_at;
        }
        Ok(())
    }

    async fn delete_token(&self, kind: TokenKind, hash: &str) -> StoreResult<()> {
        let mut state = self.lock();
        state.check()?;
        state.writes += 1;
        state.map(kind).remove(hash);
        Ok(())
    }

    async fn delete_tokens_for_user(&self, user_id: UserId) -> StoreResult<()> {
        let mut state = self.lock();
        state.check()?;
        state.writes += 1;
        state.session.retain(|_, t| t.user_id != user_id);
        state.persistent.retain(|_, t| t.user_id != user_id);
        Ok(())
    }

    async fn record_attempt(&self, attempt: AuthAttempt) -> StoreResult<()> {
        let mut state = self.lock();
        state.check()?;
        state.writes += 1;
        state.attempts.push(attempt);
        Ok(())
    }

    async fn failed_attempts_by_ip(
        &self,
        ip: IpAddr,
        since: DateTime<Utc>,
    ) -> StoreResult<AttemptWindow> {
        let mut state = self.lock();
        state.check()?;
        state.reads += 1;
        Ok(state.window(since, |a| a.ip == ip))
    }

    async fn failed_attempts_by_user(
        &self,
        user_id: UserId,
        since: DateTime<Utc>,
    ) -> StoreResult<AttemptWindow> {
        let mut state = self.lock();
        state.check()?;
        state.reads += 1;
        Ok(state.window(since, |a| a.user_id == Some(user_id)))
    }
}

// ── Users ────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub struct TestUser {
    pub id: UserId,
    pub username: String,
    pub banned: bool,
    password: String,
}

impl AuthUser for TestUser {
    fn id(&self) -> UserId {
        self.id
    }

    fn is_banned(&self) -> bool {
        self.banned
    }
}

#[derive(Default)]
pub struct MemoryUsers {
    users: Mutex<Vec<TestUser>>,
    logins: Mutex<Vec<(UserId, DateTime<Utc>)>>,
}

impl MemoryUsers {
    pub fn add(&self, username: &str, password: &str) -> TestUser {
        let mut users = self.users.lock().unwrap();
        let user = TestUser {
            id: UserId(users.len() as i64 + 1),
            username: username.to_owned(),
            banned: false,
            password: password.to_owned(),
        };
        users.push(user.clone());
        user
    }

    pub fn ban(&self, id: UserId) {
        let mut users = self.users.lock().unwrap();
        if let Some(user) = users.iter_mut().find(|u| u.id == id) {
            user.banned = true;
        }
    }

    pub fn remove(&self, id: UserId) {
        self.users.lock().unwrap().retain(|u| u.id != id);
    }

    pub fn logins(&self) -> Vec<(UserId, DateTime<Utc>)> {
        self.logins.lock().unwrap().clone()
    }
}

#[async_trait]
impl UserStore for MemoryUsers {
    type User = TestUser;

    async fn find_by_id(&self, id: UserId) -> StoreResult<Option<TestUser>> {
        Ok(self.users.lock().unwrap().iter().find(|u| u.id == id).cloned())
    }

    async fn find_by_username(&self, username: &str) -> StoreResult<Option<TestUser>> {
        Ok(self.users.lock().unwrap().iter().find(|u| u.username == username).cloned())
    }

    async fn verify_password(&self, user: &TestUser, plaintext: &str) -> StoreResult<bool> {
        Ok(user.password == plaintext)
    }

    async fn record_login(&self, user: &TestUser, at: DateTime<Utc>) -> StoreResult<()> {
        self.logins.lock().unwrap().push((user.id, at));
        Ok(())
    }
}

// ── Session, cookies, clock ──────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MemorySession {
    values: HashMap<String, SessionValue>,
    pub id: u64,
    pub regenerations: u32,
}

impl MemorySession {
    /// True when none of the engine's keys are present.
    pub fn is_clear(&self) -> bool {
        session_keys::ALL.iter().all(|key| !self.values.contains_key(*key))
    }
}

impl SessionStore for MemorySession {
    fn get(&self, key: &str) -> Option<SessionValue> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: SessionValue) {
        self.values.insert(key.to_owned(), value);
    }

    fn forget(&mut self, key: &str) {
        self.values.remove(key);
    }

    fn regenerate_id(&mut self) {
        self.id += 1;
        self.regenerations += 1;
    }
}

#[derive(Clone, Debug, Default)]
pub struct MemoryCookies {
    jar: HashMap<String, (String, TimeDelta)>,
}

impl MemoryCookies {
    pub fn max_age(&self, name: &str) -> Option<TimeDelta> {
        self.jar.get(name).map(|(_, age)| *age)
    }
}

impl CookieStore for MemoryCookies {
    fn get(&self, name: &str) -> Option<String> {
        self.jar.get(name).map(|(value, _)| value.clone())
    }

    fn set(&mut self, name: &str, value: &str, max_age: TimeDelta) {
        self.jar.insert(name.to_owned(), (value.to_owned(), max_age));
    }

    fn delete(&mut self, name: &str) {
        self.jar.remove(name);
    }
}

pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self { now: Mutex::new(DateTime::from_timestamp(1_700_000_000, 0).unwrap()) }
    }
}

impl ManualClock {
    pub fn advance(&self, by: TimeDelta) {
        *self.now.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

// ── Harness ──────────────────────────────────────────────────────────────────

pub struct Harness {
    pub tokens: Arc<MemoryTokenStore>,
    pub users: Arc<MemoryUsers>,
    pub clock: Arc<ManualClock>,
    pub services: AuthServices<MemoryUsers>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        init_tracing();
        let tokens = Arc::new(MemoryTokenStore::default());
        let users = Arc::new(MemoryUsers::default());
        let clock = Arc::new(ManualClock::default());
        let services =
            AuthServices::new(tokens.clone(), users.clone(), &config).with_clock(clock.clone());
        Self { tokens, users, clock, services }
    }

    pub fn request<'r>(
        &'r self,
        session: &'r mut MemorySession,
        cookies: &'r mut MemoryCookies,
    ) -> Auth<'r, MemoryUsers> {
        self.services.for_request(session, cookies, CLIENT)
    }

    pub fn request_from<'r>(
        &'r self,
        ip: IpAddr,
        session: &'r mut MemorySession,
        cookies: &'r mut MemoryCookies,
    ) -> Auth<'r, MemoryUsers> {
        self.services.for_request(session, cookies, ip)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}
