//! Escalating delays after failed authentication attempts.
//!
//! The required wait is a pure function of how many attempts failed inside
//! the look-back window:
//!
//! | failures | 0-2 | 3 | 4 | 5 | 6 | 7 | 8 | 9 | 10+ |
//! |---|---|---|---|---|---|---|---|---|---|
//! | wait (s) | 0 | 2 | 4 | 8 | 16 | 30 | 60 | 120 | 300 |
//!
//! A check passes once `last_failure + wait` is in the past. Checks never
//! record anything; callers log the outcome of the attempt they guard.
//! IP addresses and accounts are counted independently.

use std::net::IpAddr;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::warn;

use crate::auth::store::{AttemptWindow, TokenStore, UserId};
use crate::config::{ThrottleConfig, saturating_seconds};
use crate::error::{AuthError, AuthResult};

pub const DEFAULT_ESCALATION_SECS: [i64; 11] = [0, 0, 0, 2, 4, 8, 16, 30, 60, 120, 300];
pub const DEFAULT_WINDOW_SECS: i64 = 15 * 60;

#[derive(Clone, Debug)]
pub struct Throttle {
    escalation: Vec<TimeDelta>,
    window: TimeDelta,
}

impl Throttle {
    pub fn new(escalation_secs: &[i64], window: TimeDelta) -> Self {
        Self {
            escalation: escalation_secs.iter().map(|s| saturating_seconds(*s)).collect(),
            window,
        }
    }

    /// Wait required after `failures` failed attempts. Counts past the end of
    /// the table use its last entry.
    pub fn required_wait(&self, failures: u32) -> TimeDelta {
        let Some(last) = self.escalation.len().checked_sub(1) else {
            return TimeDelta::zero();
        };
        let index = (failures as usize).min(last);
        self.escalation[index]
    }

    /// Oldest failure that still counts at `now`.
    pub fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.window).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// `Err(retry_after)` while the window's failures still demand a wait.
    pub fn check(&self, window: AttemptWindow, now: DateTime<Utc>) -> Result<(), TimeDelta> {
        let wait = self.required_wait(window.failures);
        if wait <= TimeDelta::zero() {
            return Ok(());
        }
        let Some(last) = window.last_failure else {
            return Ok(());
        };
        match last.checked_add_signed(wait) {
            Some(until) if until > now => Err(until - now),
            Some(_) => Ok(()),
            // Past the end of time: blocked for good.
            None => Err(wait),
        }
    }

    pub async fn check_ip(
        &self,
        store: &dyn TokenStore,
        ip: IpAddr,
        now: DateTime<Utc>,
    ) -> AuthResult<()> {
        let window = store.failed_attempts_by_ip(ip, self.window_start(now)).await?;
        self.check(window, now).map_err(|retry_after| {
            warn!(%ip, failures = window.failures, "authentication throttled for address");
            AuthError::IpThrottled { retry_after }
        })
    }

    pub async fn check_user(
        &self,
        store: &dyn TokenStore,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> AuthResult<()> {
        let window = store.failed_attempts_by_user(user_id, self.window_start(now)).await?;
        self.check(window, now).map_err(|retry_after| {
            warn!(%user_id, failures = window.failures, "authentication throttled for account");
            AuthError::UserThrottled { retry_after }
        })
    }
}

impl Default for Throttle {
    fn default() -> Self {
        Self::new(&DEFAULT_ESCALATION_SECS, TimeDelta::seconds(DEFAULT_WINDOW_SECS))
    }
}

impl From<&ThrottleConfig> for Throttle {
    fn from(config: &ThrottleConfig) -> Self {
        Self::new(&config.escalation_secs, saturating_seconds(config.window_secs))
    }
}
