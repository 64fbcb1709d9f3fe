//! Account lockout after repeated failed logins.
//!
//! The check and the update are two distinct store round trips, so the
//! limit is soft under concurrent attempts on the same account.

use chrono::{DateTime, Duration, Utc};

use crate::user::User;

/// Failed login bookkeeping of a user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailedLoginInfos {
    /// Consecutive failures since the last success.
    pub count: u32,
    /// Failures over the account lifetime.
    pub total: u64,
    /// No login allowed before this instant.
    pub next_login_attempt_time: Option<DateTime<Utc>>,
}

/// Count one more failed login.
pub fn record_failure(user: &mut User) {
    let infos = user.failed_login.get_or_insert_with(Default::default);
    infos.count = infos.count.saturating_add(1);
    infos.total = infos.total.saturating_add(1);
}

/// Reset consecutive failures. `total` is kept.
pub fn record_success(user: &mut User) {
    if let Some(infos) = user.failed_login.as_mut() {
        infos.count = 0;
        infos.next_login_attempt_time = None;
    }
}

/// Whether a login may be attempted at `now`.
pub fn can_attempt_login(
    infos: Option<&FailedLoginInfos>,
    max_failed_login: u32,
    now: DateTime<Utc>,
) -> bool {
    let Some(infos) = infos else {
        return true;
    };

    infos.count < max_failed_login
        || infos
            .next_login_attempt_time
            .is_none_or(|next| next < now)
}

/// Lockout thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutPolicy {
    pub max_failed_login: u32,
    pub delay: Duration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            max_failed_login: 5,
            delay: Duration::minutes(10),
        }
    }
}

impl LockoutPolicy {
    pub fn new(max_failed_login: u32, delay: Duration) -> Self {
        Self {
            max_failed_login,
            delay,
        }
    }

    /// Record a failure, then lock the account for `delay` once the
    /// threshold is reached.
    pub fn register_failure(&self, user: &mut User, now: DateTime<Utc>) {
        record_failure(user);

        if let Some(infos) = user.failed_login.as_mut() {
            if infos.count >= self.max_failed_login {
                let next = now
                    .checked_add_signed(self.delay)
                    .unwrap_or(DateTime::<Utc>::MAX_UTC);
                infos.next_login_attempt_time = Some(next);
            }
        }
    }

    pub fn can_attempt_login(&self, user: &User, now: DateTime<Utc>) -> bool {
        can_attempt_login(user.failed_login.as_ref(), self.max_failed_login, now)
    }
}
