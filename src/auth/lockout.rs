//! Failed-attempt counting and timed lockout.
//!
//! State lives on the identity row (`failed_attempt_count`, `lockout_until`);
//! this module only decides and delegates the writes to the directory.
//!
//! When the counter reaches the threshold the identity is locked until
//! `now + window` and the counter starts over, so the first failure after the
//! window elapses counts as attempt one again. A successful login clears both.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use super::{
    directory::{Identity, UserDirectory},
    error::AuthError,
};

const DEFAULT_THRESHOLD: u32 = 3;
const DEFAULT_WINDOW_SECONDS: i64 = 60;

/// Longest accepted lockout window: one day.
pub const MAX_WINDOW_SECONDS: i64 = 24 * 60 * 60;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LockoutPolicy {
    threshold: u32,
    window: Duration,
}

/// What a failed credential check did to the identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Counter bumped, still below the threshold.
    Counted(u32),
    /// Threshold reached; locked until the given instant.
    LockedUntil(DateTime<Utc>),
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            window: Duration::seconds(DEFAULT_WINDOW_SECONDS),
        }
    }
}

impl LockoutPolicy {
    /// A threshold of zero is treated as one.
    #[must_use]
    pub fn new(threshold: u32, window: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            window,
        }
    }

    /// Policy from configured seconds.
    ///
    /// # Errors
    /// Returns an error unless `1 <= window_seconds <= MAX_WINDOW_SECONDS`.
    pub fn from_seconds(threshold: u32, window_seconds: i64) -> Result<Self> {
        if !(1..=MAX_WINDOW_SECONDS).contains(&window_seconds) {
            return Err(anyhow!(
                "lockout window must be between 1 and {MAX_WINDOW_SECONDS} seconds, got {window_seconds}"
            ));
        }
        let window = Duration::try_seconds(window_seconds)
            .ok_or_else(|| anyhow!("lockout window out of range: {window_seconds}"))?;
        Ok(Self::new(threshold, window))
    }

    #[must_use]
    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    #[must_use]
    pub fn is_locked(&self, identity: &Identity, now: DateTime<Utc>) -> bool {
        identity.lockout_until.is_some_and(|until| now < until)
    }

    /// Record a failed credential check.
    ///
    /// # Errors
    /// Returns [`AuthError::ClockOverflow`] before any write if the window
    /// cannot be added to `now`, or [`AuthError::Directory`] if a write fails.
    pub async fn register_failure(
        &self,
        directory: &dyn UserDirectory,
        identity: &Identity,
        now: DateTime<Utc>,
    ) -> Result<FailureOutcome, AuthError> {
        let until = now
            .checked_add_signed(self.window)
            .ok_or(AuthError::ClockOverflow("lockout window"))?;

        let count = directory
            .increment_failed_attempts(identity.id)
            .await
            .map_err(AuthError::Directory)?;

        if count < self.threshold {
            info!(user_id = %identity.id, failed_attempts = count, "credential check failed");
            return Ok(FailureOutcome::Counted(count));
        }

        directory
            .set_lockout(identity.id, Some(until))
            .await
            .map_err(AuthError::Directory)?;
        directory
            .reset_failed_attempts(identity.id)
            .await
            .map_err(AuthError::Directory)?;
        warn!(
            user_id = %identity.id,
            failed_attempts = count,
            locked_until = %until,
            "identity locked out"
        );
        Ok(FailureOutcome::LockedUntil(until))
    }

    /// Clear counter and lockout after a successful credential check.
    ///
    /// Both writes always run: failures counted after `identity` was read must
    /// not survive the success.
    ///
    /// # Errors
    /// Returns [`AuthError::Directory`] if a directory write fails.
    pub async fn register_success(
        &self,
        directory: &dyn UserDirectory,
        identity: &Identity,
    ) -> Result<(), AuthError> {
        directory
            .reset_failed_attempts(identity.id)
            .await
            .map_err(AuthError::Directory)?;
        directory
            .set_lockout(identity.id, None)
            .await
            .map_err(AuthError::Directory)?;
        Ok(())
    }
}
