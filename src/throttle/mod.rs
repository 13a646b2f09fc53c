//! Sliding-window login throttle.
//!
//! Failures are counted per `(username, address)` over the trailing window
//! before the new failure is written, so two concurrent failures for the same
//! key may both read the same count and the lock can land one request late.
//! Any ledger error is returned to the caller; the throttle never fails open.

pub mod ledger;

pub use self::ledger::{AttemptLedger, PgAttemptLedger};

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{Error, Result};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_WINDOW_MINUTES: u32 = 10;
pub const DEFAULT_LOCKOUT_MINUTES: u32 = 15;
/// Upper bound for the window and the lockout, one year.
pub const MAX_MINUTES: u32 = 525_600;

#[derive(Debug, Clone, Copy)]
pub struct ThrottleConfig {
    max_attempts: u32,
    window: Duration,
    lockout: Duration,
}

impl ThrottleConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            window: Duration::minutes(i64::from(DEFAULT_WINDOW_MINUTES)),
            lockout: Duration::minutes(i64::from(DEFAULT_LOCKOUT_MINUTES)),
        }
    }

    /// Zero is treated as one: a single failure locks.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    #[must_use]
    pub fn with_window_minutes(mut self, minutes: u32) -> Self {
        self.window = Duration::minutes(i64::from(minutes));
        self
    }

    #[must_use]
    pub fn with_lockout_minutes(mut self, minutes: u32) -> Self {
        self.lockout = Duration::minutes(i64::from(minutes));
        self
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    #[must_use]
    pub fn lockout(&self) -> Duration {
        self.lockout
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct LoginThrottle {
    ledger: Arc<dyn AttemptLedger>,
    config: ThrottleConfig,
}

impl LoginThrottle {
    #[must_use]
    pub fn new(ledger: Arc<dyn AttemptLedger>, config: ThrottleConfig) -> Self {
        Self { ledger, config }
    }

    #[must_use]
    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    /// Active lock expiry for the key, if any.
    ///
    /// # Errors
    /// Returns an error if the ledger cannot be read.
    pub async fn is_locked(&self, username: &str, address: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self.ledger.active_lock(username, address, Utc::now()).await?)
    }

    /// Gate form of [`LoginThrottle::is_locked`].
    ///
    /// # Errors
    /// `TooManyAttempts` with the lock expiry while the key is locked, or the
    /// ledger error.
    pub async fn ensure_unlocked(&self, username: &str, address: &str) -> Result<()> {
        match self.is_locked(username, address).await? {
            Some(locked_until) => Err(Error::TooManyAttempts(locked_until)),
            None => Ok(()),
        }
    }

    /// Records a failed attempt and locks the key once the failures inside the
    /// window reach the configured threshold. Returns the new lock expiry.
    ///
    /// # Errors
    /// Returns an error if the ledger cannot be read or written.
    pub async fn register_failure_and_lock_if_needed(
        &self,
        username: &str,
        address: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        let now = Utc::now();
        let since = now
            .checked_sub_signed(self.config.window)
            .context("login window out of range")?;

        let failures = self
            .ledger
            .count_failures_since(username, address, since)
            .await?;

        self.ledger
            .record_attempt(username, address, false, now)
            .await?;

        if failures + 1 < i64::from(self.config.max_attempts) {
            info!(
                username,
                address,
                failures = failures + 1,
                "login failure recorded"
            );
            return Ok(None);
        }

        let locked_until = now
            .checked_add_signed(self.config.lockout)
            .context("lockout expiry out of range")?;
        self.ledger
            .upsert_lock(username, address, locked_until)
            .await?;

        warn!(
            username,
            address,
            %locked_until,
            "login locked after repeated failures"
        );

        Ok(Some(locked_until))
    }

    /// Records a successful attempt and removes any lock for the key.
    ///
    /// # Errors
    /// Returns an error if the ledger cannot be written.
    pub async fn on_success(&self, username: &str, address: &str) -> Result<()> {
        self.ledger
            .record_attempt(username, address, true, Utc::now())
            .await?;
        self.ledger.clear_lock(username, address).await?;
        Ok(())
    }
}
