//! Throttled login: lock check, credential check, ledger bookkeeping.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{error, warn};

use super::{Authenticated, Authenticator};
use crate::error::{Error, Result};
use crate::throttle::LoginThrottle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    Granted(Authenticated),
    Locked { locked_until: DateTime<Utc> },
    Denied,
}

/// Seconds until `locked_until`, never less than one.
#[must_use]
pub fn retry_after_secs(locked_until: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (locked_until - now).num_seconds().max(1)
}

pub struct LoginFlow {
    throttle: LoginThrottle,
    authenticator: Arc<Authenticator>,
    count_disabled: bool,
}

impl LoginFlow {
    #[must_use]
    pub fn new(throttle: LoginThrottle, authenticator: Arc<Authenticator>) -> Self {
        Self {
            throttle,
            authenticator,
            count_disabled: true,
        }
    }

    /// Whether a login into a locally disabled account counts as a failure.
    #[must_use]
    pub fn with_count_disabled(mut self, count_disabled: bool) -> Self {
        self.count_disabled = count_disabled;
        self
    }

    /// The failure that reaches the threshold is still answered as `Denied`;
    /// the lock applies from the next request on. Gateway trouble is denied
    /// without being counted against the user.
    ///
    /// # Errors
    /// Ledger and storage errors. The request must be refused when this fails.
    pub async fn attempt(
        &self,
        username: &str,
        password: &str,
        address: &str,
    ) -> Result<LoginOutcome> {
        match self.throttle.ensure_unlocked(username, address).await {
            Ok(()) => {}
            Err(Error::TooManyAttempts(locked_until)) => {
                return Ok(LoginOutcome::Locked { locked_until });
            }
            Err(err) => return Err(err),
        }

        match self.authenticator.authenticate(username, password).await {
            Ok(authenticated) => {
                self.throttle.on_success(username, address).await?;
                Ok(LoginOutcome::Granted(authenticated))
            }
            Err(Error::InvalidCredentials) => self.deny(username, address).await,
            Err(Error::AccountDisabled) if self.count_disabled => {
                self.deny(username, address).await
            }
            Err(Error::AccountDisabled) => Ok(LoginOutcome::Denied),
            Err(err) if err.is_gateway() => {
                error!(username, "gateway failure during login: {err}");
                Ok(LoginOutcome::Denied)
            }
            Err(err) => Err(err),
        }
    }

    async fn deny(&self, username: &str, address: &str) -> Result<LoginOutcome> {
        if let Some(locked_until) = self
            .throttle
            .register_failure_and_lock_if_needed(username, address)
            .await?
        {
            warn!(username, address, %locked_until, "further logins refused until lock expires");
        }

        Ok(LoginOutcome::Denied)
    }
}
