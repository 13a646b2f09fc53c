//! Account lifecycle across the local store and the gateway.
//!
//! A local account and its gateway consumer are written as one logical unit:
//!
//! - **Create:** profile check, local insert, gateway consumer. If the gateway
//!   refuses the consumer the local row is deleted again (compensation) and the
//!   gateway error is returned.
//! - **Update:** gateway fields (`username`, `password`, `account_type`,
//!   `api_key`) are merged into the fetched consumer and written first; local
//!   columns are written only after the gateway accepted.
//! - **Delete:** gateway consumer first, then the local row. Both deletes are
//!   idempotent so a retry after a partial failure converges.
//!
//! Gateway calls never run inside a database transaction.

pub mod model;
pub mod provisioner;
pub mod recovery;
pub mod store;
pub mod validation;

pub use self::model::{
    Account, AccountChanges, AccountDraft, AccountFilter, AccountStatus, AccountSummary,
    AccountUpdate, Challenge, NewAccount,
};
pub use self::provisioner::AccountProvisioner;
pub use self::recovery::{VerificationDispatch, VerifyOutcome};
pub use self::store::{AccountStore, PgAccountStore, WriteOutcome};

use chrono::Duration;

pub const DEFAULT_ACCOUNT_TYPE: &str = "basic";
pub const DEFAULT_RESET_URL: &str = "http://localhost:3000/reset-password";

#[derive(Debug, Clone)]
pub struct AccountPolicy {
    default_account_type: String,
    verification_ttl: Duration,
    verification_cooldown: Duration,
    max_verification_attempts: i32,
    recovery_ttl: Duration,
    recovery_cooldown: Duration,
    reset_url: String,
}

impl AccountPolicy {
    /// 30 minute codes and tokens, 5 minute resend cooldown, 3 code attempts.
    #[must_use]
    pub fn new() -> Self {
        Self {
            default_account_type: DEFAULT_ACCOUNT_TYPE.to_string(),
            verification_ttl: Duration::minutes(30),
            verification_cooldown: Duration::minutes(5),
            max_verification_attempts: 3,
            recovery_ttl: Duration::minutes(30),
            recovery_cooldown: Duration::minutes(5),
            reset_url: DEFAULT_RESET_URL.to_string(),
        }
    }

    #[must_use]
    pub fn with_default_account_type(mut self, account_type: impl Into<String>) -> Self {
        self.default_account_type = account_type.into();
        self
    }

    #[must_use]
    pub fn with_reset_url(mut self, url: impl Into<String>) -> Self {
        self.reset_url = url.into();
        self
    }

    #[must_use]
    pub fn with_verification_cooldown(mut self, cooldown: Duration) -> Self {
        self.verification_cooldown = cooldown;
        self
    }

    #[must_use]
    pub fn with_recovery_cooldown(mut self, cooldown: Duration) -> Self {
        self.recovery_cooldown = cooldown;
        self
    }

    #[must_use]
    pub fn with_max_verification_attempts(mut self, attempts: i32) -> Self {
        self.max_verification_attempts = attempts;
        self
    }

    #[must_use]
    pub fn default_account_type(&self) -> &str {
        &self.default_account_type
    }
}

impl Default for AccountPolicy {
    fn default() -> Self {
        Self::new()
    }
}
