//! Email verification codes and password recovery tokens.

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use super::model::{AccountStatus, AccountUpdate};
use super::provisioner::AccountProvisioner;
use super::validation::{
    ensure, generate_recovery_token, generate_verification_code, valid_password,
};
use crate::email::{self, EmailMessage, TEMPLATE_PASSWORD_RECOVERY, TEMPLATE_VERIFICATION};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationDispatch {
    Sent,
    AlreadyVerified,
    Disabled,
    Cooldown { retry_after_secs: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    Verified,
    InvalidCode,
    Expired,
    AttemptsExhausted,
    NotPending,
}

impl AccountProvisioner {
    /// Issues a fresh six digit code, replacing any previous one.
    ///
    /// # Errors
    /// `AccountNotFound` or storage errors.
    pub async fn send_verification_code(&self, username: &str) -> Result<VerificationDispatch> {
        let account = self
            .store
            .find_by_username(username)
            .await?
            .ok_or(Error::AccountNotFound)?;

        if account.email_verified {
            return Ok(VerificationDispatch::AlreadyVerified);
        }
        if account.status == AccountStatus::Disabled {
            return Ok(VerificationDispatch::Disabled);
        }

        let now = Utc::now();
        let challenge = self.store.verification(account.id).await?.unwrap_or_default();

        if let Some(retry_after_secs) =
            cooldown_remaining(challenge.last_sent, self.policy.verification_cooldown, now)
        {
            return Ok(VerificationDispatch::Cooldown { retry_after_secs });
        }

        let code = generate_verification_code();
        let ttl = self.policy.verification_ttl;

        self.store
            .save_verification_code(account.id, &code, now + ttl, now)
            .await?;

        let message = EmailMessage::new(
            &account.email,
            TEMPLATE_VERIFICATION,
            &json!({
                "username": account.username,
                "code": code,
                "expires_minutes": ttl.num_minutes(),
            }),
        );
        email::dispatch(self.email.as_ref(), &message);

        info!(username = %account.username, "verification code sent");

        Ok(VerificationDispatch::Sent)
    }

    /// Checks `code` against the stored one. Every check consumes an attempt;
    /// a correct code marks the email verified and activates a pending account.
    ///
    /// # Errors
    /// `AccountNotFound` or storage errors.
    pub async fn verify_email(&self, username: &str, code: &str) -> Result<VerifyOutcome> {
        let account = self
            .store
            .find_by_username(username)
            .await?
            .ok_or(Error::AccountNotFound)?;

        if account.email_verified || account.status != AccountStatus::Pending {
            return Ok(VerifyOutcome::NotPending);
        }

        let Some(challenge) = self.store.verification(account.id).await? else {
            return Ok(VerifyOutcome::NotPending);
        };
        let (Some(expected), Some(expires_at)) = (challenge.code, challenge.expires_at) else {
            return Ok(VerifyOutcome::NotPending);
        };

        if expires_at <= Utc::now() {
            return Ok(VerifyOutcome::Expired);
        }

        let attempts = self.store.record_verification_attempt(account.id).await?;
        if attempts > self.policy.max_verification_attempts {
            warn!(username = %account.username, attempts, "verification attempts exhausted");
            return Ok(VerifyOutcome::AttemptsExhausted);
        }

        if expected != code.trim() {
            return Ok(VerifyOutcome::InvalidCode);
        }

        self.store.mark_email_verified(account.id).await?;

        info!(username = %account.username, "email verified");

        Ok(VerifyOutcome::Verified)
    }

    /// Mails a reset link when `email` belongs to a local, active account.
    /// The caller answers the same way whatever happened here.
    ///
    /// # Errors
    /// Storage errors only.
    pub async fn request_password_recovery(&self, email: &str) -> Result<()> {
        let Some(account) = self.store.find_by_email(email.trim()).await? else {
            return Ok(());
        };

        if account.federated || account.status != AccountStatus::Active {
            info!(username = %account.username, "recovery not offered for this account");
            return Ok(());
        }

        let now = Utc::now();
        let challenge = self.store.recovery(account.id).await?.unwrap_or_default();

        if cooldown_remaining(challenge.last_sent, self.policy.recovery_cooldown, now).is_some() {
            return Ok(());
        }

        let token = generate_recovery_token();
        let ttl = self.policy.recovery_ttl;

        self.store
            .save_recovery_token(account.id, &token, now + ttl, now)
            .await?;

        let message = EmailMessage::new(
            &account.email,
            TEMPLATE_PASSWORD_RECOVERY,
            &json!({
                "username": account.username,
                "reset_url": format!("{}?t={token}", self.policy.reset_url),
                "expires_minutes": ttl.num_minutes(),
            }),
        );
        email::dispatch(self.email.as_ref(), &message);

        info!(username = %account.username, "password recovery sent");

        Ok(())
    }

    /// Sets a new password through the gateway. `false` means the token is
    /// unknown, expired or belongs to a disabled account.
    ///
    /// # Errors
    /// `InvalidInput`, `PasswordNotSecure`, gateway and storage errors.
    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<bool> {
        ensure(valid_password(new_password), "password must be 8-64 characters")?;

        let Some(account) = self
            .store
            .find_by_recovery_token(token, Utc::now())
            .await?
        else {
            return Ok(false);
        };

        if account.status == AccountStatus::Disabled {
            warn!(username = %account.username, "reset refused for disabled account");
            return Ok(false);
        }

        self.set_password(account.id, new_password).await?;
        self.store.clear_recovery_token(account.id).await?;

        info!(username = %account.username, "password reset");

        Ok(true)
    }

    async fn set_password(&self, id: Uuid, password: &str) -> Result<()> {
        let update = AccountUpdate {
            password: Some(password.to_string()),
            ..AccountUpdate::default()
        };
        self.update_account(id, update).await.map(|_| ())
    }
}

/// Whole seconds left before another message may go out, if any.
fn cooldown_remaining(
    last_sent: Option<DateTime<Utc>>,
    cooldown: Duration,
    now: DateTime<Utc>,
) -> Option<i64> {
    let elapsed = now - last_sent?;
    (elapsed < cooldown).then(|| (cooldown - elapsed).num_seconds().max(1))
}
