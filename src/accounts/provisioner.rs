use anyhow::anyhow;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::model::{
    Account, AccountChanges, AccountDraft, AccountFilter, AccountStatus, AccountSummary,
    AccountUpdate, NewAccount,
};
use super::store::{AccountStore, WriteOutcome};
use super::validation::{
    api_key_preview, ensure, generate_api_key, valid_api_key, valid_email, valid_password,
    valid_username,
};
use super::AccountPolicy;
use crate::auth::password::hash_password;
use crate::breach::BreachCheck;
use crate::email::EmailSender;
use crate::error::{Error, Result};
use crate::gateway::{Consumer, Gateway, JwtAuth, KeyAuth};
use crate::profiles::ProfileReconciler;

const USERNAME_RULES: &str = "username must be 3-64 letters, digits, '_', '.' or '-'";
const EMAIL_RULES: &str = "invalid email address";
const PASSWORD_RULES: &str = "password must be 8-64 characters";
const API_KEY_RULES: &str = "api key must be 32 base64 characters";

pub struct AccountProvisioner {
    pub(super) store: Arc<dyn AccountStore>,
    pub(super) gateway: Arc<dyn Gateway>,
    pub(super) profiles: ProfileReconciler,
    pub(super) breach: Arc<dyn BreachCheck>,
    pub(super) email: Arc<dyn EmailSender>,
    pub(super) policy: AccountPolicy,
}

impl AccountProvisioner {
    #[must_use]
    pub fn new(
        store: Arc<dyn AccountStore>,
        gateway: Arc<dyn Gateway>,
        profiles: ProfileReconciler,
        breach: Arc<dyn BreachCheck>,
        email: Arc<dyn EmailSender>,
        policy: AccountPolicy,
    ) -> Self {
        Self {
            store,
            gateway,
            profiles,
            breach,
            email,
            policy,
        }
    }

    #[must_use]
    pub fn policy(&self) -> &AccountPolicy {
        &self.policy
    }

    /// Creates the local account and its gateway consumer.
    ///
    /// The profile named by `account_type` must already exist. When the
    /// gateway rejects the consumer the local row is removed again and the
    /// gateway error is returned, so a failure always means "no account".
    ///
    /// # Errors
    /// `InvalidInput`, `AccountAlreadyExists`, `EmailAlreadyExists`,
    /// `PasswordNotSecure`, `ProfileNotFound`, gateway and storage errors.
    pub async fn create_account(&self, new: NewAccount) -> Result<Account> {
        ensure(valid_username(&new.username), USERNAME_RULES)?;
        ensure(valid_email(&new.email), EMAIL_RULES)?;
        ensure(valid_password(&new.password), PASSWORD_RULES)?;

        if self.store.find_by_username(&new.username).await?.is_some() {
            return Err(Error::AccountAlreadyExists(new.username));
        }
        if self.store.find_by_email(&new.email).await?.is_some() {
            return Err(Error::EmailAlreadyExists(new.email));
        }

        self.check_breaches(&new.password).await?;

        let account_type = new
            .account_type
            .unwrap_or_else(|| self.policy.default_account_type.clone());

        if !self.profiles.ensure_profile(&account_type).await? {
            return Err(Error::ProfileNotFound(account_type));
        }

        let secret = hash_password(&new.password)?;

        let draft = AccountDraft {
            username: new.username,
            email: new.email,
            status: new.status.unwrap_or(AccountStatus::Pending),
            account_type,
            federated: new.federated,
            email_verified: new.email_verified,
        };
        let account = self.insert(&draft).await?;

        let consumer = Consumer::new(
            &account.username,
            &account.account_type,
            JwtAuth::hs256(&account.username, &secret),
        );

        if let Err(err) = self.gateway.put_consumer(&consumer).await {
            error!(
                username = %account.username,
                "gateway rejected consumer, removing local account: {err}"
            );
            self.compensate_insert(&account).await;
            return Err(err.into());
        }

        info!(
            username = %account.username,
            account_type = %account.account_type,
            "account created"
        );

        Ok(account)
    }

    /// Applies a partial update, gateway part first.
    ///
    /// # Errors
    /// `AccountNotFound`, `ConsumerMissing`, validation, uniqueness, profile,
    /// gateway and storage errors. Nothing local changes when the gateway fails.
    pub async fn update_account(&self, id: Uuid, update: AccountUpdate) -> Result<Account> {
        let current = self
            .store
            .find_by_id(id)
            .await?
            .ok_or(Error::AccountNotFound)?;

        if let Some(username) = &update.username {
            ensure(valid_username(username), USERNAME_RULES)?;
        }
        if let Some(email) = &update.email {
            ensure(valid_email(email), EMAIL_RULES)?;
        }
        if let Some(password) = &update.password {
            ensure(valid_password(password), PASSWORD_RULES)?;
            self.check_breaches(password).await?;
        }
        if let Some(key) = &update.api_key {
            ensure(valid_api_key(key), API_KEY_RULES)?;
        }

        if let Some(username) = update.username.as_deref() {
            if username != current.username && self.store.find_by_username(username).await?.is_some() {
                return Err(Error::AccountAlreadyExists(username.to_string()));
            }
        }
        if let Some(email) = update.email.as_deref() {
            if email != current.email && self.store.find_by_email(email).await?.is_some() {
                return Err(Error::EmailAlreadyExists(email.to_string()));
            }
        }
        if let Some(account_type) = update.account_type.as_deref() {
            if account_type != current.account_type
                && !self.profiles.ensure_profile(account_type).await?
            {
                return Err(Error::ProfileNotFound(account_type.to_string()));
            }
        }

        if update.touches_gateway() {
            self.push_to_gateway(&current, &update).await?;
        }

        let changes = AccountChanges {
            username: update.username,
            email: update.email,
            status: update.status,
            account_type: update.account_type,
            federated: update.federated,
            email_verified: update.email_verified,
            api_key_preview: update.api_key.as_deref().map(api_key_preview),
        };

        if changes.is_empty() {
            return Ok(current);
        }

        let outcome = match self.store.update(id, &changes).await {
            Ok(outcome) => outcome,
            Err(err) => {
                if update.password.is_some() || changes.username.is_some() {
                    error!(
                        username = %current.username,
                        "gateway consumer updated but local account was not: {err:#}"
                    );
                }
                return Err(err.into());
            }
        };

        match outcome {
            WriteOutcome::Written(account) => {
                info!(username = %account.username, "account updated");
                Ok(account)
            }
            WriteOutcome::UsernameTaken => Err(Error::AccountAlreadyExists(
                changes.username.unwrap_or(current.username),
            )),
            WriteOutcome::EmailTaken => {
                Err(Error::EmailAlreadyExists(changes.email.unwrap_or(current.email)))
            }
            WriteOutcome::Missing => Err(Error::AccountNotFound),
        }
    }

    /// Removes the gateway consumer, then the local row.
    ///
    /// # Errors
    /// `AccountNotFound`, gateway and storage errors.
    pub async fn delete_account(&self, id: Uuid) -> Result<()> {
        let account = self
            .store
            .find_by_id(id)
            .await?
            .ok_or(Error::AccountNotFound)?;

        self.gateway.delete_consumer(&account.username).await?;

        if !self.store.delete(id).await? {
            warn!(username = %account.username, "local account already removed");
        }

        info!(username = %account.username, "account deleted");

        Ok(())
    }

    /// # Errors
    /// `AccountNotFound` or storage errors.
    pub async fn get_account(&self, id: Uuid) -> Result<Account> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or(Error::AccountNotFound)
    }

    /// # Errors
    /// Returns an error if the store cannot be read.
    pub async fn list_accounts(&self, filter: &AccountFilter) -> Result<Vec<Account>> {
        Ok(self.store.list(filter).await?)
    }

    /// Self-service view; disabled accounts are hidden.
    ///
    /// # Errors
    /// Returns an error if the store cannot be read.
    pub async fn account_summary(&self, username: &str) -> Result<Option<AccountSummary>> {
        let account = self.store.find_by_username(username).await?;

        Ok(account
            .filter(|account| account.status != AccountStatus::Disabled)
            .map(AccountSummary::from))
    }

    /// Generates a new API key, installs it on the gateway consumer and keeps
    /// only its preview locally. The clear key is returned once.
    ///
    /// # Errors
    /// `AccountNotFound` plus any `update_account` error.
    pub async fn generate_api_key(&self, username: &str) -> Result<(String, Account)> {
        let account = self
            .store
            .find_by_username(username)
            .await?
            .ok_or(Error::AccountNotFound)?;

        let key = generate_api_key();
        let update = AccountUpdate {
            api_key: Some(key.clone()),
            ..AccountUpdate::default()
        };
        let account = self.update_account(account.id, update).await?;

        Ok((key, account))
    }

    async fn insert(&self, draft: &AccountDraft) -> Result<Account> {
        match self.store.insert(draft).await? {
            WriteOutcome::Written(account) => Ok(account),
            WriteOutcome::UsernameTaken => Err(Error::AccountAlreadyExists(draft.username.clone())),
            WriteOutcome::EmailTaken => Err(Error::EmailAlreadyExists(draft.email.clone())),
            WriteOutcome::Missing => Err(anyhow!("account insert returned no row").into()),
        }
    }

    /// Undo of the local insert after the gateway refused the consumer.
    async fn compensate_insert(&self, account: &Account) {
        match self.store.delete(account.id).await {
            Ok(_) => {
                warn!(username = %account.username, "local account rolled back");
            }
            Err(err) => {
                error!(
                    username = %account.username,
                    account_id = %account.id,
                    "compensation failed, local account has no gateway consumer: {err:#}"
                );
            }
        }
    }

    async fn push_to_gateway(&self, current: &Account, update: &AccountUpdate) -> Result<()> {
        let mut consumer = self
            .gateway
            .get_consumer(&current.username)
            .await?
            .ok_or_else(|| Error::ConsumerMissing(current.username.clone()))?;

        let target = update
            .username
            .clone()
            .unwrap_or_else(|| current.username.clone());
        let secret = update.password.as_deref().map(hash_password).transpose()?;

        consumer.username.clone_from(&target);

        if let Some(jwt) = consumer.plugins.jwt_auth.as_mut() {
            jwt.key.clone_from(&target);
            if let Some(secret) = secret {
                jwt.secret = secret;
            }
        } else if let Some(secret) = secret {
            consumer.plugins.jwt_auth = Some(JwtAuth::hs256(&target, &secret));
        }

        if let Some(account_type) = &update.account_type {
            consumer.group_id = Some(account_type.clone());
        }

        if let Some(key) = &update.api_key {
            if let Some(key_auth) = consumer.plugins.key_auth.as_mut() {
                key_auth.key.clone_from(key);
            } else {
                consumer.plugins.key_auth = Some(KeyAuth {
                    key: key.clone(),
                    ..KeyAuth::default()
                });
            }
        }

        self.gateway.put_consumer(&consumer).await?;

        if target != current.username {
            if let Err(err) = self.gateway.delete_consumer(&current.username).await {
                warn!(
                    username = %current.username,
                    renamed_to = %target,
                    "old gateway consumer left behind after rename: {err}"
                );
            }
        }

        Ok(())
    }

    async fn check_breaches(&self, password: &str) -> Result<()> {
        match self.breach.breach_count(password).await {
            Ok(0) => Ok(()),
            Ok(count) => Err(Error::PasswordNotSecure(count)),
            Err(err) => {
                warn!("breach check unavailable, accepting password: {err:#}");
                Ok(())
            }
        }
    }
}
