//! Credential checks against the gateway-held secret and token minting.
//!
//! A login walks gateway lookup, password check, local status check and token
//! issue. Any step may end in [`Error::InvalidCredentials`]; only a disabled
//! local account gets its own error, and callers still answer it generically.

pub mod login;
pub mod password;
pub mod token;

pub use self::login::{LoginFlow, LoginOutcome};
pub use self::token::{Claims, TokenIssuer};

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::accounts::{
    validation::{generate_password, valid_email, valid_username},
    AccountProvisioner, AccountStatus, AccountStore, NewAccount,
};
use crate::error::{Error, Result};
use crate::gateway::{Consumer, Gateway};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authenticated {
    pub token: String,
    pub status: AccountStatus,
}

/// Identity asserted by an upstream identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FederatedIdentity {
    pub username: String,
    pub email: String,
}

impl FederatedIdentity {
    /// Username is the local part of `mail` with `.` replaced by `_`.
    #[must_use]
    pub fn from_mail(mail: &str) -> Option<Self> {
        let email = mail.trim();
        if !valid_email(email) {
            return None;
        }

        let (local, _) = email.split_once('@')?;
        let username = local.replace('.', "_");

        valid_username(&username).then(|| Self {
            username,
            email: email.to_string(),
        })
    }
}

pub struct Authenticator {
    gateway: Arc<dyn Gateway>,
    store: Arc<dyn AccountStore>,
    tokens: TokenIssuer,
}

impl Authenticator {
    #[must_use]
    pub fn new(gateway: Arc<dyn Gateway>, store: Arc<dyn AccountStore>, tokens: TokenIssuer) -> Self {
        Self {
            gateway,
            store,
            tokens,
        }
    }

    #[must_use]
    pub fn token_ttl(&self) -> chrono::Duration {
        self.tokens.ttl()
    }

    /// # Errors
    /// `InvalidCredentials`, `AccountDisabled`, gateway errors (callers must
    /// not surface their detail) and storage errors.
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<Authenticated> {
        let consumer = self.lookup(username).await?;

        let secret = consumer.secret().ok_or(Error::InvalidCredentials)?;
        if !password::verify_password(password, secret) {
            debug!(username, "password mismatch");
            return Err(Error::InvalidCredentials);
        }

        self.issue(username, &consumer).await
    }

    /// Login for an identity the upstream provider already authenticated.
    /// Unknown users are provisioned first as active, verified, federated
    /// accounts with a random password.
    ///
    /// # Errors
    /// `InvalidCredentials` when the username belongs to a local account,
    /// `AccountDisabled`, provisioning, gateway and storage errors.
    pub async fn authenticate_federated(
        &self,
        provisioner: &AccountProvisioner,
        identity: &FederatedIdentity,
    ) -> Result<Authenticated> {
        let consumer = match self.gateway.get_consumer(&identity.username).await? {
            Some(consumer) => consumer,
            None => {
                self.provision(provisioner, identity).await?;
                self.gateway
                    .get_consumer(&identity.username)
                    .await?
                    .ok_or(Error::InvalidCredentials)?
            }
        };

        if consumer.is_disabled() {
            return Err(Error::InvalidCredentials);
        }

        let account = self
            .store
            .find_by_username(&identity.username)
            .await?
            .ok_or(Error::InvalidCredentials)?;

        if !account.federated {
            warn!(
                username = %identity.username,
                "federated login refused for a password account"
            );
            return Err(Error::InvalidCredentials);
        }

        self.issue(&identity.username, &consumer).await
    }

    async fn provision(
        &self,
        provisioner: &AccountProvisioner,
        identity: &FederatedIdentity,
    ) -> Result<()> {
        let new = NewAccount {
            username: identity.username.clone(),
            email: identity.email.clone(),
            password: generate_password(),
            status: Some(AccountStatus::Active),
            account_type: None,
            federated: true,
            email_verified: true,
        };

        provisioner.create_account(new).await?;

        info!(username = %identity.username, "federated account provisioned");

        Ok(())
    }

    async fn lookup(&self, username: &str) -> Result<Consumer> {
        match self.gateway.get_consumer(username).await? {
            Some(consumer) if consumer.is_disabled() => {
                debug!(username, "consumer disabled at the gateway");
                Err(Error::InvalidCredentials)
            }
            Some(consumer) => Ok(consumer),
            None => Err(Error::InvalidCredentials),
        }
    }

    async fn issue(&self, username: &str, consumer: &Consumer) -> Result<Authenticated> {
        let account = self
            .store
            .find_by_username(username)
            .await?
            .ok_or(Error::InvalidCredentials)?;

        if account.status == AccountStatus::Disabled {
            return Err(Error::AccountDisabled);
        }

        let secret = consumer.secret().ok_or(Error::InvalidCredentials)?;
        let key = consumer
            .plugins
            .jwt_auth
            .as_ref()
            .map_or(username, |plugin| plugin.key.as_str());

        let token = self.tokens.issue(username, key, secret)?;

        Ok(Authenticated {
            token,
            status: account.status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::AccountUpdate;
    use crate::test_support::Fixture;

    async fn alice(fx: &Fixture, status: AccountStatus) {
        let new = NewAccount {
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
            password: "wonderland-42".to_string(),
            status: Some(status),
            account_type: None,
            federated: false,
            email_verified: false,
        };
        fx.provisioner.create_account(new).await.unwrap();
    }

    #[test]
    fn federated_username_from_mail() {
        let identity = FederatedIdentity::from_mail("jane.doe@uni.example.org").unwrap();
        assert_eq!(identity.username, "jane_doe");
        assert_eq!(identity.email, "jane.doe@uni.example.org");

        assert!(FederatedIdentity::from_mail("not-an-email").is_none());
        assert!(FederatedIdentity::from_mail("a+b@example.com").is_none());
    }

    #[tokio::test]
    async fn correct_password_yields_token_signed_with_consumer_secret() {
        let fx = Fixture::new();
        alice(&fx, AccountStatus::Active).await;

        let auth = fx.authenticator.authenticate("alice", "wonderland-42").await.unwrap();

        assert_eq!(auth.status, AccountStatus::Active);
        let secret = fx.gateway.consumer("alice").unwrap().secret().unwrap().to_string();
        let claims = token::verify(&auth.token, &secret).unwrap();
        assert_eq!(claims.sub, "alice");
        assert_eq!(claims.key, "alice");
    }

    #[tokio::test]
    async fn pending_accounts_can_log_in() {
        let fx = Fixture::new();
        alice(&fx, AccountStatus::Pending).await;

        let auth = fx.authenticator.authenticate("alice", "wonderland-42").await.unwrap();
        assert_eq!(auth.status, AccountStatus::Pending);
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_user_look_the_same() {
        let fx = Fixture::new();
        alice(&fx, AccountStatus::Active).await;

        let wrong = fx.authenticator.authenticate("alice", "nope-nope").await.unwrap_err();
        let unknown = fx.authenticator.authenticate("bob", "wonderland-42").await.unwrap_err();

        assert!(matches!(wrong, Error::InvalidCredentials));
        assert!(matches!(unknown, Error::InvalidCredentials));
    }

    #[tokio::test]
    async fn gateway_disabled_consumer_is_invalid_credentials() {
        let fx = Fixture::new();
        alice(&fx, AccountStatus::Disabled).await;
        let mut consumer = fx.gateway.consumer("alice").unwrap();
        consumer.status = Some(0);
        fx.gateway.insert_consumer(consumer);

        let err = fx.authenticator.authenticate("alice", "wonderland-42").await.unwrap_err();

        assert!(matches!(err, Error::InvalidCredentials));
    }

    #[tokio::test]
    async fn locally_disabled_account_is_distinct() {
        let fx = Fixture::new();
        alice(&fx, AccountStatus::Disabled).await;

        let err = fx.authenticator.authenticate("alice", "wonderland-42").await.unwrap_err();

        assert!(matches!(err, Error::AccountDisabled));
    }

    #[tokio::test]
    async fn missing_local_row_is_invalid_credentials() {
        let fx = Fixture::new();
        alice(&fx, AccountStatus::Active).await;
        fx.store.remove("alice");

        let err = fx.authenticator.authenticate("alice", "wonderland-42").await.unwrap_err();

        assert!(matches!(err, Error::InvalidCredentials));
    }

    #[tokio::test]
    async fn password_change_invalidates_old_tokens() {
        let fx = Fixture::new();
        alice(&fx, AccountStatus::Active).await;
        let old = fx.authenticator.authenticate("alice", "wonderland-42").await.unwrap();

        let id = fx.store.account("alice").unwrap().id;
        let update = AccountUpdate {
            password: Some("through-the-looking-glass".to_string()),
            ..AccountUpdate::default()
        };
        fx.provisioner.update_account(id, update).await.unwrap();

        let secret = fx.gateway.consumer("alice").unwrap().secret().unwrap().to_string();
        assert!(token::verify(&old.token, &secret).is_err());
    }

    #[tokio::test]
    async fn gateway_outage_surfaces_as_gateway_error() {
        let fx = Fixture::new();
        alice(&fx, AccountStatus::Active).await;
        fx.gateway.fail_consumer_get();

        let err = fx.authenticator.authenticate("alice", "wonderland-42").await.unwrap_err();

        assert!(err.is_gateway());
    }

    #[tokio::test]
    async fn first_federated_login_provisions_active_account() {
        let fx = Fixture::new();
        let identity = FederatedIdentity::from_mail("jane.doe@uni.example.org").unwrap();

        let auth = fx
            .authenticator
            .authenticate_federated(&fx.provisioner, &identity)
            .await
            .unwrap();

        assert_eq!(auth.status, AccountStatus::Active);
        let account = fx.store.account("jane_doe").unwrap();
        assert!(account.federated);
        assert!(account.email_verified);
        assert!(fx.gateway.consumer("jane_doe").is_some());

        // returning user, no second account
        fx.authenticator
            .authenticate_federated(&fx.provisioner, &identity)
            .await
            .unwrap();
        assert_eq!(fx.store.count(), 1);
    }

    #[tokio::test]
    async fn federated_login_cannot_take_over_password_account() {
        let fx = Fixture::new();
        alice(&fx, AccountStatus::Active).await;
        let identity = FederatedIdentity {
            username: "alice".to_string(),
            email: "alice@idp.example.org".to_string(),
        };

        let err = fx
            .authenticator
            .authenticate_federated(&fx.provisioner, &identity)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidCredentials));
    }
}
