//! In-memory doubles for the gateway, the storage traits and the mailer.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use uuid::Uuid;

use crate::accounts::{
    Account, AccountChanges, AccountDraft, AccountFilter, AccountPolicy, AccountProvisioner,
    AccountStatus, AccountStore, Challenge, WriteOutcome,
};
use crate::auth::{Authenticator, TokenIssuer};
use crate::breach::{BreachCheck, NoBreachCheck};
use crate::email::{EmailMessage, EmailSender};
use crate::gateway::{Consumer, ConsumerGroup, Gateway, GatewayError, LimitCount};
use crate::profiles::ProfileReconciler;
use crate::throttle::AttemptLedger;

fn injected() -> GatewayError {
    GatewayError::Status {
        status: 500,
        body: "injected failure".to_string(),
    }
}

#[derive(Default)]
pub(crate) struct FakeGateway {
    consumers: Mutex<BTreeMap<String, Consumer>>,
    groups: Mutex<BTreeMap<String, ConsumerGroup>>,
    failing_group_puts: Mutex<HashSet<String>>,
    failing_group_deletes: Mutex<HashSet<String>>,
    fail_consumer_get: AtomicBool,
    fail_consumer_put: AtomicBool,
    fail_consumer_delete: AtomicBool,
}

impl FakeGateway {
    pub(crate) fn group(&self, name: &str) -> Option<ConsumerGroup> {
        self.groups.lock().unwrap().get(name).cloned()
    }

    pub(crate) fn insert_group(&self, name: &str, group: ConsumerGroup) {
        self.groups.lock().unwrap().insert(name.to_string(), group);
    }

    /// Rate-limit group with gateway defaults and `count` requests.
    pub(crate) fn profile(&self, name: &str, count: u64) {
        let mut group = ConsumerGroup::default();
        group.plugins.limit_count = Some(LimitCount {
            count,
            ..LimitCount::default()
        });
        self.insert_group(name, group);
    }

    pub(crate) fn fail_group_put(&self, name: &str) {
        self.failing_group_puts
            .lock()
            .unwrap()
            .insert(name.to_string());
    }

    pub(crate) fn fail_group_delete(&self, name: &str) {
        self.failing_group_deletes
            .lock()
            .unwrap()
            .insert(name.to_string());
    }

    pub(crate) fn consumer(&self, username: &str) -> Option<Consumer> {
        self.consumers.lock().unwrap().get(username).cloned()
    }

    pub(crate) fn insert_consumer(&self, consumer: Consumer) {
        self.consumers
            .lock()
            .unwrap()
            .insert(consumer.username.clone(), consumer);
    }

    pub(crate) fn remove_consumer(&self, username: &str) {
        self.consumers.lock().unwrap().remove(username);
    }

    pub(crate) fn consumer_count(&self) -> usize {
        self.consumers.lock().unwrap().len()
    }

    pub(crate) fn fail_consumer_get(&self) {
        self.fail_consumer_get.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_consumer_put(&self) {
        self.fail_consumer_put.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_consumer_delete(&self) {
        self.fail_consumer_delete.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Gateway for FakeGateway {
    async fn get_consumer(&self, username: &str) -> Result<Option<Consumer>, GatewayError> {
        if self.fail_consumer_get.load(Ordering::SeqCst) {
            return Err(injected());
        }
        Ok(self.consumer(username))
    }

    async fn put_consumer(&self, consumer: &Consumer) -> Result<(), GatewayError> {
        if self.fail_consumer_put.load(Ordering::SeqCst) {
            return Err(injected());
        }
        self.insert_consumer(consumer.clone());
        Ok(())
    }

    async fn delete_consumer(&self, username: &str) -> Result<(), GatewayError> {
        if self.fail_consumer_delete.load(Ordering::SeqCst) {
            return Err(injected());
        }
        self.remove_consumer(username);
        Ok(())
    }

    async fn get_group(&self, name: &str) -> Result<Option<ConsumerGroup>, GatewayError> {
        Ok(self.group(name).map(|mut group| {
            group.id = Some(name.to_string());
            group
        }))
    }

    async fn put_group(&self, name: &str, group: &ConsumerGroup) -> Result<(), GatewayError> {
        if self.failing_group_puts.lock().unwrap().contains(name) {
            return Err(injected());
        }
        let mut group = group.clone();
        group.id = None;
        self.insert_group(name, group);
        Ok(())
    }

    async fn delete_group(&self, name: &str) -> Result<(), GatewayError> {
        if self.failing_group_deletes.lock().unwrap().contains(name) {
            return Err(injected());
        }
        self.groups.lock().unwrap().remove(name);
        Ok(())
    }

    async fn list_groups(&self) -> Result<Vec<ConsumerGroup>, GatewayError> {
        Ok(self
            .groups
            .lock()
            .unwrap()
            .iter()
            .map(|(name, group)| {
                let mut group = group.clone();
                group.id = Some(name.clone());
                group
            })
            .collect())
    }
}

struct Attempt {
    username: String,
    address: String,
    success: bool,
    at: DateTime<Utc>,
}

#[derive(Default)]
pub(crate) struct MemoryLedger {
    attempts: Mutex<Vec<Attempt>>,
    locks: Mutex<HashMap<(String, String), DateTime<Utc>>>,
    fail_writes: AtomicBool,
}

impl MemoryLedger {
    /// `(successes, failures)` recorded for the key.
    pub(crate) fn attempts(&self, username: &str, address: &str) -> (usize, usize) {
        let attempts = self.attempts.lock().unwrap();
        let matching = attempts
            .iter()
            .filter(|a| a.username == username && a.address == address);
        let successes = matching.clone().filter(|a| a.success).count();
        let failures = matching.filter(|a| !a.success).count();
        (successes, failures)
    }

    pub(crate) fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    fn writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(anyhow!("ledger unavailable"));
        }
        Ok(())
    }
}

fn key(username: &str, address: &str) -> (String, String) {
    (username.to_string(), address.to_string())
}

#[async_trait]
impl AttemptLedger for MemoryLedger {
    async fn count_failures_since(
        &self,
        username: &str,
        address: &str,
        since: DateTime<Utc>,
    ) -> Result<i64> {
        let attempts = self.attempts.lock().unwrap();
        let count = attempts
            .iter()
            .filter(|a| {
                a.username == username && a.address == address && !a.success && a.at >= since
            })
            .count();
        Ok(i64::try_from(count)?)
    }

    async fn record_attempt(
        &self,
        username: &str,
        address: &str,
        success: bool,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.writable()?;
        self.attempts.lock().unwrap().push(Attempt {
            username: username.to_string(),
            address: address.to_string(),
            success,
            at,
        });
        Ok(())
    }

    async fn active_lock(
        &self,
        username: &str,
        address: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        let locks = self.locks.lock().unwrap();
        Ok(locks
            .get(&key(username, address))
            .copied()
            .filter(|until| *until > now))
    }

    async fn upsert_lock(
        &self,
        username: &str,
        address: &str,
        locked_until: DateTime<Utc>,
    ) -> Result<()> {
        self.writable()?;
        self.locks
            .lock()
            .unwrap()
            .insert(key(username, address), locked_until);
        Ok(())
    }

    async fn clear_lock(&self, username: &str, address: &str) -> Result<()> {
        self.writable()?;
        self.locks.lock().unwrap().remove(&key(username, address));
        Ok(())
    }
}

#[derive(Clone)]
struct StoredAccount {
    account: Account,
    verification: Challenge,
    recovery: Challenge,
}

#[derive(Default)]
pub(crate) struct MemoryAccountStore {
    rows: Mutex<BTreeMap<Uuid, StoredAccount>>,
    fail_deletes: AtomicBool,
}

impl MemoryAccountStore {
    pub(crate) fn account(&self, username: &str) -> Option<Account> {
        self.rows
            .lock()
            .unwrap()
            .values()
            .find(|row| row.account.username == username)
            .map(|row| row.account.clone())
    }

    pub(crate) fn remove(&self, username: &str) {
        self.rows
            .lock()
            .unwrap()
            .retain(|_, row| row.account.username != username);
    }

    pub(crate) fn count(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub(crate) fn fail_deletes(&self) {
        self.fail_deletes.store(true, Ordering::SeqCst);
    }

    fn with_row<T>(&self, id: Uuid, f: impl FnOnce(&mut StoredAccount) -> T) -> Result<T> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows.get_mut(&id).ok_or_else(|| anyhow!("no account {id}"))?;
        Ok(f(row))
    }

    fn find(&self, predicate: impl Fn(&Account) -> bool) -> Option<Account> {
        self.rows
            .lock()
            .unwrap()
            .values()
            .find(|row| predicate(&row.account))
            .map(|row| row.account.clone())
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>> {
        Ok(self.find(|account| account.id == id))
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<Account>> {
        Ok(self.find(|account| account.username == username))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>> {
        Ok(self.find(|account| account.email == email))
    }

    async fn list(&self, filter: &AccountFilter) -> Result<Vec<Account>> {
        let search = filter.search.as_deref().map(str::to_lowercase);
        let mut accounts: Vec<Account> = self
            .rows
            .lock()
            .unwrap()
            .values()
            .map(|row| row.account.clone())
            .filter(|a| filter.status.map_or(true, |s| a.status == s))
            .filter(|a| {
                filter
                    .account_type
                    .as_deref()
                    .map_or(true, |t| a.account_type == t)
            })
            .filter(|a| filter.federated.map_or(true, |f| a.federated == f))
            .filter(|a| filter.email_verified.map_or(true, |v| a.email_verified == v))
            .filter(|a| {
                search.as_deref().map_or(true, |s| {
                    a.username.to_lowercase().contains(s) || a.email.to_lowercase().contains(s)
                })
            })
            .collect();
        accounts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(accounts)
    }

    async fn insert(&self, draft: &AccountDraft) -> Result<WriteOutcome> {
        let mut rows = self.rows.lock().unwrap();
        if rows.values().any(|r| r.account.username == draft.username) {
            return Ok(WriteOutcome::UsernameTaken);
        }
        if rows.values().any(|r| r.account.email == draft.email) {
            return Ok(WriteOutcome::EmailTaken);
        }

        let now = Utc::now();
        let account = Account {
            id: Uuid::new_v4(),
            username: draft.username.clone(),
            email: draft.email.clone(),
            status: draft.status,
            account_type: draft.account_type.clone(),
            federated: draft.federated,
            email_verified: draft.email_verified,
            api_key_preview: None,
            created_at: now,
            updated_at: now,
        };
        rows.insert(
            account.id,
            StoredAccount {
                account: account.clone(),
                verification: Challenge::default(),
                recovery: Challenge::default(),
            },
        );
        Ok(WriteOutcome::Written(account))
    }

    async fn update(&self, id: Uuid, changes: &AccountChanges) -> Result<WriteOutcome> {
        let mut rows = self.rows.lock().unwrap();

        for other in rows.values().filter(|r| r.account.id != id) {
            if changes.username.as_ref() == Some(&other.account.username) {
                return Ok(WriteOutcome::UsernameTaken);
            }
            if changes.email.as_ref() == Some(&other.account.email) {
                return Ok(WriteOutcome::EmailTaken);
            }
        }

        let Some(row) = rows.get_mut(&id) else {
            return Ok(WriteOutcome::Missing);
        };
        let account = &mut row.account;
        if let Some(username) = &changes.username {
            account.username.clone_from(username);
        }
        if let Some(email) = &changes.email {
            account.email.clone_from(email);
        }
        if let Some(status) = changes.status {
            account.status = status;
        }
        if let Some(account_type) = &changes.account_type {
            account.account_type.clone_from(account_type);
        }
        if let Some(federated) = changes.federated {
            account.federated = federated;
        }
        if let Some(email_verified) = changes.email_verified {
            account.email_verified = email_verified;
        }
        if let Some(preview) = &changes.api_key_preview {
            account.api_key_preview = Some(preview.clone());
        }
        account.updated_at = Utc::now();

        Ok(WriteOutcome::Written(account.clone()))
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(anyhow!("delete refused"));
        }
        Ok(self.rows.lock().unwrap().remove(&id).is_some())
    }

    async fn verification(&self, id: Uuid) -> Result<Option<Challenge>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows.get(&id).map(|row| row.verification.clone()))
    }

    async fn save_verification_code(
        &self,
        id: Uuid,
        code: &str,
        expires_at: DateTime<Utc>,
        sent_at: DateTime<Utc>,
    ) -> Result<()> {
        self.with_row(id, |row| {
            row.verification = Challenge {
                code: Some(code.to_string()),
                expires_at: Some(expires_at),
                attempts: 0,
                last_sent: Some(sent_at),
            };
        })
    }

    async fn record_verification_attempt(&self, id: Uuid) -> Result<i32> {
        self.with_row(id, |row| {
            row.verification.attempts += 1;
            row.verification.attempts
        })
    }

    async fn mark_email_verified(&self, id: Uuid) -> Result<()> {
        self.with_row(id, |row| {
            row.account.email_verified = true;
            row.account.status = AccountStatus::Active;
            row.verification.code = None;
            row.verification.expires_at = None;
            row.verification.attempts = 0;
        })
    }

    async fn recovery(&self, id: Uuid) -> Result<Option<Challenge>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows.get(&id).map(|row| row.recovery.clone()))
    }

    async fn save_recovery_token(
        &self,
        id: Uuid,
        token: &str,
        expires_at: DateTime<Utc>,
        sent_at: DateTime<Utc>,
    ) -> Result<()> {
        self.with_row(id, |row| {
            row.recovery = Challenge {
                code: Some(token.to_string()),
                expires_at: Some(expires_at),
                attempts: 0,
                last_sent: Some(sent_at),
            };
        })
    }

    async fn find_by_recovery_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Account>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .values()
            .find(|row| {
                row.recovery.code.as_deref() == Some(token)
                    && row.recovery.expires_at.is_some_and(|expires| expires > now)
            })
            .map(|row| row.account.clone()))
    }

    async fn clear_recovery_token(&self, id: Uuid) -> Result<()> {
        self.with_row(id, |row| {
            row.recovery.code = None;
            row.recovery.expires_at = None;
        })
    }
}

#[derive(Default)]
pub(crate) struct RecordingEmailSender {
    messages: Mutex<Vec<EmailMessage>>,
    failing: AtomicBool,
}

impl RecordingEmailSender {
    pub(crate) fn last(&self) -> Option<EmailMessage> {
        self.messages.lock().unwrap().last().cloned()
    }

    pub(crate) fn count(&self) -> usize {
        self.messages.lock().unwrap().len()
    }

    pub(crate) fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }
}

impl EmailSender for RecordingEmailSender {
    fn send(&self, message: &EmailMessage) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("smtp relay down"));
        }
        self.messages.lock().unwrap().push(message.clone());
        Ok(())
    }
}

/// Reports every password as seen `.0` times.
pub(crate) struct FixedBreachCheck(pub u64);

#[async_trait]
impl BreachCheck for FixedBreachCheck {
    async fn breach_count(&self, _password: &str) -> Result<u64> {
        Ok(self.0)
    }
}

/// Wired-up core with a `basic` profile already present at the gateway.
pub(crate) struct Fixture {
    pub gateway: Arc<FakeGateway>,
    pub store: Arc<MemoryAccountStore>,
    pub ledger: Arc<MemoryLedger>,
    pub email: Arc<RecordingEmailSender>,
    pub provisioner: Arc<AccountProvisioner>,
    pub authenticator: Arc<Authenticator>,
}

impl Fixture {
    pub(crate) fn new() -> Self {
        Self::build(Arc::new(NoBreachCheck), AccountPolicy::new())
    }

    pub(crate) fn with_breach_check(breach: Arc<dyn BreachCheck>) -> Self {
        Self::build(breach, AccountPolicy::new())
    }

    pub(crate) fn with_policy(policy: AccountPolicy) -> Self {
        Self::build(Arc::new(NoBreachCheck), policy)
    }

    fn build(breach: Arc<dyn BreachCheck>, policy: AccountPolicy) -> Self {
        let gateway = Arc::new(FakeGateway::default());
        gateway.profile("basic", 100);

        let store = Arc::new(MemoryAccountStore::default());
        let ledger = Arc::new(MemoryLedger::default());
        let email = Arc::new(RecordingEmailSender::default());

        let provisioner = Arc::new(AccountProvisioner::new(
            store.clone(),
            gateway.clone(),
            ProfileReconciler::new(gateway.clone()),
            breach,
            email.clone(),
            policy,
        ));
        let authenticator = Arc::new(Authenticator::new(
            gateway.clone(),
            store.clone(),
            TokenIssuer::new(),
        ));

        Self {
            gateway,
            store,
            ledger,
            email,
            provisioner,
            authenticator,
        }
    }
}
