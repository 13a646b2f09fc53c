//! Local account rows.
//!
//! Usernames and emails are unique at the database level; a violated
//! constraint comes back as a [`WriteOutcome`] instead of an error so callers
//! can report which field collided.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Postgres, QueryBuilder, Row};
use tracing::{info_span, Instrument};
use uuid::Uuid;

use super::model::{
    Account, AccountChanges, AccountDraft, AccountFilter, AccountStatus, Challenge,
};

pub const DEFAULT_LIST_LIMIT: i64 = 50;
pub const MAX_LIST_LIMIT: i64 = 500;

const ACCOUNT_COLUMNS: &str = "id, username, email, status, account_type, federated, \
     email_verified, api_key_preview, created_at, updated_at";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Written(Account),
    UsernameTaken,
    EmailTaken,
    Missing,
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>>;

    async fn find_by_username(&self, username: &str) -> Result<Option<Account>>;

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>>;

    async fn list(&self, filter: &AccountFilter) -> Result<Vec<Account>>;

    async fn insert(&self, draft: &AccountDraft) -> Result<WriteOutcome>;

    async fn update(&self, id: Uuid, changes: &AccountChanges) -> Result<WriteOutcome>;

    /// Returns whether a row was removed.
    async fn delete(&self, id: Uuid) -> Result<bool>;

    async fn verification(&self, id: Uuid) -> Result<Option<Challenge>>;

    /// Stores a fresh code and resets the attempt counter.
    async fn save_verification_code(
        &self,
        id: Uuid,
        code: &str,
        expires_at: DateTime<Utc>,
        sent_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Increments the attempt counter and returns the new value.
    async fn record_verification_attempt(&self, id: Uuid) -> Result<i32>;

    /// Sets `email_verified`, activates the account and clears the code.
    async fn mark_email_verified(&self, id: Uuid) -> Result<()>;

    async fn recovery(&self, id: Uuid) -> Result<Option<Challenge>>;

    async fn save_recovery_token(
        &self,
        id: Uuid,
        token: &str,
        expires_at: DateTime<Utc>,
        sent_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Account owning `token` when the token expires after `now`.
    async fn find_by_recovery_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Account>>;

    async fn clear_recovery_token(&self, id: Uuid) -> Result<()>;
}

#[derive(Clone)]
pub struct PgAccountStore {
    pool: PgPool,
}

impl PgAccountStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_one(&self, column: &str, value: &str) -> Result<Option<Account>> {
        let query = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE {column} = $1");

        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = %query
        );
        let row = sqlx::query(&query)
            .bind(value)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .with_context(|| format!("failed to look up account by {column}"))?;

        row.as_ref().map(account_from_row).transpose()
    }

    async fn challenge(&self, query: &str, id: Uuid) -> Result<Option<Challenge>> {
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to read account challenge")?;

        Ok(row.map(|row| Challenge {
            code: row.get("code"),
            expires_at: row.get("expires_at"),
            attempts: row.get("attempts"),
            last_sent: row.get("last_sent"),
        }))
    }

    async fn execute(&self, operation: &'static str, query: &str, id: Uuid) -> Result<()> {
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = operation,
            db.statement = query
        );
        sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to update account")?;

        Ok(())
    }
}

fn account_from_row(row: &PgRow) -> Result<Account> {
    let status: String = row.get("status");

    Ok(Account {
        id: row.get("id"),
        username: row.get("username"),
        email: row.get("email"),
        status: status.parse::<AccountStatus>().map_err(|err| anyhow!(err))?,
        account_type: row.get("account_type"),
        federated: row.get("federated"),
        email_verified: row.get("email_verified"),
        api_key_preview: row.get("api_key_preview"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn written(row: Option<PgRow>) -> Result<WriteOutcome> {
    match row {
        Some(row) => Ok(WriteOutcome::Written(account_from_row(&row)?)),
        None => Ok(WriteOutcome::Missing),
    }
}

/// Maps a unique violation on `accounts` to the field that collided.
pub(crate) fn unique_conflict(err: &sqlx::Error) -> Option<WriteOutcome> {
    let sqlx::Error::Database(db_err) = err else {
        return None;
    };

    if db_err.code().as_deref() != Some("23505") {
        return None;
    }

    match db_err.constraint() {
        Some("accounts_email_key") => Some(WriteOutcome::EmailTaken),
        _ => Some(WriteOutcome::UsernameTaken),
    }
}

#[async_trait]
impl AccountStore for PgAccountStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>> {
        let query = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1");

        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = %query
        );
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to look up account by id")?;

        row.as_ref().map(account_from_row).transpose()
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<Account>> {
        self.find_one("username", username).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>> {
        self.find_one("email", email).await
    }

    async fn list(&self, filter: &AccountFilter) -> Result<Vec<Account>> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE TRUE"
        ));

        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(account_type) = &filter.account_type {
            builder
                .push(" AND account_type = ")
                .push_bind(account_type.clone());
        }
        if let Some(federated) = filter.federated {
            builder.push(" AND federated = ").push_bind(federated);
        }
        if let Some(email_verified) = filter.email_verified {
            builder.push(" AND email_verified = ").push_bind(email_verified);
        }
        if let Some(search) = filter.search.as_deref().filter(|s| !s.is_empty()) {
            let pattern = like_pattern(search);
            builder
                .push(" AND (username ILIKE ")
                .push_bind(pattern.clone())
                .push(r" ESCAPE '\' OR email ILIKE ")
                .push_bind(pattern)
                .push(r" ESCAPE '\')");
        }

        let limit = filter
            .limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .clamp(1, MAX_LIST_LIMIT);
        let offset = filter.offset.unwrap_or(0).max(0);
        builder
            .push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = builder.sql()
        );
        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .context("failed to list accounts")?;

        rows.iter().map(account_from_row).collect()
    }

    async fn insert(&self, draft: &AccountDraft) -> Result<WriteOutcome> {
        let query = format!(
            "INSERT INTO accounts (username, email, status, account_type, federated, email_verified) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {ACCOUNT_COLUMNS}"
        );

        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = %query
        );
        let result = sqlx::query(&query)
            .bind(&draft.username)
            .bind(&draft.email)
            .bind(draft.status.as_str())
            .bind(&draft.account_type)
            .bind(draft.federated)
            .bind(draft.email_verified)
            .fetch_one(&self.pool)
            .instrument(span)
            .await;

        match result {
            Ok(row) => Ok(WriteOutcome::Written(account_from_row(&row)?)),
            Err(err) => match unique_conflict(&err) {
                Some(outcome) => Ok(outcome),
                None => Err(err).context("failed to insert account"),
            },
        }
    }

    async fn update(&self, id: Uuid, changes: &AccountChanges) -> Result<WriteOutcome> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new("UPDATE accounts SET updated_at = NOW()");

        if let Some(username) = &changes.username {
            builder.push(", username = ").push_bind(username.clone());
        }
        if let Some(email) = &changes.email {
            builder.push(", email = ").push_bind(email.clone());
        }
        if let Some(status) = changes.status {
            builder.push(", status = ").push_bind(status.as_str());
        }
        if let Some(account_type) = &changes.account_type {
            builder
                .push(", account_type = ")
                .push_bind(account_type.clone());
        }
        if let Some(federated) = changes.federated {
            builder.push(", federated = ").push_bind(federated);
        }
        if let Some(email_verified) = changes.email_verified {
            builder.push(", email_verified = ").push_bind(email_verified);
        }
        if let Some(preview) = &changes.api_key_preview {
            builder.push(", api_key_preview = ").push_bind(preview.clone());
        }
        builder
            .push(" WHERE id = ")
            .push_bind(id)
            .push(format!(" RETURNING {ACCOUNT_COLUMNS}"));

        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = builder.sql()
        );
        let result = builder
            .build()
            .fetch_optional(&self.pool)
            .instrument(span)
            .await;

        match result {
            Ok(row) => written(row),
            Err(err) => match unique_conflict(&err) {
                Some(outcome) => Ok(outcome),
                None => Err(err).context("failed to update account"),
            },
        }
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let query = "DELETE FROM accounts WHERE id = $1";

        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete account")?;

        Ok(result.rows_affected() > 0)
    }

    async fn verification(&self, id: Uuid) -> Result<Option<Challenge>> {
        self.challenge(
            r"
            SELECT verification_code AS code,
                   verification_code_expires AS expires_at,
                   verification_attempts AS attempts,
                   last_verification_sent AS last_sent
            FROM accounts
            WHERE id = $1
            ",
            id,
        )
        .await
    }

    async fn save_verification_code(
        &self,
        id: Uuid,
        code: &str,
        expires_at: DateTime<Utc>,
        sent_at: DateTime<Utc>,
    ) -> Result<()> {
        let query = r"
            UPDATE accounts
            SET verification_code = $2,
                verification_code_expires = $3,
                verification_attempts = 0,
                last_verification_sent = $4,
                updated_at = NOW()
            WHERE id = $1
        ";

        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(id)
            .bind(code)
            .bind(expires_at)
            .bind(sent_at)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to store verification code")?;

        Ok(())
    }

    async fn record_verification_attempt(&self, id: Uuid) -> Result<i32> {
        let query = r"
            UPDATE accounts
            SET verification_attempts = verification_attempts + 1
            WHERE id = $1
            RETURNING verification_attempts
        ";

        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(id)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .context("failed to record verification attempt")?;

        Ok(row.get("verification_attempts"))
    }

    async fn mark_email_verified(&self, id: Uuid) -> Result<()> {
        self.execute(
            "UPDATE",
            r"
            UPDATE accounts
            SET email_verified = TRUE,
                status = 'active',
                verification_code = NULL,
                verification_code_expires = NULL,
                verification_attempts = 0,
                updated_at = NOW()
            WHERE id = $1
            ",
            id,
        )
        .await
    }

    async fn recovery(&self, id: Uuid) -> Result<Option<Challenge>> {
        self.challenge(
            r"
            SELECT recovery_token AS code,
                   recovery_token_expires AS expires_at,
                   0 AS attempts,
                   last_recovery_sent AS last_sent
            FROM accounts
            WHERE id = $1
            ",
            id,
        )
        .await
    }

    async fn save_recovery_token(
        &self,
        id: Uuid,
        token: &str,
        expires_at: DateTime<Utc>,
        sent_at: DateTime<Utc>,
    ) -> Result<()> {
        let query = r"
            UPDATE accounts
            SET recovery_token = $2,
                recovery_token_expires = $3,
                last_recovery_sent = $4,
                updated_at = NOW()
            WHERE id = $1
        ";

        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(id)
            .bind(token)
            .bind(expires_at)
            .bind(sent_at)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to store recovery token")?;

        Ok(())
    }

    async fn find_by_recovery_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Account>> {
        let query = format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts \
             WHERE recovery_token = $1 AND recovery_token_expires > $2"
        );

        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = %query
        );
        let row = sqlx::query(&query)
            .bind(token)
            .bind(now)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to look up recovery token")?;

        row.as_ref().map(account_from_row).transpose()
    }

    async fn clear_recovery_token(&self, id: Uuid) -> Result<()> {
        self.execute(
            "UPDATE",
            r"
            UPDATE accounts
            SET recovery_token = NULL,
                recovery_token_expires = NULL,
                updated_at = NOW()
            WHERE id = $1
            ",
            id,
        )
        .await
    }
}

/// Substring pattern for `ILIKE ... ESCAPE '\'` that matches `search` literally.
fn like_pattern(search: &str) -> String {
    let mut pattern = String::with_capacity(search.len() + 2);
    pattern.push('%');
    for c in search.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}
