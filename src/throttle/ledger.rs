//! Login attempt ledger.
//!
//! Attempts are append-only facts; locks are one row per `(username, address)`
//! maintained with a single upsert statement so concurrent lockouts never hit a
//! duplicate key.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::{info_span, Instrument};

#[async_trait]
pub trait AttemptLedger: Send + Sync {
    /// Failed attempts for the key with `attempted_at >= since`.
    async fn count_failures_since(
        &self,
        username: &str,
        address: &str,
        since: DateTime<Utc>,
    ) -> Result<i64>;

    async fn record_attempt(
        &self,
        username: &str,
        address: &str,
        success: bool,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// Lock expiry for the key when it is still later than `now`.
    async fn active_lock(
        &self,
        username: &str,
        address: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>>;

    async fn upsert_lock(
        &self,
        username: &str,
        address: &str,
        locked_until: DateTime<Utc>,
    ) -> Result<()>;

    async fn clear_lock(&self, username: &str, address: &str) -> Result<()>;
}

#[derive(Clone)]
pub struct PgAttemptLedger {
    pool: PgPool,
}

impl PgAttemptLedger {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AttemptLedger for PgAttemptLedger {
    async fn count_failures_since(
        &self,
        username: &str,
        address: &str,
        since: DateTime<Utc>,
    ) -> Result<i64> {
        let query = r"
            SELECT COUNT(*) AS failures
            FROM login_attempts
            WHERE username = $1
              AND address = $2
              AND success = FALSE
              AND attempted_at >= $3
        ";

        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(username)
            .bind(address)
            .bind(since)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .context("failed to count login failures")?;

        Ok(row.get("failures"))
    }

    async fn record_attempt(
        &self,
        username: &str,
        address: &str,
        success: bool,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let query = r"
            INSERT INTO login_attempts (username, address, attempted_at, success)
            VALUES ($1, $2, $3, $4)
        ";

        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(username)
            .bind(address)
            .bind(at)
            .bind(success)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to record login attempt")?;

        Ok(())
    }

    async fn active_lock(
        &self,
        username: &str,
        address: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        let query = r"
            SELECT locked_until
            FROM login_locks
            WHERE username = $1
              AND address = $2
              AND locked_until > $3
        ";

        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(username)
            .bind(address)
            .bind(now)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to read login lock")?;

        Ok(row.map(|row| row.get("locked_until")))
    }

    async fn upsert_lock(
        &self,
        username: &str,
        address: &str,
        locked_until: DateTime<Utc>,
    ) -> Result<()> {
        let query = r"
            INSERT INTO login_locks (username, address, locked_until)
            VALUES ($1, $2, $3)
            ON CONFLICT (username, address)
            DO UPDATE SET locked_until = EXCLUDED.locked_until
        ";

        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(username)
            .bind(address)
            .bind(locked_until)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to upsert login lock")?;

        Ok(())
    }

    async fn clear_lock(&self, username: &str, address: &str) -> Result<()> {
        let query = "DELETE FROM login_locks WHERE username = $1 AND address = $2";

        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(username)
            .bind(address)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to clear login lock")?;

        Ok(())
    }
}
