//! Known-breach lookup for new passwords.

use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait BreachCheck: Send + Sync {
    /// Number of times `password` shows up in known breach corpora.
    ///
    /// # Errors
    /// Returns an error if the breach source cannot be queried.
    async fn breach_count(&self, password: &str) -> Result<u64>;
}

/// Used when no breach source is configured.
#[derive(Clone, Debug, Default)]
pub struct NoBreachCheck;

#[async_trait]
impl BreachCheck for NoBreachCheck {
    async fn breach_count(&self, _password: &str) -> Result<u64> {
        Ok(0)
    }
}
