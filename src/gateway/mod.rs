//! Admin API of the gateway that owns consumer secrets and rate-limit groups.
//!
//! Callers only see the [`Gateway`] trait; [`GatewayClient`] is the HTTP
//! implementation. No call is retried here, retry and compensation belong to
//! the callers that know whether repeating a write is safe.

pub mod client;
pub mod types;

pub use self::client::{GatewayClient, GatewayConfig};
pub use self::types::{
    Consumer, ConsumerGroup, ConsumerPlugins, GroupPlugins, JwtAuth, KeyAuth, LimitCount,
};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway request failed: {0}")]
    Unavailable(#[from] reqwest::Error),

    #[error("gateway returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected gateway response: {0}")]
    Decode(String),
}

/// Consumer and consumer-group resources. Writes are create-or-replace (`PUT`),
/// reads fold a 404 into `None`, deletes fold a 404 into success.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn get_consumer(&self, username: &str) -> Result<Option<Consumer>, GatewayError>;

    async fn put_consumer(&self, consumer: &Consumer) -> Result<(), GatewayError>;

    async fn delete_consumer(&self, username: &str) -> Result<(), GatewayError>;

    async fn get_group(&self, name: &str) -> Result<Option<ConsumerGroup>, GatewayError>;

    async fn put_group(&self, name: &str, group: &ConsumerGroup) -> Result<(), GatewayError>;

    async fn delete_group(&self, name: &str) -> Result<(), GatewayError>;

    async fn list_groups(&self) -> Result<Vec<ConsumerGroup>, GatewayError>;
}
