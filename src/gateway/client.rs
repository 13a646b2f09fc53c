use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, info_span, Instrument};
use url::Url;

use super::types::{id_from_key, Item, Listing};
use super::{Consumer, ConsumerGroup, Gateway, GatewayError};
use crate::APP_USER_AGENT;

pub const API_KEY_HEADER: &str = "X-API-KEY";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_LIST_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    base_url: String,
    api_key: SecretString,
    timeout: Duration,
    list_timeout: Duration,
}

impl GatewayConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_key: SecretString) -> Self {
        Self {
            base_url: base_url.into(),
            api_key,
            timeout: DEFAULT_TIMEOUT,
            list_timeout: DEFAULT_LIST_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_list_timeout(mut self, timeout: Duration) -> Self {
        self.list_timeout = timeout;
        self
    }
}

/// HTTP client for the gateway admin API.
pub struct GatewayClient {
    client: Client,
    base_url: Url,
    api_key: SecretString,
    timeout: Duration,
    list_timeout: Duration,
}

impl GatewayClient {
    /// # Errors
    /// Returns an error if the base URL is invalid or the HTTP client cannot be built.
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .with_context(|| format!("invalid gateway URL: {}", config.base_url))?;

        if base_url.cannot_be_a_base() {
            return Err(anyhow!("gateway URL cannot be used as a base: {base_url}"));
        }

        let client = Client::builder().user_agent(APP_USER_AGENT).build()?;

        debug!("gateway admin API: {}", base_url);

        Ok(Self {
            client,
            base_url,
            api_key: config.api_key,
            timeout: config.timeout,
            list_timeout: config.list_timeout,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn get_item<T: DeserializeOwned>(
        &self,
        url: Url,
    ) -> Result<Option<Item<T>>, GatewayError> {
        let span = info_span!("gateway.get", http.method = "GET", url = %url);
        let response = self
            .client
            .get(url.clone())
            .header(API_KEY_HEADER, self.api_key.expose_secret())
            .timeout(self.timeout)
            .send()
            .instrument(span)
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let item = success(response)
            .await?
            .json::<Item<T>>()
            .await
            .map_err(|err| GatewayError::Decode(format!("{url}: {err}")))?;

        Ok(Some(item))
    }

    async fn put_item<T: serde::Serialize + Sync>(
        &self,
        url: Url,
        body: &T,
    ) -> Result<(), GatewayError> {
        let span = info_span!("gateway.put", http.method = "PUT", url = %url);
        let response = self
            .client
            .put(url)
            .header(API_KEY_HEADER, self.api_key.expose_secret())
            .timeout(self.timeout)
            .json(body)
            .send()
            .instrument(span)
            .await?;

        success(response).await.map(|_| ())
    }

    async fn delete_item(&self, url: Url) -> Result<(), GatewayError> {
        let span = info_span!("gateway.delete", http.method = "DELETE", url = %url);
        let response = self
            .client
            .delete(url)
            .header(API_KEY_HEADER, self.api_key.expose_secret())
            .timeout(self.timeout)
            .send()
            .instrument(span)
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }

        success(response).await.map(|_| ())
    }
}

async fn success(response: Response) -> Result<Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();

    Err(GatewayError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl Gateway for GatewayClient {
    async fn get_consumer(&self, username: &str) -> Result<Option<Consumer>, GatewayError> {
        let item = self
            .get_item::<Consumer>(self.endpoint(&["consumers", username]))
            .await?;

        Ok(item.map(|item| item.value))
    }

    async fn put_consumer(&self, consumer: &Consumer) -> Result<(), GatewayError> {
        self.put_item(self.endpoint(&["consumers", &consumer.username]), consumer)
            .await
    }

    async fn delete_consumer(&self, username: &str) -> Result<(), GatewayError> {
        self.delete_item(self.endpoint(&["consumers", username]))
            .await
    }

    async fn get_group(&self, name: &str) -> Result<Option<ConsumerGroup>, GatewayError> {
        let item = self
            .get_item::<ConsumerGroup>(self.endpoint(&["consumer_groups", name]))
            .await?;

        Ok(item.map(|item| {
            let mut group = item.value;
            group.id.get_or_insert_with(|| name.to_string());
            group
        }))
    }

    async fn put_group(&self, name: &str, group: &ConsumerGroup) -> Result<(), GatewayError> {
        self.put_item(self.endpoint(&["consumer_groups", name]), group)
            .await
    }

    async fn delete_group(&self, name: &str) -> Result<(), GatewayError> {
        self.delete_item(self.endpoint(&["consumer_groups", name]))
            .await
    }

    async fn list_groups(&self) -> Result<Vec<ConsumerGroup>, GatewayError> {
        let url = self.endpoint(&["consumer_groups"]);
        let span = info_span!("gateway.list", http.method = "GET", url = %url);
        let response = self
            .client
            .get(url.clone())
            .header(API_KEY_HEADER, self.api_key.expose_secret())
            .timeout(self.list_timeout)
            .send()
            .instrument(span)
            .await?;

        let listing = success(response)
            .await?
            .json::<Listing<ConsumerGroup>>()
            .await
            .map_err(|err| GatewayError::Decode(format!("{url}: {err}")))?;

        Ok(listing
            .list
            .into_iter()
            .map(|item| {
                let mut group = item.value;
                if group.id.is_none() {
                    group.id = item.key.as_deref().and_then(id_from_key).map(str::to_string);
                }
                group
            })
            .collect())
    }
}
