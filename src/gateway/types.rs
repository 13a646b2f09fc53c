//! Typed views of the gateway admin documents.
//!
//! Every struct keeps the fields it does not model in a flattened `extra` map so
//! a fetched document can be merged and written back without dropping
//! out-of-band configuration. Read-only timestamps are accepted on input and
//! never serialized.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const JWT_AUTH_ALGORITHM: &str = "HS256";
pub const RATE_LIMIT_COUNTER_KEY: &str = "consumer_name";
pub const RATE_LIMIT_KEY_TYPE: &str = "var";
pub const DEFAULT_TIME_WINDOW: u64 = 60;
pub const DEFAULT_REJECTED_CODE: u16 = 429;
pub const DEFAULT_REJECTED_MSG: &str = "Rate limit exceeded";
pub const DEFAULT_POLICY: &str = "local";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Consumer {
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    #[serde(default)]
    pub plugins: ConsumerPlugins,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<i64>,
    #[serde(default, skip_serializing)]
    pub create_time: Option<i64>,
    #[serde(default, skip_serializing)]
    pub update_time: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Consumer {
    #[must_use]
    pub fn new(username: &str, group_id: &str, jwt_auth: JwtAuth) -> Self {
        Self {
            username: username.to_string(),
            group_id: Some(group_id.to_string()),
            plugins: ConsumerPlugins {
                jwt_auth: Some(jwt_auth),
                ..ConsumerPlugins::default()
            },
            ..Self::default()
        }
    }

    /// A consumer carrying `status: 0` has been switched off at the gateway.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.status == Some(0)
    }

    #[must_use]
    pub fn secret(&self) -> Option<&str> {
        self.plugins
            .jwt_auth
            .as_ref()
            .map(|plugin| plugin.secret.as_str())
            .filter(|secret| !secret.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsumerPlugins {
    #[serde(rename = "jwt-auth", default, skip_serializing_if = "Option::is_none")]
    pub jwt_auth: Option<JwtAuth>,
    #[serde(rename = "key-auth", default, skip_serializing_if = "Option::is_none")]
    pub key_auth: Option<KeyAuth>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JwtAuth {
    pub key: String,
    #[serde(default)]
    pub secret: String,
    #[serde(default = "default_algorithm")]
    pub algorithm: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl JwtAuth {
    #[must_use]
    pub fn hs256(key: &str, secret: &str) -> Self {
        Self {
            key: key.to_string(),
            secret: secret.to_string(),
            algorithm: default_algorithm(),
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyAuth {
    pub key: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsumerGroup {
    /// Filled from the response; the URL carries the id on writes.
    #[serde(default, skip_serializing)]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    #[serde(default)]
    pub plugins: GroupPlugins,
    #[serde(default, skip_serializing)]
    pub create_time: Option<i64>,
    #[serde(default, skip_serializing)]
    pub update_time: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupPlugins {
    #[serde(rename = "limit-count", default, skip_serializing_if = "Option::is_none")]
    pub limit_count: Option<LimitCount>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

/// `limit-count` plugin block. Missing fields take the values the gateway
/// itself would apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitCount {
    #[serde(default)]
    pub count: u64,
    #[serde(default = "default_time_window")]
    pub time_window: u64,
    #[serde(default = "default_counter_key")]
    pub key: String,
    #[serde(default = "default_key_type")]
    pub key_type: String,
    #[serde(default = "default_rejected_code")]
    pub rejected_code: u16,
    #[serde(default = "default_rejected_msg")]
    pub rejected_msg: String,
    #[serde(default = "default_policy")]
    pub policy: String,
    #[serde(default = "default_true")]
    pub show_limit_quota_header: bool,
    #[serde(default)]
    pub nodelay: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for LimitCount {
    fn default() -> Self {
        Self {
            count: 0,
            time_window: DEFAULT_TIME_WINDOW,
            key: default_counter_key(),
            key_type: default_key_type(),
            rejected_code: DEFAULT_REJECTED_CODE,
            rejected_msg: default_rejected_msg(),
            policy: default_policy(),
            show_limit_quota_header: true,
            nodelay: false,
            extra: Map::new(),
        }
    }
}

/// Single resource envelope: `{"key": "/apisix/consumers/alice", "value": {...}}`.
#[derive(Debug, Deserialize)]
pub(crate) struct Item<T> {
    #[serde(default)]
    pub key: Option<String>,
    pub value: T,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Listing<T> {
    #[serde(default)]
    pub list: Vec<Item<T>>,
}

/// Last path segment of an etcd style key.
pub(crate) fn id_from_key(key: &str) -> Option<&str> {
    key.rsplit('/').next().filter(|id| !id.is_empty())
}

fn default_algorithm() -> String {
    JWT_AUTH_ALGORITHM.to_string()
}

fn default_counter_key() -> String {
    RATE_LIMIT_COUNTER_KEY.to_string()
}

fn default_key_type() -> String {
    RATE_LIMIT_KEY_TYPE.to_string()
}

const fn default_time_window() -> u64 {
    DEFAULT_TIME_WINDOW
}

const fn default_rejected_code() -> u16 {
    DEFAULT_REJECTED_CODE
}

fn default_rejected_msg() -> String {
    DEFAULT_REJECTED_MSG.to_string()
}

fn default_policy() -> String {
    DEFAULT_POLICY.to_string()
}

const fn default_true() -> bool {
    true
}
