use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Pending,
    Active,
    Disabled,
}

impl AccountStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Disabled => "disabled",
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "disabled" => Ok(Self::Disabled),
            other => Err(format!("unknown account status: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Account {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub status: AccountStatus,
    pub account_type: String,
    pub federated: bool,
    pub email_verified: bool,
    pub api_key_preview: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Self-service view of an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct AccountSummary {
    pub username: String,
    pub email: String,
    pub status: AccountStatus,
    pub email_verified: bool,
    pub api_key_preview: Option<String>,
}

impl From<Account> for AccountSummary {
    fn from(account: Account) -> Self {
        Self {
            username: account.username,
            email: account.email,
            status: account.status,
            email_verified: account.email_verified,
            api_key_preview: account.api_key_preview,
        }
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewAccount {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub status: Option<AccountStatus>,
    #[serde(default)]
    pub account_type: Option<String>,
    #[serde(default)]
    pub federated: bool,
    #[serde(default)]
    pub email_verified: bool,
}

/// Partial update. `username`, `password`, `account_type` and `api_key` are
/// pushed to the gateway consumer; the rest only exists locally.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct AccountUpdate {
    pub username: Option<String>,
    pub password: Option<String>,
    pub account_type: Option<String>,
    pub api_key: Option<String>,
    pub email: Option<String>,
    pub status: Option<AccountStatus>,
    pub federated: Option<bool>,
    pub email_verified: Option<bool>,
}

impl AccountUpdate {
    #[must_use]
    pub fn touches_gateway(&self) -> bool {
        self.username.is_some()
            || self.password.is_some()
            || self.account_type.is_some()
            || self.api_key.is_some()
    }
}

/// Row values for a new account, defaults already resolved.
#[derive(Debug, Clone)]
pub struct AccountDraft {
    pub username: String,
    pub email: String,
    pub status: AccountStatus,
    pub account_type: String,
    pub federated: bool,
    pub email_verified: bool,
}

/// Column changes persisted after the gateway accepted its part.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountChanges {
    pub username: Option<String>,
    pub email: Option<String>,
    pub status: Option<AccountStatus>,
    pub account_type: Option<String>,
    pub federated: Option<bool>,
    pub email_verified: Option<bool>,
    pub api_key_preview: Option<String>,
}

impl AccountChanges {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AccountFilter {
    pub status: Option<AccountStatus>,
    pub account_type: Option<String>,
    pub federated: Option<bool>,
    pub email_verified: Option<bool>,
    /// Case-insensitive match on username or email.
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// One-time code or token state kept on the account row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Challenge {
    pub code: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub attempts: i32,
    pub last_sent: Option<DateTime<Utc>>,
}
