use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::gateway::GatewayError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Unknown user, wrong password or a consumer disabled at the gateway.
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("account disabled")]
    AccountDisabled,

    #[error("too many attempts, locked until {0}")]
    TooManyAttempts(DateTime<Utc>),

    #[error("gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("gateway returned {0}: {1}")]
    GatewayError(u16, String),

    #[error("account `{0}` already exists")]
    AccountAlreadyExists(String),

    #[error("email `{0}` already registered")]
    EmailAlreadyExists(String),

    #[error("account not found")]
    AccountNotFound,

    /// The local row exists but the gateway has no matching consumer.
    #[error("gateway consumer `{0}` missing")]
    ConsumerMissing(String),

    #[error("profile `{0}` not found")]
    ProfileNotFound(String),

    #[error("profile `{0}` already exists")]
    ProfileAlreadyExists(String),

    #[error("password found in {0} known breaches")]
    PasswordNotSecure(u64),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<GatewayError> for Error {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Status { status, body } => Self::GatewayError(status, body),
            GatewayError::Unavailable(source) => Self::GatewayUnavailable(source.to_string()),
            GatewayError::Decode(message) => Self::GatewayUnavailable(message),
        }
    }
}

impl Error {
    /// True for failures caused by the gateway, either transport or status.
    #[must_use]
    pub fn is_gateway(&self) -> bool {
        matches!(self, Self::GatewayUnavailable(_) | Self::GatewayError(..))
    }
}
