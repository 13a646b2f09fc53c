//! API handlers and the helpers they share: caller identity from gateway
//! headers, client address resolution and error-to-status mapping.

pub mod accounts;
pub mod auth;
pub mod health;
pub mod me;
pub mod profiles;

use axum::{
    http::{header::RETRY_AFTER, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use tracing::{error, warn};

use super::{ApiConfig, CONSUMER_USERNAME_HEADER};
use crate::error::Error;

/// Address used as the throttle key.
///
/// With proxy trust on, the first entry of the configured forwarded header
/// wins, then `X-Real-IP`. Otherwise, or when neither header is usable, the
/// peer address of the connection.
pub(crate) fn client_address(
    headers: &HeaderMap,
    config: &ApiConfig,
    peer: Option<SocketAddr>,
) -> String {
    if config.trust_proxy() {
        let forwarded = header_str(headers, config.forwarded_header())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|value| !value.is_empty());

        if let Some(address) = forwarded {
            return address.to_string();
        }

        if let Some(address) = header_str(headers, "x-real-ip") {
            return address.to_string();
        }
    }

    peer.map_or_else(|| "unknown".to_string(), |addr| addr.ip().to_string())
}

pub(crate) fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Username the gateway authenticated for this request.
///
/// # Errors
/// 401 when the gateway did not inject an identity.
pub(crate) fn caller(headers: &HeaderMap) -> Result<String, Response> {
    header_str(headers, CONSUMER_USERNAME_HEADER)
        .map(str::to_string)
        .ok_or_else(|| (StatusCode::UNAUTHORIZED, "Missing consumer identity").into_response())
}

/// # Errors
/// 401 without an identity, 403 for anyone but the configured admin.
pub(crate) fn require_admin(headers: &HeaderMap, config: &ApiConfig) -> Result<String, Response> {
    let username = caller(headers)?;

    if username != config.admin_username() {
        warn!(username, "admin endpoint refused");
        return Err((StatusCode::FORBIDDEN, "Forbidden").into_response());
    }

    Ok(username)
}

pub(crate) fn retry_after(secs: i64) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(RETRY_AFTER, HeaderValue::from(secs.max(1)));
    headers
}

/// Status for errors surfaced by admin and self-service endpoints. Gateway
/// and storage detail stays in the log.
pub(crate) fn error_response(err: &Error) -> Response {
    let status = match err {
        Error::AccountAlreadyExists(_)
        | Error::EmailAlreadyExists(_)
        | Error::ProfileAlreadyExists(_) => StatusCode::CONFLICT,
        Error::AccountNotFound | Error::ProfileNotFound(_) => StatusCode::NOT_FOUND,
        Error::InvalidInput(_) | Error::PasswordNotSecure(_) => StatusCode::BAD_REQUEST,
        Error::InvalidCredentials | Error::AccountDisabled => StatusCode::UNAUTHORIZED,
        Error::TooManyAttempts(locked_until) => {
            let secs = (*locked_until - chrono::Utc::now()).num_seconds();
            return (
                StatusCode::TOO_MANY_REQUESTS,
                retry_after(secs),
                err.to_string(),
            )
                .into_response();
        }
        Error::GatewayUnavailable(_)
        | Error::GatewayError(..)
        | Error::ConsumerMissing(_)
        | Error::Internal(_) => {
            error!("Request failed: {err}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response();
        }
    };

    (status, err.to_string()).into_response()
}
