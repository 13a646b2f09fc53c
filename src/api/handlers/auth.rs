//! Public authentication endpoints.
//!
//! Login answers every failure that is not an active lock with the same 401
//! body, whatever the cause (unknown user, wrong password, disabled account,
//! gateway or ledger trouble).

use axum::{
    extract::{ConnectInfo, Extension},
    http::{
        header::{InvalidHeaderValue, COOKIE, SET_COOKIE},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::{IntoResponse, Redirect},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc};
use tracing::{error, info, warn};
use utoipa::ToSchema;

use super::{client_address, error_response, header_str, retry_after};
use crate::accounts::{AccountStatus, AccountSummary, NewAccount};
use crate::api::{ApiConfig, AppState};
use crate::auth::{login::retry_after_secs, FederatedIdentity, LoginOutcome};
use crate::error::Error;

pub const TOKEN_COOKIE_NAME: &str = "gatekeep_token";
pub const FEDERATED_MAIL_HEADER: &str = "shib-mail";
pub const FEDERATED_SESSION_HEADER: &str = "shib-session-id";

#[derive(ToSchema, Deserialize, Debug)]
pub struct LoginRequest {
    username: String,
    password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
pub struct LoginResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    access_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<AccountStatus>,
}

impl LoginResponse {
    fn denied() -> Json<Self> {
        Json(Self::default())
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
pub struct CheckTokenResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<String>,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct SignupRequest {
    username: String,
    email: String,
    password: String,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct RecoveryRequest {
    email: String,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct ResetRequest {
    token: String,
    password: String,
}

#[utoipa::path(
    post,
    path= "/v1/auth/token",
    request_body = LoginRequest,
    responses (
        (status = 200, description = "Credentials accepted", body = LoginResponse),
        (status = 400, description = "Missing payload"),
        (status = 401, description = "Login refused", body = LoginResponse),
        (status = 429, description = "Too many failed attempts, see Retry-After", body = LoginResponse),
    ),
    tag= "auth"
)]
pub async fn login(
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    state: Extension<Arc<AppState>>,
    payload: Option<Json<LoginRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };

    let address = client_address(
        &headers,
        state.config(),
        peer.map(|ConnectInfo(addr)| addr),
    );
    let username = request.username.trim();

    match state
        .login()
        .attempt(username, &request.password, &address)
        .await
    {
        Ok(LoginOutcome::Granted(authenticated)) => {
            info!(username, "login granted");

            let body = LoginResponse {
                success: true,
                access_token: Some(authenticated.token),
                status: Some(authenticated.status),
            };
            (StatusCode::OK, Json(body)).into_response()
        }
        Ok(LoginOutcome::Locked { locked_until }) => {
            let secs = retry_after_secs(locked_until, Utc::now());
            (
                StatusCode::TOO_MANY_REQUESTS,
                retry_after(secs),
                LoginResponse::denied(),
            )
                .into_response()
        }
        Ok(LoginOutcome::Denied) => {
            (StatusCode::UNAUTHORIZED, LoginResponse::denied()).into_response()
        }
        Err(err) => {
            error!(username, "login aborted: {err}");
            (StatusCode::UNAUTHORIZED, LoginResponse::denied()).into_response()
        }
    }
}

#[utoipa::path(
    get,
    path= "/v1/auth/federated",
    params(
        ("shib-mail" = String, Header, description = "Mail asserted by the identity provider"),
        ("shib-session-id" = String, Header, description = "Identity provider session")
    ),
    responses (
        (status = 303, description = "Redirect to the frontend with the token cookie set"),
        (status = 401, description = "No usable federated identity"),
    ),
    tag= "auth"
)]
pub async fn federated(headers: HeaderMap, state: Extension<Arc<AppState>>) -> impl IntoResponse {
    let identity = header_str(&headers, FEDERATED_SESSION_HEADER)
        .and_then(|_| header_str(&headers, FEDERATED_MAIL_HEADER))
        .and_then(FederatedIdentity::from_mail);

    let Some(identity) = identity else {
        return (StatusCode::UNAUTHORIZED, "Missing federated identity".to_string()).into_response();
    };

    let authenticated = match state
        .authenticator()
        .authenticate_federated(state.provisioner(), &identity)
        .await
    {
        Ok(authenticated) => authenticated,
        Err(err @ (Error::InvalidCredentials | Error::AccountDisabled)) => {
            warn!(username = %identity.username, "federated login refused: {err}");
            return (StatusCode::UNAUTHORIZED, "Login refused".to_string()).into_response();
        }
        Err(err) => {
            error!(username = %identity.username, "federated login failed: {err}");
            return (StatusCode::UNAUTHORIZED, "Login refused".to_string()).into_response();
        }
    };

    let ttl_seconds = state.authenticator().token_ttl().num_seconds();
    let cookie = match token_cookie(state.config(), &authenticated.token, ttl_seconds) {
        Ok(cookie) => cookie,
        Err(err) => {
            error!("Failed to build token cookie: {err}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
                .into_response();
        }
    };

    let mut response_headers = HeaderMap::new();
    response_headers.insert(SET_COOKIE, cookie);

    info!(username = %identity.username, "federated login granted");

    (
        response_headers,
        Redirect::to(state.config().frontend_url()),
    )
        .into_response()
}

#[utoipa::path(
    get,
    path= "/v1/auth/check-token",
    responses (
        (status = 200, description = "Token from the cookie, if one is set", body = CheckTokenResponse),
    ),
    tag= "auth"
)]
pub async fn check_token(headers: HeaderMap) -> impl IntoResponse {
    let body = match extract_token_cookie(&headers) {
        Some(token) => CheckTokenResponse {
            success: true,
            token: Some(token),
        },
        None => CheckTokenResponse::default(),
    };

    (StatusCode::OK, Json(body)).into_response()
}

#[utoipa::path(
    get,
    path= "/v1/auth/logout",
    responses (
        (status = 303, description = "Redirect to the frontend with the token cookie cleared"),
    ),
    tag= "auth"
)]
pub async fn logout(state: Extension<Arc<AppState>>) -> impl IntoResponse {
    let cookie = match clear_token_cookie(state.config()) {
        Ok(cookie) => cookie,
        Err(err) => {
            error!("Failed to build logout cookie: {err}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
                .into_response();
        }
    };

    let mut response_headers = HeaderMap::new();
    response_headers.insert(SET_COOKIE, cookie);

    (
        response_headers,
        Redirect::to(state.config().frontend_url()),
    )
        .into_response()
}

#[utoipa::path(
    post,
    path= "/v1/auth/signup",
    request_body = SignupRequest,
    responses (
        (status = 201, description = "Pending account created, verification code sent", body = AccountSummary),
        (status = 400, description = "Invalid input or breached password"),
        (status = 409, description = "Username or email already taken"),
    ),
    tag= "auth"
)]
pub async fn signup(
    state: Extension<Arc<AppState>>,
    payload: Option<Json<SignupRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };

    let new = NewAccount {
        username: request.username.trim().to_string(),
        email: request.email.trim().to_string(),
        password: request.password,
        status: Some(AccountStatus::Pending),
        account_type: None,
        federated: false,
        email_verified: false,
    };

    let account = match state.provisioner().create_account(new).await {
        Ok(account) => account,
        Err(err) => return error_response(&err),
    };

    if let Err(err) = state
        .provisioner()
        .send_verification_code(&account.username)
        .await
    {
        warn!(username = %account.username, "verification code not sent: {err}");
    }

    (StatusCode::CREATED, Json(AccountSummary::from(account))).into_response()
}

#[utoipa::path(
    post,
    path= "/v1/auth/password-recovery",
    request_body = RecoveryRequest,
    responses (
        (status = 204, description = "Accepted, whether or not the email is known"),
        (status = 400, description = "Missing payload"),
    ),
    tag= "auth"
)]
pub async fn password_recovery(
    state: Extension<Arc<AppState>>,
    payload: Option<Json<RecoveryRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };

    if let Err(err) = state
        .provisioner()
        .request_password_recovery(request.email.trim())
        .await
    {
        error!("Password recovery failed: {err}");
    }

    StatusCode::NO_CONTENT.into_response()
}

#[utoipa::path(
    post,
    path= "/v1/auth/password-reset",
    request_body = ResetRequest,
    responses (
        (status = 204, description = "Password changed"),
        (status = 400, description = "Invalid or expired token, or invalid password"),
    ),
    tag= "auth"
)]
pub async fn password_reset(
    state: Extension<Arc<AppState>>,
    payload: Option<Json<ResetRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };

    match state
        .provisioner()
        .reset_password(request.token.trim(), &request.password)
        .await
    {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => {
            (StatusCode::BAD_REQUEST, "Invalid or expired token".to_string()).into_response()
        }
        Err(err) => error_response(&err),
    }
}

/// `HttpOnly` cookie carrying a freshly issued token.
fn token_cookie(
    config: &ApiConfig,
    token: &str,
    ttl_seconds: i64,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!(
        "{TOKEN_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={ttl_seconds}"
    );
    // Only mark cookies secure when the frontend is served over HTTPS.
    if config.frontend_url().starts_with("https://") {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

fn clear_token_cookie(config: &ApiConfig) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!("{TOKEN_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    if config.frontend_url().starts_with("https://") {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

fn extract_token_cookie(headers: &HeaderMap) -> Option<String> {
    let cookie_header = headers.get(COOKIE)?.to_str().ok()?;
    for part in cookie_header.split(';') {
        let mut pieces = part.trim().splitn(2, '=');
        let name = pieces.next()?.trim();
        let value = pieces.next()?.trim();
        if name == TOKEN_COOKIE_NAME && !value.is_empty() {
            return Some(value.to_string());
        }
    }
    None
}
