//! Self-service endpoints. The caller is whoever the gateway authenticated.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use utoipa::ToSchema;

use super::{caller, error_response, retry_after};
use crate::accounts::{AccountSummary, VerificationDispatch, VerifyOutcome};
use crate::api::AppState;

#[derive(ToSchema, Serialize, Debug)]
pub struct ApiKeyResponse {
    api_key: String,
    api_key_preview: Option<String>,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct ConfirmRequest {
    code: String,
}

#[utoipa::path(
    get,
    path= "/v1/me",
    responses (
        (status = 200, description = "Caller's account", body = AccountSummary),
        (status = 401, description = "No consumer identity"),
        (status = 404, description = "No active account for this identity"),
    ),
    tag= "me"
)]
pub async fn me(headers: HeaderMap, state: Extension<Arc<AppState>>) -> impl IntoResponse {
    let username = match caller(&headers) {
        Ok(username) => username,
        Err(response) => return response,
    };

    match state.provisioner().account_summary(&username).await {
        Ok(Some(summary)) => (StatusCode::OK, Json(summary)).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => error_response(&err),
    }
}

#[utoipa::path(
    post,
    path= "/v1/me/api-key",
    responses (
        (status = 200, description = "New API key, shown once", body = ApiKeyResponse),
        (status = 401, description = "No consumer identity"),
        (status = 404, description = "Unknown account"),
    ),
    tag= "me"
)]
pub async fn api_key(headers: HeaderMap, state: Extension<Arc<AppState>>) -> impl IntoResponse {
    let username = match caller(&headers) {
        Ok(username) => username,
        Err(response) => return response,
    };

    match state.provisioner().generate_api_key(&username).await {
        Ok((api_key, account)) => {
            info!(username, "api key rotated");

            let body = ApiKeyResponse {
                api_key,
                api_key_preview: account.api_key_preview,
            };
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(err) => error_response(&err),
    }
}

#[utoipa::path(
    post,
    path= "/v1/me/verification",
    responses (
        (status = 202, description = "Verification code sent"),
        (status = 401, description = "No consumer identity"),
        (status = 403, description = "Account disabled"),
        (status = 409, description = "Email already verified"),
        (status = 429, description = "Resend cooldown active, see Retry-After"),
    ),
    tag= "me"
)]
pub async fn send_verification(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
) -> impl IntoResponse {
    let username = match caller(&headers) {
        Ok(username) => username,
        Err(response) => return response,
    };

    match state.provisioner().send_verification_code(&username).await {
        Ok(VerificationDispatch::Sent) => StatusCode::ACCEPTED.into_response(),
        Ok(VerificationDispatch::AlreadyVerified) => {
            (StatusCode::CONFLICT, "Email already verified").into_response()
        }
        Ok(VerificationDispatch::Disabled) => {
            (StatusCode::FORBIDDEN, "Account disabled").into_response()
        }
        Ok(VerificationDispatch::Cooldown { retry_after_secs }) => (
            StatusCode::TOO_MANY_REQUESTS,
            retry_after(retry_after_secs),
            "Verification code recently sent",
        )
            .into_response(),
        Err(err) => error_response(&err),
    }
}

#[utoipa::path(
    post,
    path= "/v1/me/verification/confirm",
    request_body = ConfirmRequest,
    responses (
        (status = 204, description = "Email verified, account active"),
        (status = 400, description = "Wrong code or missing payload"),
        (status = 401, description = "No consumer identity"),
        (status = 409, description = "Account is not pending verification"),
        (status = 410, description = "Code expired"),
        (status = 429, description = "Too many wrong codes"),
    ),
    tag= "me"
)]
pub async fn confirm_verification(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    payload: Option<Json<ConfirmRequest>>,
) -> impl IntoResponse {
    let username = match caller(&headers) {
        Ok(username) => username,
        Err(response) => return response,
    };
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload").into_response();
    };

    match state
        .provisioner()
        .verify_email(&username, request.code.trim())
        .await
    {
        Ok(VerifyOutcome::Verified) => StatusCode::NO_CONTENT.into_response(),
        Ok(VerifyOutcome::InvalidCode) => {
            (StatusCode::BAD_REQUEST, "Invalid verification code").into_response()
        }
        Ok(VerifyOutcome::Expired) => {
            (StatusCode::GONE, "Verification code expired").into_response()
        }
        Ok(VerifyOutcome::AttemptsExhausted) => {
            warn!(username, "verification attempts exhausted");
            (
                StatusCode::TOO_MANY_REQUESTS,
                "Too many attempts, request a new code",
            )
                .into_response()
        }
        Ok(VerifyOutcome::NotPending) => {
            (StatusCode::CONFLICT, "Nothing to verify").into_response()
        }
        Err(err) => error_response(&err),
    }
}
