//! Admin account management. Every write goes through the provisioner so the
//! gateway consumer and the local row stay paired.

use axum::{
    extract::{Extension, Path, Query},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::{error_response, require_admin};
use crate::accounts::{Account, AccountFilter, AccountUpdate, NewAccount};
use crate::api::AppState;

fn parse_id(id: &str) -> Result<Uuid, Response> {
    Uuid::parse_str(id.trim())
        .map_err(|_| (StatusCode::BAD_REQUEST, "Invalid account id").into_response())
}

#[utoipa::path(
    get,
    path = "/v1/accounts",
    params(AccountFilter),
    responses(
        (status = 200, description = "Accounts matching the filter.", body = [Account]),
        (status = 401, description = "No consumer identity."),
        (status = 403, description = "Forbidden."),
    ),
    tag = "admin"
)]
pub async fn list_accounts(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    Query(filter): Query<AccountFilter>,
) -> impl IntoResponse {
    if let Err(response) = require_admin(&headers, state.config()) {
        return response;
    }

    match state.provisioner().list_accounts(&filter).await {
        Ok(accounts) => (StatusCode::OK, Json(accounts)).into_response(),
        Err(err) => error_response(&err),
    }
}

#[utoipa::path(
    post,
    path = "/v1/accounts",
    request_body = NewAccount,
    responses(
        (status = 201, description = "Account and gateway consumer created.", body = Account),
        (status = 400, description = "Invalid input."),
        (status = 404, description = "Unknown account type."),
        (status = 409, description = "Username or email taken."),
    ),
    tag = "admin"
)]
pub async fn create_account(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    payload: Option<Json<NewAccount>>,
) -> impl IntoResponse {
    let admin = match require_admin(&headers, state.config()) {
        Ok(admin) => admin,
        Err(response) => return response,
    };
    let Some(Json(new)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload").into_response();
    };

    match state.provisioner().create_account(new).await {
        Ok(account) => {
            info!(admin, username = %account.username, "account created");
            (StatusCode::CREATED, Json(account)).into_response()
        }
        Err(err) => error_response(&err),
    }
}

#[utoipa::path(
    get,
    path = "/v1/accounts/{id}",
    params(
        ("id" = String, Path, description = "Account id")
    ),
    responses(
        (status = 200, description = "Account detail.", body = Account),
        (status = 400, description = "Invalid account id."),
        (status = 404, description = "Account not found."),
    ),
    tag = "admin"
)]
pub async fn get_account(
    Path(id): Path<String>,
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
) -> impl IntoResponse {
    if let Err(response) = require_admin(&headers, state.config()) {
        return response;
    }
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(response) => return response,
    };

    match state.provisioner().get_account(id).await {
        Ok(account) => (StatusCode::OK, Json(account)).into_response(),
        Err(err) => error_response(&err),
    }
}

#[utoipa::path(
    patch,
    path = "/v1/accounts/{id}",
    params(
        ("id" = String, Path, description = "Account id")
    ),
    request_body = AccountUpdate,
    responses(
        (status = 200, description = "Updated account.", body = Account),
        (status = 400, description = "Invalid input."),
        (status = 404, description = "Account or account type not found."),
        (status = 409, description = "Username or email taken."),
    ),
    tag = "admin"
)]
pub async fn update_account(
    Path(id): Path<String>,
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    payload: Option<Json<AccountUpdate>>,
) -> impl IntoResponse {
    let admin = match require_admin(&headers, state.config()) {
        Ok(admin) => admin,
        Err(response) => return response,
    };
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    let Some(Json(update)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload").into_response();
    };

    match state.provisioner().update_account(id, update).await {
        Ok(account) => {
            info!(admin, %id, "account updated");
            (StatusCode::OK, Json(account)).into_response()
        }
        Err(err) => error_response(&err),
    }
}

#[utoipa::path(
    delete,
    path = "/v1/accounts/{id}",
    params(
        ("id" = String, Path, description = "Account id")
    ),
    responses(
        (status = 204, description = "Consumer and account removed."),
        (status = 400, description = "Invalid account id."),
        (status = 404, description = "Account not found."),
    ),
    tag = "admin"
)]
pub async fn delete_account(
    Path(id): Path<String>,
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
) -> impl IntoResponse {
    let admin = match require_admin(&headers, state.config()) {
        Ok(admin) => admin,
        Err(response) => return response,
    };
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(response) => return response,
    };

    match state.provisioner().delete_account(id).await {
        Ok(()) => {
            info!(admin, %id, "account deleted");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(err) => error_response(&err),
    }
}
