//! Admin management of rate-limit profiles.

use axum::{
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;
use utoipa::ToSchema;

use super::{error_response, require_admin};
use crate::api::AppState;
use crate::profiles::{default_profiles, NewProfile, ProfileUpdate, RateLimitProfile, SyncReport};

/// Profile changes; a `name` different from the current one renames it.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ProfilePatch {
    name: Option<String>,
    #[serde(flatten)]
    changes: ProfileUpdate,
}

#[utoipa::path(
    get,
    path = "/v1/profiles",
    responses(
        (status = 200, description = "All rate-limit profiles.", body = [RateLimitProfile]),
        (status = 401, description = "No consumer identity."),
        (status = 403, description = "Forbidden."),
    ),
    tag = "admin"
)]
pub async fn list_profiles(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
) -> impl IntoResponse {
    if let Err(response) = require_admin(&headers, state.config()) {
        return response;
    }

    match state.profiles().list_profiles().await {
        Ok(profiles) => (StatusCode::OK, Json(profiles)).into_response(),
        Err(err) => error_response(&err),
    }
}

#[utoipa::path(
    post,
    path = "/v1/profiles",
    request_body = NewProfile,
    responses(
        (status = 201, description = "Profile created.", body = RateLimitProfile),
        (status = 400, description = "Invalid profile name."),
        (status = 409, description = "Profile already exists."),
    ),
    tag = "admin"
)]
pub async fn create_profile(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    payload: Option<Json<NewProfile>>,
) -> impl IntoResponse {
    let admin = match require_admin(&headers, state.config()) {
        Ok(admin) => admin,
        Err(response) => return response,
    };
    let Some(Json(new)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload").into_response();
    };

    match state.profiles().create_profile(new).await {
        Ok(profile) => {
            info!(admin, profile = %profile.name, "profile created");
            (StatusCode::CREATED, Json(profile)).into_response()
        }
        Err(err) => error_response(&err),
    }
}

#[utoipa::path(
    get,
    path = "/v1/profiles/{name}",
    params(
        ("name" = String, Path, description = "Profile name")
    ),
    responses(
        (status = 200, description = "Profile detail.", body = RateLimitProfile),
        (status = 404, description = "Profile not found."),
    ),
    tag = "admin"
)]
pub async fn get_profile(
    Path(name): Path<String>,
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
) -> impl IntoResponse {
    if let Err(response) = require_admin(&headers, state.config()) {
        return response;
    }

    match state.profiles().get_profile(&name).await {
        Ok(Some(profile)) => (StatusCode::OK, Json(profile)).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => error_response(&err),
    }
}

#[utoipa::path(
    patch,
    path = "/v1/profiles/{name}",
    params(
        ("name" = String, Path, description = "Profile name")
    ),
    request_body = ProfilePatch,
    responses(
        (status = 200, description = "Updated profile, under its new name after a rename.", body = RateLimitProfile),
        (status = 400, description = "Invalid profile name."),
        (status = 404, description = "Profile not found."),
        (status = 409, description = "Target name already taken."),
    ),
    tag = "admin"
)]
pub async fn update_profile(
    Path(name): Path<String>,
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    payload: Option<Json<ProfilePatch>>,
) -> impl IntoResponse {
    let admin = match require_admin(&headers, state.config()) {
        Ok(admin) => admin,
        Err(response) => return response,
    };
    let Some(Json(patch)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload").into_response();
    };

    match state
        .profiles()
        .update_profile(&name, &patch.changes, patch.name.as_deref())
        .await
    {
        Ok(profile) => {
            info!(admin, profile = %profile.name, "profile updated");
            (StatusCode::OK, Json(profile)).into_response()
        }
        Err(err) => error_response(&err),
    }
}

#[utoipa::path(
    delete,
    path = "/v1/profiles/{name}",
    params(
        ("name" = String, Path, description = "Profile name")
    ),
    responses(
        (status = 204, description = "Profile removed (or already absent)."),
    ),
    tag = "admin"
)]
pub async fn delete_profile(
    Path(name): Path<String>,
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
) -> impl IntoResponse {
    let admin = match require_admin(&headers, state.config()) {
        Ok(admin) => admin,
        Err(response) => return response,
    };

    match state.profiles().delete_profile(&name).await {
        Ok(_) => {
            info!(admin, profile = %name, "profile deleted");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(err) => error_response(&err),
    }
}

/// Creates the `basic` and `pro` profiles, or resets them to their default
/// quotas when they already exist.
#[utoipa::path(
    post,
    path = "/v1/profiles/sync-defaults",
    responses(
        (status = 200, description = "Per-profile outcome.", body = SyncReport),
        (status = 401, description = "No consumer identity."),
        (status = 403, description = "Forbidden."),
    ),
    tag = "admin"
)]
pub async fn sync_default_profiles(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
) -> impl IntoResponse {
    let admin = match require_admin(&headers, state.config()) {
        Ok(admin) => admin,
        Err(response) => return response,
    };

    let report = state.profiles().sync_defaults(&default_profiles()).await;
    info!(admin, "default profiles sync requested");

    (StatusCode::OK, Json(report)).into_response()
}
