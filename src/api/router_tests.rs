//! End-to-end router checks against the in-memory doubles.

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    response::Response,
    Router,
};
use serde_json::{json, Value};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tower::ServiceExt;

use super::{app, ApiConfig, AppState, CONSUMER_USERNAME_HEADER};
use crate::accounts::{AccountStatus, NewAccount};
use crate::auth::LoginFlow;
use crate::profiles::ProfileReconciler;
use crate::test_support::Fixture;
use crate::throttle::{LoginThrottle, ThrottleConfig};

fn router(fx: &Fixture) -> Router {
    let login = LoginFlow::new(
        LoginThrottle::new(fx.ledger.clone(), ThrottleConfig::new()),
        fx.authenticator.clone(),
    );
    let state = AppState::new(
        fx.provisioner.clone(),
        fx.authenticator.clone(),
        login,
        ProfileReconciler::new(fx.gateway.clone()),
        ApiConfig::new(),
    );

    // nothing listens here, only /health touches the pool
    let pool = PgPoolOptions::new()
        .acquire_timeout(Duration::from_millis(200))
        .connect_lazy("postgres://gatekeep@127.0.0.1:1/gatekeep")
        .unwrap();

    app(Arc::new(state), pool).unwrap()
}

async fn alice(fx: &Fixture, status: AccountStatus) {
    let new = NewAccount {
        username: "alice".to_string(),
        email: "alice@example.com".to_string(),
        password: "wonderland-42".to_string(),
        status: Some(status),
        account_type: None,
        federated: false,
        email_verified: false,
    };
    fx.provisioner.create_account(new).await.unwrap();
}

fn json_request(method: Method, uri: &str, as_user: Option<&str>, body: &Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(user) = as_user {
        builder = builder.header(CONSUMER_USERNAME_HEADER, user);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn empty_request(method: Method, uri: &str, as_user: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = as_user {
        builder = builder.header(CONSUMER_USERNAME_HEADER, user);
    }
    builder.body(Body::empty()).unwrap()
}

fn login_request(password: &str, forwarded_for: &str) -> Request<Body> {
    let body = json!({ "username": "alice", "password": password });
    let mut request = json_request(Method::POST, "/v1/auth/token", None, &body);
    request
        .headers_mut()
        .insert("x-forwarded-for", forwarded_for.parse().unwrap());
    request
}

async fn body_json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn login_returns_token_and_status() {
    let fx = Fixture::new();
    alice(&fx, AccountStatus::Active).await;

    let response = router(&fx)
        .oneshot(login_request("wonderland-42", "203.0.113.7"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["status"], "active");
    assert!(body["access_token"].as_str().is_some_and(|t| !t.is_empty()));
    assert_eq!(fx.ledger.attempts("alice", "203.0.113.7"), (1, 0));
}

#[tokio::test]
async fn unknown_user_gets_generic_401() {
    let fx = Fixture::new();

    let response = router(&fx)
        .oneshot(login_request("wonderland-42", "203.0.113.7"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await, json!({ "success": false }));
}

#[tokio::test]
async fn lock_is_keyed_by_forwarded_address() {
    let fx = Fixture::new();
    alice(&fx, AccountStatus::Active).await;
    let app = router(&fx);

    for _ in 0..3 {
        let response = app
            .clone()
            .oneshot(login_request("bad-password", "203.0.113.7"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    let response = app
        .clone()
        .oneshot(login_request("wonderland-42", "203.0.113.7"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: i64 = response.headers()[header::RETRY_AFTER]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_after > 0 && retry_after <= 15 * 60);
    assert_eq!(body_json(response).await, json!({ "success": false }));

    let response = app
        .oneshot(login_request("wonderland-42", "198.51.100.2"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn login_without_payload_is_bad_request() {
    let fx = Fixture::new();

    let response = router(&fx)
        .oneshot(empty_request(Method::POST, "/v1/auth/token", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn signup_creates_pending_account_and_mails_code() {
    let fx = Fixture::new();
    let app = router(&fx);
    let body = json!({
        "username": "bob",
        "email": "bob@example.com",
        "password": "builder-of-things",
    });

    let response = app
        .clone()
        .oneshot(json_request(Method::POST, "/v1/auth/signup", None, &body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let summary = body_json(response).await;
    assert_eq!(summary["status"], "pending");
    assert_eq!(summary["email_verified"], false);
    assert_eq!(fx.email.last().unwrap().to_email, "bob@example.com");
    assert!(fx.gateway.consumer("bob").is_some());

    let response = app
        .clone()
        .oneshot(json_request(Method::POST, "/v1/auth/signup", None, &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let short = json!({ "username": "carol", "email": "carol@example.com", "password": "short" });
    let response = app
        .oneshot(json_request(Method::POST, "/v1/auth/signup", None, &short))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn password_recovery_never_reveals_accounts() {
    let fx = Fixture::new();
    let body = json!({ "email": "nobody@example.com" });

    let response = router(&fx)
        .oneshot(json_request(
            Method::POST,
            "/v1/auth/password-recovery",
            None,
            &body,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(fx.email.count(), 0);
}

#[tokio::test]
async fn password_reset_with_unknown_token_is_rejected() {
    let fx = Fixture::new();
    let body = json!({ "token": "x".repeat(32), "password": "a-new-password" });

    let response = router(&fx)
        .oneshot(json_request(
            Method::POST,
            "/v1/auth/password-reset",
            None,
            &body,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn federated_login_redirects_with_cookie() {
    let fx = Fixture::new();
    let request = Request::builder()
        .uri("/v1/auth/federated")
        .header("shib-mail", "jane.doe@uni.example.org")
        .header("shib-session-id", "_abc123")
        .body(Body::empty())
        .unwrap();

    let response = router(&fx).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(response.headers()[header::LOCATION], "http://localhost:3000");
    let cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
    assert!(cookie.starts_with("gatekeep_token="));
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("Max-Age=86400"));
    assert!(fx.store.account("jane_doe").unwrap().federated);
}

#[tokio::test]
async fn federated_login_requires_session_header() {
    let fx = Fixture::new();
    let request = Request::builder()
        .uri("/v1/auth/federated")
        .header("shib-mail", "jane.doe@uni.example.org")
        .body(Body::empty())
        .unwrap();

    let response = router(&fx).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(fx.store.count(), 0);
}

#[tokio::test]
async fn check_token_reads_the_cookie() {
    let fx = Fixture::new();
    let app = router(&fx);

    let request = Request::builder()
        .uri("/v1/auth/check-token")
        .header(header::COOKIE, "theme=dark; gatekeep_token=abc.def.ghi")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await,
        json!({ "success": true, "token": "abc.def.ghi" })
    );

    let response = app
        .oneshot(empty_request(Method::GET, "/v1/auth/check-token", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({ "success": false }));
}

#[tokio::test]
async fn logout_clears_the_cookie() {
    let fx = Fixture::new();

    let response = router(&fx)
        .oneshot(empty_request(Method::GET, "/v1/auth/logout", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(response.headers()[header::LOCATION], "http://localhost:3000");
    let cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
    assert!(cookie.starts_with("gatekeep_token=;"));
    assert!(cookie.contains("Max-Age=0"));
}

#[tokio::test]
async fn me_needs_gateway_identity() {
    let fx = Fixture::new();
    alice(&fx, AccountStatus::Active).await;
    let app = router(&fx);

    let response = app
        .clone()
        .oneshot(empty_request(Method::GET, "/v1/me", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .oneshot(empty_request(Method::GET, "/v1/me", Some("alice")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["username"], "alice");
    assert_eq!(body["email"], "alice@example.com");
}

#[tokio::test]
async fn api_key_is_returned_once_with_preview() {
    let fx = Fixture::new();
    alice(&fx, AccountStatus::Active).await;

    let response = router(&fx)
        .oneshot(empty_request(Method::POST, "/v1/me/api-key", Some("alice")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let key = body["api_key"].as_str().unwrap();
    assert_eq!(key.len(), 32);
    assert_eq!(
        fx.store.account("alice").unwrap().api_key_preview.as_deref(),
        body["api_key_preview"].as_str()
    );
}

#[tokio::test]
async fn verification_resend_respects_state() {
    let fx = Fixture::new();
    alice(&fx, AccountStatus::Pending).await;
    let app = router(&fx);

    let response = app
        .clone()
        .oneshot(empty_request(Method::POST, "/v1/me/verification", Some("alice")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let response = app
        .clone()
        .oneshot(empty_request(Method::POST, "/v1/me/verification", Some("alice")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key(header::RETRY_AFTER));

    let wrong = json!({ "code": "not-it" });
    let response = app
        .oneshot(json_request(
            Method::POST,
            "/v1/me/verification/confirm",
            Some("alice"),
            &wrong,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn admin_routes_check_identity() {
    let fx = Fixture::new();
    let app = router(&fx);

    let response = app
        .clone()
        .oneshot(empty_request(Method::GET, "/v1/accounts", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .oneshot(empty_request(Method::GET, "/v1/profiles", Some("alice")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn admin_account_lifecycle() {
    let fx = Fixture::new();
    let app = router(&fx);

    let new = json!({
        "username": "dave",
        "email": "dave@example.com",
        "password": "open-the-pod-bay",
        "status": "active",
    });
    let response = app
        .clone()
        .oneshot(json_request(Method::POST, "/v1/accounts", Some("admin"), &new))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let id = body_json(response).await["id"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(empty_request(
            Method::GET,
            "/v1/accounts?status=active&search=DAVE",
            Some("admin"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let listed = body_json(response).await;
    assert_eq!(listed.as_array().map(Vec::len), Some(1));

    let patch = json!({ "email": "dave@discovery.example.com" });
    let response = app
        .clone()
        .oneshot(json_request(
            Method::PATCH,
            &format!("/v1/accounts/{id}"),
            Some("admin"),
            &patch,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["email"], "dave@discovery.example.com");

    let response = app
        .clone()
        .oneshot(empty_request(
            Method::DELETE,
            &format!("/v1/accounts/{id}"),
            Some("admin"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(fx.gateway.consumer("dave").is_none());

    let response = app
        .clone()
        .oneshot(empty_request(
            Method::GET,
            &format!("/v1/accounts/{id}"),
            Some("admin"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .oneshot(empty_request(Method::GET, "/v1/accounts/not-a-uuid", Some("admin")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn account_with_unknown_profile_is_not_found() {
    let fx = Fixture::new();
    let new = json!({
        "username": "erin",
        "email": "erin@example.com",
        "password": "a-long-password",
        "account_type": "platinum",
    });

    let response = router(&fx)
        .oneshot(json_request(Method::POST, "/v1/accounts", Some("admin"), &new))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(fx.store.count(), 0);
}

#[tokio::test]
async fn gateway_failure_is_a_generic_500() {
    let fx = Fixture::new();
    fx.gateway.fail_consumer_put();
    let new = json!({
        "username": "erin",
        "email": "erin@example.com",
        "password": "a-long-password",
    });

    let response = router(&fx)
        .oneshot(json_request(Method::POST, "/v1/accounts", Some("admin"), &new))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"Internal server error");
    assert_eq!(fx.store.count(), 0);
}

#[tokio::test]
async fn profile_rename_moves_the_group() {
    let fx = Fixture::new();
    let app = router(&fx);

    let new = json!({ "name": "gold", "count": 1000 });
    let response = app
        .clone()
        .oneshot(json_request(Method::POST, "/v1/profiles", Some("admin"), &new))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let patch = json!({ "name": "platinum", "count": 5000 });
    let response = app
        .clone()
        .oneshot(json_request(
            Method::PATCH,
            "/v1/profiles/gold",
            Some("admin"),
            &patch,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let profile = body_json(response).await;
    assert_eq!(profile["name"], "platinum");
    assert_eq!(profile["count"], 5000);

    let response = app
        .clone()
        .oneshot(empty_request(Method::GET, "/v1/profiles/gold", Some("admin")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .oneshot(json_request(Method::POST, "/v1/profiles", Some("admin"), &json!({ "name": "basic", "count": 1 })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn sync_defaults_creates_and_resets_profiles() {
    let fx = Fixture::new();
    let app = router(&fx);

    let response = app
        .clone()
        .oneshot(empty_request(Method::POST, "/v1/profiles/sync-defaults", Some("alice")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .clone()
        .oneshot(empty_request(Method::POST, "/v1/profiles/sync-defaults", Some("admin")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await,
        json!({ "created": ["pro"], "updated": ["basic"], "errors": [] })
    );

    let response = app
        .oneshot(empty_request(Method::GET, "/v1/profiles/basic", Some("admin")))
        .await
        .unwrap();
    let basic = body_json(response).await;
    assert_eq!(basic["count"], 10);
    assert_eq!(basic["rejected_msg"], "Basic user limit exceeded.");
}

#[tokio::test]
async fn health_reports_database_state() {
    let fx = Fixture::new();
    let app = router(&fx);

    let response = app
        .clone()
        .oneshot(empty_request(Method::GET, "/health", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let app_header = response.headers()["X-App"].to_str().unwrap().to_string();
    assert!(app_header.starts_with(&format!("gatekeep:{}:", env!("CARGO_PKG_VERSION"))));
    let body = body_json(response).await;
    assert_eq!(body["database"], "error");
    assert_eq!(body["name"], "gatekeep");

    let response = app
        .oneshot(empty_request(Method::OPTIONS, "/health", None))
        .await
        .unwrap();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(bytes.is_empty());
}
