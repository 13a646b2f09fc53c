use crate::{
    accounts::{AccountPolicy, AccountProvisioner, AccountStore, PgAccountStore},
    api::handlers::health,
    auth::{Authenticator, LoginFlow, TokenIssuer},
    breach::NoBreachCheck,
    email::LogEmailSender,
    gateway::{Gateway, GatewayClient, GatewayConfig},
    profiles::ProfileReconciler,
    throttle::{AttemptLedger, LoginThrottle, PgAttemptLedger, ThrottleConfig},
};
use anyhow::{anyhow, Context, Result};
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderName, HeaderValue, Method, Request,
    },
    routing::options,
    Extension, Router,
};
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;
use url::Url;
use utoipa_axum::router::OpenApiRouter;
use utoipa_swagger_ui::SwaggerUi;

pub(crate) mod handlers;
mod openapi;

#[cfg(test)]
mod router_tests;

pub use openapi::openapi;

pub const DEFAULT_FORWARDED_HEADER: &str = "X-Forwarded-For";
pub const DEFAULT_ADMIN_USERNAME: &str = "admin";
pub const DEFAULT_FRONTEND_URL: &str = "http://localhost:3000";

/// Header the gateway sets to the authenticated consumer's username.
pub const CONSUMER_USERNAME_HEADER: &str = "x-consumer-username";

/// Build the API router with all documented routes registered.
#[must_use]
pub fn router() -> OpenApiRouter {
    openapi::api_router()
}

/// HTTP-facing settings.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    trust_proxy: bool,
    forwarded_header: String,
    admin_username: String,
    frontend_url: String,
}

impl ApiConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            trust_proxy: true,
            forwarded_header: DEFAULT_FORWARDED_HEADER.to_string(),
            admin_username: DEFAULT_ADMIN_USERNAME.to_string(),
            frontend_url: DEFAULT_FRONTEND_URL.to_string(),
        }
    }

    #[must_use]
    pub fn with_trust_proxy(mut self, trust_proxy: bool) -> Self {
        self.trust_proxy = trust_proxy;
        self
    }

    #[must_use]
    pub fn with_forwarded_header(mut self, header: impl Into<String>) -> Self {
        self.forwarded_header = header.into();
        self
    }

    #[must_use]
    pub fn with_admin_username(mut self, username: impl Into<String>) -> Self {
        self.admin_username = username.into();
        self
    }

    #[must_use]
    pub fn with_frontend_url(mut self, url: impl Into<String>) -> Self {
        self.frontend_url = url.into();
        self
    }

    #[must_use]
    pub fn trust_proxy(&self) -> bool {
        self.trust_proxy
    }

    #[must_use]
    pub fn forwarded_header(&self) -> &str {
        &self.forwarded_header
    }

    #[must_use]
    pub fn admin_username(&self) -> &str {
        &self.admin_username
    }

    #[must_use]
    pub fn frontend_url(&self) -> &str {
        &self.frontend_url
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything the server needs besides the listen port and DSN.
#[derive(Debug, Clone)]
pub struct Settings {
    pub gateway: GatewayConfig,
    pub throttle: ThrottleConfig,
    pub tokens: TokenIssuer,
    pub accounts: AccountPolicy,
    pub api: ApiConfig,
}

/// Shared handler state.
pub struct AppState {
    provisioner: Arc<AccountProvisioner>,
    authenticator: Arc<Authenticator>,
    login: LoginFlow,
    profiles: ProfileReconciler,
    config: ApiConfig,
}

impl AppState {
    #[must_use]
    pub fn new(
        provisioner: Arc<AccountProvisioner>,
        authenticator: Arc<Authenticator>,
        login: LoginFlow,
        profiles: ProfileReconciler,
        config: ApiConfig,
    ) -> Self {
        Self {
            provisioner,
            authenticator,
            login,
            profiles,
            config,
        }
    }

    /// Wire the Postgres stores and the gateway client into the core services.
    ///
    /// # Errors
    /// Returns an error if the gateway client cannot be built.
    pub fn from_settings(pool: &PgPool, settings: Settings) -> Result<Self> {
        let gateway: Arc<dyn Gateway> = Arc::new(GatewayClient::new(settings.gateway)?);
        let store: Arc<dyn AccountStore> = Arc::new(PgAccountStore::new(pool.clone()));
        let ledger: Arc<dyn AttemptLedger> = Arc::new(PgAttemptLedger::new(pool.clone()));

        let profiles = ProfileReconciler::new(gateway.clone());
        let provisioner = Arc::new(AccountProvisioner::new(
            store.clone(),
            gateway.clone(),
            profiles.clone(),
            Arc::new(NoBreachCheck),
            Arc::new(LogEmailSender),
            settings.accounts,
        ));
        let authenticator = Arc::new(Authenticator::new(gateway, store, settings.tokens));
        let login = LoginFlow::new(
            LoginThrottle::new(ledger, settings.throttle),
            authenticator.clone(),
        );

        Ok(Self::new(
            provisioner,
            authenticator,
            login,
            profiles,
            settings.api,
        ))
    }

    #[must_use]
    pub fn provisioner(&self) -> &AccountProvisioner {
        &self.provisioner
    }

    #[must_use]
    pub fn authenticator(&self) -> &Authenticator {
        &self.authenticator
    }

    #[must_use]
    pub fn login(&self) -> &LoginFlow {
        &self.login
    }

    #[must_use]
    pub fn profiles(&self) -> &ProfileReconciler {
        &self.profiles
    }

    #[must_use]
    pub fn config(&self) -> &ApiConfig {
        &self.config
    }
}

/// Documented routes plus Swagger UI and the shared middleware stack.
///
/// # Errors
/// Returns an error if the frontend URL is not a valid origin.
pub fn app(state: Arc<AppState>, pool: PgPool) -> Result<Router> {
    let cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_origin(AllowOrigin::exact(frontend_origin(
            state.config().frontend_url(),
        )?))
        .allow_credentials(true);

    let (router, openapi) = router().split_for_parts();

    Ok(router
        .route("/health", options(health::health))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(Extension(state))
                .layer(Extension(pool)),
        ))
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(port: u16, dsn: String, settings: Settings) -> Result<()> {
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&dsn)
        .await
        .context("Failed to connect to database")?;

    let state = Arc::new(AppState::from_settings(&pool, settings)?);
    let app = app(state, pool)?;

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {err}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => tracing::error!("Failed to listen for SIGTERM: {err}"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Gracefully shutdown");
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

fn frontend_origin(frontend_url: &str) -> Result<HeaderValue> {
    let parsed =
        Url::parse(frontend_url).with_context(|| format!("Invalid frontend URL: {frontend_url}"))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow!("Frontend URL must include a valid host: {frontend_url}"))?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build frontend origin header")
}
