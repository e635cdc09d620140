//! # Server Configuration
//!
//! Router assembly, shared application state and the serve loop for the
//! detecktiv API.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router, middleware,
    http::{HeaderName, HeaderValue, Method, header},
    routing::{get, post},
};
use metrics_exporter_prometheus::PrometheusHandle;
use sea_orm::DatabaseConnection;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;

use crate::companies_house::CompaniesHouseClient;
use crate::config::AppConfig;
use crate::handlers;
use crate::mail::{self, Mailer};
use crate::rate_limit::{self, RateLimiter};
use crate::security::{PasswordHasher, TokenService};
use crate::telemetry;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub config: Arc<AppConfig>,
    pub tokens: TokenService,
    pub hasher: PasswordHasher,
    pub mailer: Arc<dyn Mailer>,
    /// `None` when no Companies House API key is configured
    pub companies_house: Option<CompaniesHouseClient>,
    /// `None` when `RATE_LIMIT_ENABLED` is off
    pub rate_limiter: Option<Arc<RateLimiter>>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Build the state from configuration. Mail goes over SMTP when
    /// `SMTP_HOST` is set. The Prometheus recorder is installed here on
    /// first use.
    pub fn from_config(config: AppConfig, db: DatabaseConnection) -> anyhow::Result<Self> {
        let tokens = TokenService::from_config(&config)?;
        let hasher = PasswordHasher::from_config(&config);
        let companies_house = CompaniesHouseClient::from_config(&config)?;
        if companies_house.is_none() {
            tracing::warn!("CH_API_KEY not set; Companies House endpoints will return 503");
        }
        let mailer = mail::mailer_from_config(&config)?;
        let rate_limiter = RateLimiter::from_config(&config);
        let metrics = telemetry::install_metrics_recorder();

        Ok(Self {
            db,
            config: Arc::new(config),
            tokens,
            hasher,
            mailer,
            companies_house,
            rate_limiter,
            metrics,
        })
    }

    pub fn with_mailer(mut self, mailer: Arc<dyn Mailer>) -> Self {
        self.mailer = mailer;
        self
    }

    pub fn with_rate_limiter(mut self, limiter: Option<Arc<RateLimiter>>) -> Self {
        self.rate_limiter = limiter;
        self
    }

    pub fn with_companies_house(mut self, client: Option<CompaniesHouseClient>) -> Self {
        self.companies_house = client;
        self
    }
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static("x-request-id"),
        ])
        .expose_headers([
            HeaderName::from_static("x-request-id"),
            rate_limit::LIMIT_HEADER.clone(),
            rate_limit::REMAINING_HEADER.clone(),
            rate_limit::RESET_HEADER.clone(),
            header::RETRY_AFTER,
        ])
        .allow_credentials(true)
}

fn api_routes() -> Router<AppState> {
    let auth = Router::new()
        .route("/login", post(handlers::auth::login))
        .route("/refresh", post(handlers::auth::refresh))
        .route("/logout", post(handlers::auth::logout))
        .route("/me", get(handlers::auth::me));

    let users = Router::new()
        .route(
            "/",
            get(handlers::users::list_users).post(handlers::users::create_user),
        )
        .route("/paged", get(handlers::users::list_users_paged))
        .route("/me", get(handlers::users::read_me))
        .route("/by-email", get(handlers::users::get_user_by_email))
        .route(
            "/{id}",
            get(handlers::users::get_user)
                .patch(handlers::users::update_user)
                .delete(handlers::users::deactivate_user),
        );

    let password = Router::new()
        .route("/forgot", post(handlers::password::forgot_password))
        .route("/reset", post(handlers::password::reset_password))
        .route(
            "/admin/create-reset-link",
            post(handlers::password::create_reset_link),
        );

    let admin = Router::new().route("/bootstrap", post(handlers::admin::bootstrap_admin));

    let tenants = Router::new()
        .route(
            "/",
            get(handlers::tenants::list_tenants).post(handlers::tenants::create_tenant),
        )
        .route("/{id}", get(handlers::tenants::get_tenant));

    let companies = Router::new()
        .route(
            "/",
            get(handlers::companies::list_companies).post(handlers::companies::create_company),
        )
        .route("/search", get(handlers::companies::search_companies))
        .route(
            "/postcode/{prefix}",
            get(handlers::companies::companies_by_postcode),
        )
        .route(
            "/{id}",
            get(handlers::companies::get_company)
                .patch(handlers::companies::update_company)
                .delete(handlers::companies::delete_company),
        )
        .route("/{id}/prospect", post(handlers::companies::mark_prospect))
        .route(
            "/{id}/companies-house-sync",
            post(handlers::companies::sync_from_companies_house),
        );

    let companies_house = Router::new()
        .route(
            "/companies/search",
            get(handlers::companies_house::search),
        )
        .route("/company/{number}", get(handlers::companies_house::profile))
        .route(
            "/company/{number}/officers",
            get(handlers::companies_house::officers),
        )
        .route(
            "/company/{number}/filing-history",
            get(handlers::companies_house::filing_history),
        )
        .route(
            "/company/{number}/persons-with-significant-control",
            get(handlers::companies_house::persons_with_significant_control),
        )
        .route(
            "/company/{number}/charges",
            get(handlers::companies_house::charges),
        );

    Router::new()
        .nest("/auth", auth)
        .nest("/users", users)
        .nest("/password", password)
        .nest("/admin", admin)
        .nest("/tenants", tenants)
        .nest("/companies", companies)
        .nest("/companies-house", companies_house)
        .route("/snapshot/{number}", get(handlers::snapshot::company_snapshot))
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let cors = cors_layer(&state.config);
    let limiter = state.rate_limiter.clone();

    let router = Router::new()
        .route("/", get(handlers::root))
        .route(
            "/health",
            get(handlers::health::health).head(handlers::health::health),
        )
        .route("/healthz", get(handlers::health::health))
        .route("/readiness", get(handlers::health::readiness))
        .route("/ready", get(handlers::health::readiness))
        .route("/health/db", get(handlers::health::health_db))
        .route("/info", get(handlers::health::info))
        .route("/metrics", get(handlers::metrics::metrics))
        .nest("/v1", api_routes())
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http());

    let router = match limiter {
        Some(limiter) => router.layer(middleware::from_fn_with_state(
            limiter,
            rate_limit::rate_limit_middleware,
        )),
        None => router,
    };

    router
        .layer(cors)
        .layer(middleware::from_fn(telemetry::request_context_middleware))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(%error, "failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                tracing::error!(%error, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}

/// Starts the server with the given configuration
pub async fn run_server(config: AppConfig, db: DatabaseConnection) -> anyhow::Result<()> {
    let addr = config
        .bind_addr()
        .map_err(|e| anyhow::anyhow!("Invalid server address: {}", e))?;
    let profile = config.profile.clone();

    let state = AppState::from_config(config, db)?;
    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, profile = %profile, "server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("server stopped");
    Ok(())
}

struct BearerSecurity;

impl Modify for BearerSecurity {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::health::health,
        crate::handlers::health::readiness,
        crate::handlers::health::health_db,
        crate::handlers::health::info,
        crate::handlers::metrics::metrics,
        crate::handlers::auth::login,
        crate::handlers::auth::refresh,
        crate::handlers::auth::logout,
        crate::handlers::auth::me,
        crate::handlers::users::list_users,
        crate::handlers::users::list_users_paged,
        crate::handlers::users::create_user,
        crate::handlers::users::read_me,
        crate::handlers::users::get_user_by_email,
        crate::handlers::users::get_user,
        crate::handlers::users::update_user,
        crate::handlers::users::deactivate_user,
        crate::handlers::password::forgot_password,
        crate::handlers::password::reset_password,
        crate::handlers::password::create_reset_link,
        crate::handlers::admin::bootstrap_admin,
        crate::handlers::tenants::create_tenant,
        crate::handlers::tenants::list_tenants,
        crate::handlers::tenants::get_tenant,
        crate::handlers::companies::list_companies,
        crate::handlers::companies::create_company,
        crate::handlers::companies::search_companies,
        crate::handlers::companies::companies_by_postcode,
        crate::handlers::companies::get_company,
        crate::handlers::companies::update_company,
        crate::handlers::companies::delete_company,
        crate::handlers::companies::mark_prospect,
        crate::handlers::companies::sync_from_companies_house,
        crate::handlers::companies_house::search,
        crate::handlers::companies_house::profile,
        crate::handlers::companies_house::officers,
        crate::handlers::companies_house::filing_history,
        crate::handlers::companies_house::persons_with_significant_control,
        crate::handlers::companies_house::charges,
        crate::handlers::snapshot::company_snapshot,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::error::ApiError,
            crate::security::TokenPair,
            crate::repositories::CompanyCreate,
            crate::repositories::CompanyUpdate,
            crate::handlers::types::UserResponse,
            crate::handlers::types::CompanyResponse,
            crate::handlers::types::TenantResponse,
        )
    ),
    modifiers(&BearerSecurity),
    tags(
        (name = "health", description = "Liveness and readiness"),
        (name = "auth", description = "Login and token lifecycle"),
        (name = "users", description = "User management"),
        (name = "password", description = "Password reset"),
        (name = "admin", description = "Administrative bootstrap"),
        (name = "tenants", description = "Tenant management"),
        (name = "companies", description = "Company records"),
        (name = "companies-house", description = "Companies House pass-through"),
    ),
    info(
        title = "detecktiv API",
        description = "UK B2B sales-intelligence backend",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
