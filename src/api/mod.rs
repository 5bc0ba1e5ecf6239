use crate::{
    alerts::LogAlertSink,
    api::handlers::{auth, health},
    cache::RedisIdempotencyCache,
    credentials::{CredentialService, PgUserStore},
    session::SessionKeeper,
    tokens::{
        PgTokenStore, SweepConfig, TokenFamilyManager, TokenPolicy, TokenStore, spawn_sweep_worker,
    },
};
use anyhow::{Context, Result, anyhow};
use axum::{
    Extension,
    body::Body,
    extract::MatchedPath,
    http::{
        HeaderName, HeaderValue, Method, Request,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    routing::options,
};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{Span, info, info_span};
use ulid::Ulid;
use url::Url;
use utoipa_axum::router::OpenApiRouter;

pub(crate) mod handlers;
// OpenAPI router wiring and route registration live in openapi.rs.
mod openapi;

pub use openapi::openapi;

/// Build the API router with all documented routes registered.
#[must_use]
pub fn router() -> OpenApiRouter {
    openapi::api_router()
}

/// Start the server.
/// # Errors
/// Returns an error if the database is unreachable or the listener cannot bind.
pub async fn new(
    port: u16,
    dsn: String,
    keeper: SessionKeeper,
    cache: Arc<RedisIdempotencyCache>,
    auth_config: auth::AuthConfig,
    token_policy: TokenPolicy,
    sweep: SweepConfig,
) -> Result<()> {
    // Connect to database
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&dsn)
        .await
        .context("Failed to connect to database")?;

    let alerts = Arc::new(LogAlertSink);

    let credentials = Arc::new(
        CredentialService::new(Arc::new(PgUserStore::new(pool.clone())), alerts.clone())
            .with_lockout_threshold(auth_config.lockout_threshold()),
    );

    let token_store: Arc<dyn TokenStore> = Arc::new(PgTokenStore::new(pool.clone()));
    let tokens = Arc::new(TokenFamilyManager::new(
        token_store.clone(),
        alerts,
        token_policy,
    ));

    // Superseded and revoked rows outlive their use only past end of life;
    // the sweep worker reaps them in the background.
    spawn_sweep_worker(token_store, sweep);

    let rate_limiter: Arc<dyn auth::RateLimiter> = match auth_config.rate_limit_per_minute() {
        0 => Arc::new(auth::NoopRateLimiter),
        limit => Arc::new(auth::SlidingWindowRateLimiter::new(limit)),
    };

    let frontend_origin = frontend_origin(auth_config.frontend_base_url())?;

    let auth_state = Arc::new(auth::AuthState::new(
        auth_config,
        keeper,
        credentials,
        tokens,
        cache,
        rate_limiter,
    ));

    // Session cookies only make it cross-origin with credentials allowed and
    // an exact origin, never a wildcard.
    let cors = CorsLayer::new()
        .allow_headers([
            CONTENT_TYPE,
            AUTHORIZATION,
            HeaderName::from_static("x-device-fingerprint"),
            HeaderName::from_static("x-idempotency-key"),
        ])
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(AllowOrigin::exact(frontend_origin))
        .allow_credentials(true);

    // Build the router from OpenAPI-wired routes, then extend it with non-doc
    // routes like preflight-only `OPTIONS /health`.
    let (router, _openapi) = router().split_for_parts();
    let app = router
        .route("/health", options(health::health))
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
                .layer(Extension(auth_state))
                .layer(Extension(pool)),
        );

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
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

fn frontend_origin(frontend_base_url: &str) -> Result<HeaderValue> {
    let parsed = Url::parse(frontend_base_url)
        .with_context(|| format!("Invalid frontend base URL: {frontend_base_url}"))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow!("Frontend base URL must include a host: {frontend_base_url}"))?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build frontend origin header")
}
