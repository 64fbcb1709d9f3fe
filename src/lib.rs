//! Shoreline issues and verifies session tokens for users and services.

#![forbid(unsafe_code)]

pub mod auth;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod error;
pub mod gate;
pub mod lockout;
mod router;
pub mod telemetry;
pub mod token;
pub mod user;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{HeaderName, Method, StatusCode, header};
use axum::routing::{get, post};
use axum::{Router, middleware as AxumMiddleware};
use metrics_exporter_prometheus::PrometheusHandle;
use tower::ServiceBuilder;
use tower_http::LatencyUnit;
use tower_http::cors::{Any, CorsLayer};
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{
    DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer,
};

pub use error::ServerError;
pub use router::{SERVER_NAME_HEADER, SERVER_SECRET_HEADER, SESSION_TOKEN_HEADER};

/// MUST NEVER be used in production.
#[cfg(test)]
pub async fn make_request(
    app: Router,
    method: Method,
    path: &str,
    headers: &[(&str, &str)],
    body: String,
) -> axum::http::Response<axum::body::Body> {
    use axum::extract::Request;
    use tower::util::ServiceExt;

    let mut request = Request::builder()
        .method(method)
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json");
    for (name, value) in headers {
        request = request.header(*name, *value);
    }

    app.oneshot(request.body(axum::body::Body::from(body)).unwrap())
        .await
        .unwrap()
}

/// State built on an empty in-memory store, with a fixed clock.
#[cfg(test)]
pub fn test_state() -> (AppState, Arc<user::MemoryStore>) {
    let config = config::Configuration::default()
        .apply_env(|key| match key {
            "API_SECRET" => Some("This is a local API secret for everyone.".into()),
            "SALT" => Some("some fake salt for the tests".into()),
            "SERVER_SECRET" => Some("This needs to be the same secret everywhere.".into()),
            "VERIFICATION_SECRET" => Some("+skip".into()),
            _ => None,
        })
        .unwrap();

    let store = Arc::new(user::MemoryStore::new());
    let clock = Arc::new(clock::FixedClock::new(1_700_000_000));
    let auth = auth::Authenticator::new(&config.user, store.clone()).with_clock(clock);

    let state = AppState {
        config: Arc::new(config),
        auth: Arc::new(auth),
        metrics: None,
    };
    (state, store)
}

/// State sharing between routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::Configuration>,
    pub auth: Arc<auth::Authenticator>,
    /// Absent when no recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// Create router.
pub fn app(state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        // Add high level tracing/logging to all requests.
        .layer(
            TraceLayer::new_for_http()
                .on_body_chunk(|chunk: &Bytes, latency: Duration, _span: &tracing::Span| {
                    tracing::trace!(size_bytes = chunk.len(), latency = ?latency, "sending body chunk")
                })
                .make_span_with(DefaultMakeSpan::new().include_headers(true).level(tracing::Level::INFO))
                .on_request(DefaultOnRequest::new())
                .on_response(DefaultOnResponse::new().include_headers(true).latency_unit(LatencyUnit::Micros)),
        )
        // Set a timeout.
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, Duration::from_secs(10)))
        // Remove sensitive headers from trace.
        .layer(SetSensitiveHeadersLayer::new([
            header::AUTHORIZATION,
            header::COOKIE,
            HeaderName::from_static(SESSION_TOKEN_HEADER),
            HeaderName::from_static(SERVER_SECRET_HEADER),
        ]))
        // Add CORS preflight support.
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
                .allow_headers(Any)
                .expose_headers([HeaderName::from_static(SESSION_TOKEN_HEADER)]),
        );

    Router::new()
        // `GET /status` goes to `status`.
        .route("/status", get(router::status::status))
        .route("/metrics", get(router::status::metrics))
        // `POST /login` goes to `login`.
        .route("/login", post(router::login::login))
        .route("/serverlogin", post(router::login::server_login))
        // `GET /token/:token` is reserved to servers.
        .route("/token/{token}", get(router::login::check_token))
        .route("/user", post(router::users::create))
        .route(
            "/user/{user_id}",
            get(router::users::get)
                .put(router::users::update)
                .delete(router::users::delete),
        )
        .route("/user/{user_id}/user", post(router::users::create_custodial))
        .route("/users", get(router::users::find))
        .with_state(state)
        .route_layer(AxumMiddleware::from_fn(telemetry::track))
        .layer(middleware)
}

/// Initialize the application state.
pub fn initialize_state(
    config: config::Configuration,
    metrics: Option<PrometheusHandle>,
) -> Result<AppState, config::ConfigError> {
    config.validate()?;

    if config.user.server_secrets.is_empty() {
        tracing::warn!("no server secret configured, server logins are disabled");
    }

    // TODO: swap for a persistent store once one implements `UserStore`.
    let store = Arc::new(user::MemoryStore::new());
    let auth = auth::Authenticator::new(&config.user, store);

    Ok(AppState {
        config: Arc::new(config),
        auth: Arc::new(auth),
        metrics,
    })
}
