//! HTTP surface and process wiring for the icebase engine.
//!
//! Two endpoints, both `POST` with the raw SQL as the body: `/query`
//! executes statements, `/parse` classifies one. Everything else about the
//! listener (CORS, bearer auth, access logging) lives here, outside the
//! engine.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::post;
use axum::Router;
use icebase_sql::Engine;
use tower_http::cors::{Any, CorsLayer};

/// Shared state for all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// The engine handling `/query` and `/parse` bodies.
    pub engine: Arc<Engine>,
    /// Expected bearer token; `None` disables the auth check.
    pub auth_token: Option<String>,
}

/// Initialises `tracing` from `--log-level`, overridable via `LOG_LEVEL`.
pub fn init_logging(level: &str) {
    let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| level.to_string());
    let filter = tracing_subscriber::EnvFilter::try_new(&level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn query_handler(State(state): State<Arc<AppState>>, body: String) -> Response {
    match state.engine.handle_query(&body).await {
        Ok(response) => Json(response).into_response(),
        Err(err) => (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    }
}

async fn parse_handler(State(state): State<Arc<AppState>>, body: String) -> Response {
    Json(state.engine.handle_parse(&body)).into_response()
}

async fn preflight() -> StatusCode {
    StatusCode::OK
}

/// Bearer-token check. Enforced only when a token is configured.
async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(token) = &state.auth_token {
        let expected = format!("Bearer {token}");
        let provided = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok());
        if provided != Some(expected.as_str()) {
            return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
        }
    }
    next.run(request).await
}

fn header_str<'a>(headers: &'a HeaderMap, name: header::HeaderName) -> &'a str {
    headers.get(name).and_then(|v| v.to_str().ok()).unwrap_or("")
}

/// Emits one access-log line per request in the common log format.
async fn access_log(request: Request, next: Next) -> Response {
    let started = Instant::now();
    let remote = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.to_string())
        .unwrap_or_else(|| "-".to_string());
    let method = request.method().clone();
    let uri = request.uri().clone();
    let version = request.version();
    let referer = header_str(request.headers(), header::REFERER).to_string();
    let user_agent = header_str(request.headers(), header::USER_AGENT).to_string();

    let response = next.run(request).await;

    let bytes = response
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("0")
        .to_string();
    tracing::info!(
        target: "icebase::access",
        "{remote} - - [{}] \"{method} {uri} {version:?}\" {} {bytes} \"{referer}\" \"{user_agent}\" {:?}",
        chrono::Utc::now().format("%d/%b/%Y:%H:%M:%S %z"),
        response.status().as_u16(),
        started.elapsed(),
    );
    response
}

/// Builds the application router with CORS, auth and access logging.
pub fn router(engine: Arc<Engine>, auth_token: Option<String>) -> Router {
    let state = Arc::new(AppState { engine, auth_token });
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::POST, Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/query", post(query_handler).options(preflight))
        .route("/parse", post(parse_handler).options(preflight))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth_middleware,
        ))
        .layer(middleware::from_fn(access_log))
        .layer(cors)
        .with_state(state)
}

/// Binds the listener and serves until shutdown.
pub async fn serve(
    engine: Arc<Engine>,
    port: u16,
    auth_token: Option<String>,
) -> anyhow::Result<()> {
    let app = router(engine, auth_token);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "starting server");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
