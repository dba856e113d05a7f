//! In-process HTTP tests for the listener surface.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use icebase_cli::router;
use icebase_core::storage::FsStorage;
use icebase_core::Storage;
use icebase_sql::{Engine, EngineConfig};
use tempfile::TempDir;
use tower::ServiceExt;

fn test_engine(dir: &TempDir) -> Arc<Engine> {
    let root = dir.path().to_string_lossy().into_owned();
    let storage: Arc<dyn Storage> = Arc::new(FsStorage::new(dir.path()));
    Arc::new(Engine::with_storage(EngineConfig::default().with_storage_dir(root), storage).unwrap())
}

fn post(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn query_returns_json_payload() {
    let dir = TempDir::new().unwrap();
    let app = router(test_engine(&dir), None);

    let response = app.oneshot(post("/query", "SELECT 1 AS one")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/json"
    );
    let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(json["data"][0][0], "1");
    assert_eq!(json["rows"], 1);
    assert_eq!(json["meta"][0]["name"], "one");
}

#[tokio::test]
async fn parse_classifies_statement() {
    let dir = TempDir::new().unwrap();
    let app = router(test_engine(&dir), None);

    let response = app
        .oneshot(post("/parse", "SELECT * FROM foo"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(json["operation"], "SELECT");
    assert_eq!(json["table"], "foo");
}

#[tokio::test]
async fn bearer_auth_is_enforced_when_configured() {
    let dir = TempDir::new().unwrap();
    let app = router(test_engine(&dir), Some("secret".to_string()));

    let response = app
        .clone()
        .oneshot(post("/query", "SELECT 1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let mut request = post("/query", "SELECT 1");
    request.headers_mut().insert(
        header::AUTHORIZATION,
        "Bearer wrong".parse().unwrap(),
    );
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let mut request = post("/query", "SELECT 1");
    request.headers_mut().insert(
        header::AUTHORIZATION,
        "Bearer secret".parse().unwrap(),
    );
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn unknown_endpoint_errors_and_server_stays_healthy() {
    let dir = TempDir::new().unwrap();
    let app = router(test_engine(&dir), None);

    let response = app
        .clone()
        .oneshot(post("/nope", "SELECT 1"))
        .await
        .unwrap();
    assert!(response.status().is_client_error());

    let response = app.oneshot(post("/query", "SELECT 1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn non_post_methods_are_rejected() {
    let dir = TempDir::new().unwrap();
    let app = router(test_engine(&dir), None);

    let request = Request::builder()
        .method("GET")
        .uri("/query")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn options_preflight_succeeds_with_cors_headers() {
    let dir = TempDir::new().unwrap();
    let app = router(test_engine(&dir), None);

    let request = Request::builder()
        .method("OPTIONS")
        .uri("/query")
        .header(header::ORIGIN, "http://example.com")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .unwrap(),
        "*"
    );
}

#[tokio::test]
async fn malformed_sql_is_a_plain_text_400() {
    let dir = TempDir::new().unwrap();
    let app = router(test_engine(&dir), None);

    let response = app.oneshot(post("/query", "SELEC 1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_string(response).await;
    assert!(!body.starts_with('{'), "errors are plain text, not JSON");
}
