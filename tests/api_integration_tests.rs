//! Integration Tests for API Endpoints
//!
//! Tests full request/response cycle for each endpoint.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::thread::sleep;
use std::time::Duration;
use tag_cache::{api::create_router, AppState, Cache};
use tower::ServiceExt;

// == Helper Functions ==

fn create_test_app() -> Router {
    create_router(AppState::new(Cache::memory()))
}

async fn body_to_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Sends one request through a clone of `app`.
async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    (status, body_to_json(response.into_body()).await)
}

// == SET Endpoint Tests ==

#[tokio::test]
async fn test_set_endpoint_success() {
    let app = create_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/set")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"key":"test_key","value":"test_value"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let json = body_to_json(response.into_body()).await;
    assert!(json.get("message").is_some());
    assert!(json["message"].as_str().unwrap().contains("test_key"));
}

#[tokio::test]
async fn test_set_endpoint_with_ttl() {
    let app = create_test_app();

    let (status, _) = send(
        &app,
        "PUT",
        "/set",
        Some(json!({"key": "ttl_key", "value": "ttl_value", "ttl": 60})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

// == GET Endpoint Tests ==

#[tokio::test]
async fn test_get_endpoint_success() {
    let app = create_test_app();

    let (status, _) = send(
        &app,
        "PUT",
        "/set",
        Some(json!({"key": "order:1", "value": {"id": 1, "items": ["tea", "cake"]}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, json) = send(&app, "GET", "/get/order:1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["key"], "order:1");
    assert_eq!(json["value"], json!({"id": 1, "items": ["tea", "cake"]}));
}

#[tokio::test]
async fn test_get_endpoint_not_found() {
    let app = create_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/get/nonexistent_key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_to_json(response.into_body()).await;
    assert!(json["error"].as_str().unwrap().contains("nonexistent_key"));
}

#[tokio::test]
async fn test_get_or_create_endpoint() {
    let app = create_test_app();

    let (status, json) = send(
        &app,
        "POST",
        "/get-or-create",
        Some(json!({"key": "greeting", "fallback": "hello"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["value"], "hello");

    let (_, json) = send(
        &app,
        "POST",
        "/get-or-create",
        Some(json!({"key": "greeting", "fallback": "bonjour"})),
    )
    .await;
    assert_eq!(json["value"], "hello");
}

// == DELETE Endpoint Tests ==

#[tokio::test]
async fn test_delete_endpoint_success() {
    let app = create_test_app();

    send(
        &app,
        "PUT",
        "/set",
        Some(json!({"key": "delete_key", "value": "delete_value"})),
    )
    .await;

    let (status, _) = send(&app, "DELETE", "/del/delete_key", None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&app, "GET", "/get/delete_key", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_missing_key_is_not_an_error() {
    let app = create_test_app();

    let (status, _) = send(&app, "DELETE", "/del/nonexistent_key", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_prefix_delete_endpoint() {
    let app = create_test_app();

    for key in ["user:1:a", "user:1:b", "user:2:a"] {
        send(&app, "PUT", "/set", Some(json!({"key": key, "value": key}))).await;
    }

    let (status, json) = send(&app, "DELETE", "/prefix/user:1:", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["removed"], 2);

    let (status, _) = send(&app, "GET", "/get/user:2:a", None).await;
    assert_eq!(status, StatusCode::OK);
}

// == Tag Endpoint Tests ==

#[tokio::test]
async fn test_remember_then_clear() {
    let app = create_test_app();

    for id in [1, 2] {
        let (status, _) = send(
            &app,
            "POST",
            "/remember",
            Some(json!({"key": format!("orders:{}", id), "data": {"id": id}, "tags": ["orders"]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, json) = send(&app, "GET", "/get/orders:2", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["value"], json!({"id": 2}));

    let (status, json) = send(&app, "POST", "/clear", Some(json!({"tags": ["orders"]}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["removed"], 3);

    for key in ["orders:1", "orders:2", "orders"] {
        let (status, _) = send(&app, "GET", &format!("/get/{}", key), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}

#[tokio::test]
async fn test_remember_rejects_blank_tag() {
    let app = create_test_app();

    let (status, json) = send(
        &app,
        "POST",
        "/remember",
        Some(json!({"key": "k", "data": 1, "tags": [""]})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json.get("error").is_some());
}

#[tokio::test]
async fn test_user_tags_lifecycle() {
    let app = create_test_app();

    let (status, json) = send(
        &app,
        "POST",
        "/users/42/tags",
        Some(json!({"tags": ["orders:42", "invoices:42"]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["keys"], json!(["orders:42", "invoices:42"]));

    let (status, json) = send(
        &app,
        "DELETE",
        "/users/42/tags",
        Some(json!({"tags": ["orders:42"]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["removed"], 1);

    let (_, json) = send(&app, "GET", "/users/42/tags", None).await;
    assert_eq!(json["keys"], json!(["invoices:42"]));
}

// == Entity Endpoint Tests ==

#[tokio::test]
async fn test_entity_sweeps() {
    let app = create_test_app();

    send(
        &app,
        "POST",
        "/users/7/tags",
        Some(json!({"tags": ["orders:7", "profile:7"]})),
    )
    .await;
    send(&app, "PUT", "/set", Some(json!({"key": "orders:7", "value": [1, 2]}))).await;
    send(&app, "PUT", "/set", Some(json!({"key": "report:orders", "value": "pdf"}))).await;

    let (status, json) = send(&app, "GET", "/entities/orders/keys", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["keys"], json!(["orders:7"]));

    let (status, _) = send(&app, "DELETE", "/entities/orders/keys", None).await;
    assert_eq!(status, StatusCode::OK);

    for key in ["orders:7", "report:orders"] {
        let (status, _) = send(&app, "GET", &format!("/get/{}", key), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
    let (_, json) = send(&app, "GET", "/users/7/tags", None).await;
    assert_eq!(json["keys"], json!(["profile:7"]));
}

#[tokio::test]
async fn test_entity_full_name_sweep_on_raw_backend() {
    let app = create_router(AppState::new(Cache::raw()));

    send(&app, "POST", "/users/7/tags", Some(json!({"tags": ["orders:7"]}))).await;
    send(&app, "PUT", "/set", Some(json!({"key": "orders:7", "value": 1}))).await;

    let (status, json) = send(&app, "DELETE", "/entities/orders", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["removed"], 1);

    let (status, json) = send(&app, "DELETE", "/entities/orders/keys", None).await;
    assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
    assert!(json["error"].as_str().unwrap().contains("raw"));
}

// == Stats and Health Tests ==

#[tokio::test]
async fn test_stats_endpoint() {
    let app = create_test_app();

    send(&app, "PUT", "/set", Some(json!({"key": "s", "value": 1}))).await;
    send(&app, "GET", "/get/s", None).await;
    send(&app, "GET", "/get/missing", None).await;

    let (status, json) = send(&app, "GET", "/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["backend"], "memory");
    assert_eq!(json["hits"], 1);
    assert_eq!(json["misses"], 1);
    assert_eq!(json["tracked_keys"], 1);
    assert!((json["hit_rate"].as_f64().unwrap() - 0.5).abs() < 0.001);
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = create_test_app();

    let (status, json) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
    assert!(json.get("timestamp").is_some());
}

// == Error Response Tests ==

#[tokio::test]
async fn test_invalid_json_request() {
    let app = create_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/set")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"invalid json"#))
                .unwrap(),
        )
        .await
        .unwrap();

    // Axum returns 422 for JSON parsing errors by default
    assert!(
        response.status() == StatusCode::BAD_REQUEST
            || response.status() == StatusCode::UNPROCESSABLE_ENTITY
    );
}

#[tokio::test]
async fn test_empty_key_request() {
    let app = create_test_app();

    let (status, json) = send(&app, "PUT", "/set", Some(json!({"key": "", "value": "test"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json.get("error").is_some());
}

// == TTL Expiration via API Tests ==

#[tokio::test]
async fn test_ttl_expiration_via_api() {
    for cache in [Cache::memory(), Cache::raw()] {
        let app = create_router(AppState::new(cache));

        let (status, _) = send(
            &app,
            "PUT",
            "/set",
            Some(json!({"key": "ttl_test", "value": "expires_soon", "ttl": 1})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(&app, "GET", "/get/ttl_test", None).await;
        assert_eq!(status, StatusCode::OK);

        sleep(Duration::from_millis(1100));

        let (status, _) = send(&app, "GET", "/get/ttl_test", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
