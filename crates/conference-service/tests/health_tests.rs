//! Health endpoint integration tests.
//!
//! Drives `/health` and `/ready` through the real router.

use axum::http::{Method, StatusCode};
use cs_test_utils::TestContext;

#[tokio::test]
async fn test_health_endpoint_returns_200() {
    let ctx = TestContext::new();

    let response = ctx.request(Method::GET, "/health", None, None).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["status"], "healthy");
}

#[tokio::test]
async fn test_ready_endpoint_pings_store() {
    let ctx = TestContext::new();

    let response = ctx.request(Method::GET, "/ready", None, None).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["status"], "ready");
    assert_eq!(response.body["store"], "healthy");
}

#[tokio::test]
async fn test_unknown_route_returns_404() {
    let ctx = TestContext::new();

    let response = ctx
        .request(Method::GET, "/api/v1/nonexistent", None, None)
        .await;

    assert_eq!(response.status, StatusCode::NOT_FOUND);
}
