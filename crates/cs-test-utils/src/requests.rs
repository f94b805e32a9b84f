//! Router request helpers.
//!
//! Drives the axum router in-process with `tower::ServiceExt::oneshot`.

use crate::context::TestContext;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use common::types::ParticipantId;
use conference_service::middleware::PARTICIPANT_HEADER;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

/// Status and decoded body: `Null` when empty, a JSON string when the body
/// is not JSON (axum extractor rejections are plain text).
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestContext {
    /// Send one request through a fresh router.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        participant: Option<ParticipantId>,
        body: Option<Value>,
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(participant) = participant {
            builder = builder.header(PARTICIPANT_HEADER, participant.to_string());
        }

        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("valid request");

        let response = self
            .router()
            .oneshot(request)
            .await
            .expect("router is infallible");

        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("read response body")
            .to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };

        TestResponse { status, body }
    }
}
