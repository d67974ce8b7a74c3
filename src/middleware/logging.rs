//! Request and response logging middleware
//!
//! Captures method, matched route, status, duration and request id for every
//! request the return server handles. Query strings are never logged since
//! they carry the gateway's redirect parameters.

use axum::{
    extract::{MatchedPath, Request},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use tower_http::request_id::{MakeRequestId, RequestId};
use tracing::{info, warn, Instrument};
use uuid::Uuid;

/// Generate unique request IDs using UUIDv4
#[derive(Clone, Default)]
pub struct UuidRequestId;

impl MakeRequestId for UuidRequestId {
    fn make_request_id<B>(&mut self, _request: &http::Request<B>) -> Option<RequestId> {
        let id = Uuid::new_v4().to_string();
        Some(RequestId::new(id.parse().ok()?))
    }
}

/// Logs each request and its outcome
///
/// - Slow requests (> 200ms) at WARN level
/// - Server errors at ERROR, client errors at WARN, the rest at INFO
pub async fn request_logging_middleware(
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let start = Instant::now();

    let method = request.method().clone();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .or_else(|| {
            request
                .extensions()
                .get::<RequestId>()
                .and_then(|id| id.header_value().to_str().ok())
                .map(|s| s.to_string())
        })
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let client_ip = extract_client_ip(&request).unwrap_or_else(|| "unknown".to_string());

    info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        client_ip = %client_ip,
        "Request started"
    );

    let span = tracing::info_span!(
        "http_request",
        request_id = %request_id,
        method = %method,
        path = %path,
    );
    let response = next.run(request).instrument(span).await;

    let duration_ms = start.elapsed().as_millis();
    let status = response.status();

    if duration_ms > 200 {
        warn!(
            request_id = %request_id,
            method = %method,
            path = %path,
            status = %status.as_u16(),
            duration_ms = %duration_ms,
            "Slow request completed"
        );
    } else if status.is_server_error() {
        tracing::error!(
            request_id = %request_id,
            method = %method,
            path = %path,
            status = %status.as_u16(),
            duration_ms = %duration_ms,
            "Request failed with server error"
        );
    } else if status.is_client_error() {
        warn!(
            request_id = %request_id,
            method = %method,
            path = %path,
            status = %status.as_u16(),
            duration_ms = %duration_ms,
            "Request completed with client error"
        );
    } else {
        info!(
            request_id = %request_id,
            method = %method,
            path = %path,
            status = %status.as_u16(),
            duration_ms = %duration_ms,
            "Request completed"
        );
    }

    Ok(response)
}

/// Extract client IP address from proxy headers
///
/// Checks X-Forwarded-For, then X-Real-IP.
pub fn extract_client_ip(request: &Request) -> Option<String> {
    if let Some(forwarded) = request.headers().get("x-forwarded-for") {
        if let Ok(forwarded_str) = forwarded.to_str() {
            if let Some(first_ip) = forwarded_str.split(',').next() {
                return Some(first_ip.trim().to_string());
            }
        }
    }

    if let Some(real_ip) = request.headers().get("x-real-ip") {
        if let Ok(ip_str) = real_ip.to_str() {
            return Some(ip_str.to_string());
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, routing::get, Router};
    use tower::ServiceExt;
    use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};

    #[tokio::test]
    async fn test_request_logging_middleware_passes_response_through() {
        async fn handler() -> &'static str {
            "ok"
        }

        let app: Router = Router::new()
            .route("/health", get(handler))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(axum::middleware::from_fn(request_logging_middleware))
            .layer(SetRequestIdLayer::x_request_id(UuidRequestId));

        let response = app
            .oneshot(
                http::Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let request_id = response
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .unwrap();
        assert!(Uuid::parse_str(request_id).is_ok());
    }

    #[test]
    fn test_extract_client_ip() {
        let request = http::Request::builder()
            .header("x-forwarded-for", "192.168.1.1, 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(extract_client_ip(&request), Some("192.168.1.1".to_string()));

        let request = http::Request::builder()
            .header("x-real-ip", "10.0.0.7")
            .body(Body::empty())
            .unwrap();
        assert_eq!(extract_client_ip(&request), Some("10.0.0.7".to_string()));

        let request = http::Request::builder().body(Body::empty()).unwrap();
        assert_eq!(extract_client_ip(&request), None);
    }
}
