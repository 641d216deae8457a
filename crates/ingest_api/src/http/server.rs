use crate::domain::IngestionGateway;
use crate::http::{handle_health, handle_ingest};
use anyhow::Context;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::{Extension, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Debug, Clone)]
pub struct HttpServerConfig {
    pub host: String,
    pub port: u16,
    /// Larger bodies are refused with 413 before reaching the gateway
    pub max_body_bytes: usize,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_body_bytes: 1024 * 1024,
        }
    }
}

pub fn build_router(gateway: Arc<IngestionGateway>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/ingest", post(handle_ingest))
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(Extension(gateway))
}

/// Serve until `cancellation_token` fires, then drain in-flight requests
pub async fn run_http_server(
    config: HttpServerConfig,
    gateway: Arc<IngestionGateway>,
    cancellation_token: CancellationToken,
) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("invalid http address {}:{}", config.host, config.port))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    info!("HTTP ingest server listening on {}", addr);

    let app = build_router(gateway, config.max_body_bytes);
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        cancellation_token.cancelled().await;
        info!("HTTP server shutdown signal received");
    });

    match server.await {
        Ok(()) => {
            info!("HTTP server stopped gracefully");
            Ok(())
        }
        Err(e) => {
            error!("HTTP server error: {}", e);
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use common::domain::{DomainError, Envelope, MockEnvelopeProducer};
    use tower::ServiceExt;

    fn router_with(producer: MockEnvelopeProducer) -> Router {
        build_router(Arc::new(IngestionGateway::new(Arc::new(producer))), 64)
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), 4096).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_structured_post_returns_accepted() {
        // Arrange
        let mut producer = MockEnvelopeProducer::new();
        producer
            .expect_publish_envelope()
            .withf(|e: &Envelope| e.tenant_id() == "acme" && e.log_id() == "t-1")
            .times(1)
            .return_once(|_| Ok(()));

        let request = Request::post("/ingest")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"tenant_id":"acme","log_id":"t-1","text":"hello"}"#))
            .unwrap();

        // Act
        let response = router_with(producer).oneshot(request).await.unwrap();

        // Assert
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = json_body(response).await;
        assert_eq!(body["status"], "accepted");
        assert_eq!(body["message"], "Log queued for processing");
        assert_eq!(body["tenant_id"], "acme");
        assert_eq!(body["log_id"], "t-1");
    }

    #[tokio::test]
    async fn test_unstructured_post_uses_tenant_header() {
        let mut producer = MockEnvelopeProducer::new();
        producer
            .expect_publish_envelope()
            .withf(|e: &Envelope| e.tenant_id() == "beta" && e.text() == "hello")
            .times(1)
            .return_once(|_| Ok(()));

        let request = Request::post("/ingest")
            .header("content-type", "text/plain")
            .header("X-Tenant-ID", "beta")
            .body(Body::from("hello"))
            .unwrap();

        let response = router_with(producer).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(json_body(response).await["tenant_id"], "beta");
    }

    #[tokio::test]
    async fn test_missing_tenant_is_bad_request() {
        let mut producer = MockEnvelopeProducer::new();
        producer.expect_publish_envelope().times(0);

        let request = Request::post("/ingest")
            .header("content-type", "text/plain")
            .body(Body::from("hello"))
            .unwrap();

        let response = router_with(producer).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "MissingTenant");
    }

    #[tokio::test]
    async fn test_missing_field_is_bad_request() {
        let mut producer = MockEnvelopeProducer::new();
        producer.expect_publish_envelope().times(0);

        let request = Request::post("/ingest")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"log_id":"t-1","text":"x"}"#))
            .unwrap();

        let response = router_with(producer).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "MissingField");
    }

    #[tokio::test]
    async fn test_publish_failure_is_service_unavailable() {
        let mut producer = MockEnvelopeProducer::new();
        producer
            .expect_publish_envelope()
            .times(1)
            .return_once(|_| Err(DomainError::RepositoryError(anyhow::anyhow!("down"))));

        let request = Request::post("/ingest")
            .header("X-Tenant-ID", "beta")
            .body(Body::from("hello"))
            .unwrap();

        let response = router_with(producer).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json_body(response).await["error"], "TransportUnavailable");
    }

    #[tokio::test]
    async fn test_oversized_body_is_refused() {
        let mut producer = MockEnvelopeProducer::new();
        producer.expect_publish_envelope().times(0);

        let request = Request::post("/ingest")
            .header("X-Tenant-ID", "beta")
            .body(Body::from("x".repeat(65)))
            .unwrap();

        let response = router_with(producer).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_health() {
        let response = router_with(MockEnvelopeProducer::new())
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }
}
