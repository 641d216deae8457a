use crate::domain::{Accepted, IngestError, IngestionGateway, RawLogRecord};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use bytes::Bytes;
use serde::Serialize;
use std::sync::Arc;

pub const TENANT_ID_HEADER: &str = "x-tenant-id";
pub const LOG_ID_HEADER: &str = "x-log-id";

#[derive(Debug, Serialize)]
pub struct AcceptedResponse {
    pub status: &'static str,
    pub message: &'static str,
    pub tenant_id: String,
    pub log_id: String,
}

impl From<Accepted> for AcceptedResponse {
    fn from(accepted: Accepted) -> Self {
        Self {
            status: "accepted",
            message: "Log queued for processing",
            tenant_id: accepted.tenant_id,
            log_id: accepted.log_id,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: &'static str,
    pub detail: String,
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        let (status, error) = match &self {
            IngestError::Rejected(e) => (StatusCode::BAD_REQUEST, e.code()),
            IngestError::TransportUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "TransportUnavailable")
            }
        };
        let detail = match self {
            IngestError::Rejected(e) => e.to_string(),
            IngestError::TransportUnavailable(detail) => detail,
        };
        (status, Json(ErrorResponse { error, detail })).into_response()
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// Build the raw record from request parts without interpreting the body
pub fn raw_log_record(headers: &HeaderMap, body: Bytes) -> RawLogRecord {
    RawLogRecord {
        body,
        content_type: header_str(headers, header::CONTENT_TYPE.as_str()),
        header_tenant: header_str(headers, TENANT_ID_HEADER),
        header_log_id: header_str(headers, LOG_ID_HEADER),
    }
}

/// `POST /ingest`. Replies 202 as soon as the envelope is queued.
pub async fn handle_ingest(
    Extension(gateway): Extension<Arc<IngestionGateway>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<AcceptedResponse>), IngestError> {
    let accepted = gateway.ingest(raw_log_record(&headers, body)).await?;
    Ok((StatusCode::ACCEPTED, Json(accepted.into())))
}

pub async fn handle_health() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}
