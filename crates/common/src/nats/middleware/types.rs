use anyhow::{anyhow, Result};
use async_nats::{HeaderMap, HeaderValue};
use bytes::Bytes;

/// Header carrying the tenant so consumers can filter without decoding
pub const TENANT_HEADER: &str = "X-Tenant-ID";

/// Request to publish a message to NATS
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub subject: String,
    pub payload: Bytes,
    /// Trace context is injected here by the tracing layer
    pub headers: HeaderMap,
}

impl PublishRequest {
    pub fn new(subject: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            subject: subject.into(),
            payload: payload.into(),
            headers: HeaderMap::new(),
        }
    }

    /// Values containing CR or LF are refused; headers are line-delimited on
    /// the wire.
    pub fn with_header(mut self, name: &'static str, value: &str) -> Result<Self> {
        let value: HeaderValue = value
            .parse()
            .map_err(|_| anyhow!("invalid value for header {}", name))?;
        self.headers.insert(name, value);
        Ok(self)
    }
}

#[derive(Debug)]
pub struct PublishResponse {
    pub subject: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_request_with_header() {
        let req = PublishRequest::new("envelopes.acme", b"{}".to_vec())
            .with_header("X-Tenant-ID", "acme")
            .unwrap();

        assert_eq!(req.subject, "envelopes.acme");
        assert_eq!(req.headers.get("X-Tenant-ID").unwrap().as_str(), "acme");
    }

    #[test]
    fn test_header_value_with_line_break_is_refused() {
        let result = PublishRequest::new("envelopes.acme", b"{}".to_vec())
            .with_header("X-Tenant-ID", "acme\r\nNats-Msg-Id: fixed");

        let err = result.err().unwrap();
        assert!(err.to_string().contains("X-Tenant-ID"));
    }
}
