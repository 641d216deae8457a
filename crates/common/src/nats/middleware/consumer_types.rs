use async_nats::HeaderMap;
use bytes::Bytes;

/// One delivery of a NATS message, owned so it can travel through Tower layers.
#[derive(Debug, Clone)]
pub struct ConsumeRequest {
    pub subject: String,
    pub payload: Bytes,
    /// Used for trace context propagation
    pub headers: Option<HeaderMap>,
    /// 1 on first delivery, incremented by the server on each redelivery
    pub delivery_attempt: u64,
}

impl ConsumeRequest {
    pub fn new(subject: String, payload: Bytes, headers: Option<HeaderMap>) -> Self {
        Self {
            subject,
            payload,
            headers,
            delivery_attempt: 1,
        }
    }

    pub fn with_delivery_attempt(mut self, delivery_attempt: u64) -> Self {
        self.delivery_attempt = delivery_attempt;
        self
    }
}

/// What the consumer should tell the channel about a delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeResponse {
    /// Processed (or confirmed already processed): acknowledge
    Ack,
    /// Transient failure: negative-ack so the channel redelivers
    Nak(Option<String>),
    /// Permanent failure already routed elsewhere: stop redelivery
    Term(String),
}

impl ConsumeResponse {
    pub fn ack() -> Self {
        Self::Ack
    }

    pub fn nak(reason: impl Into<String>) -> Self {
        Self::Nak(Some(reason.into()))
    }

    pub fn term(reason: impl Into<String>) -> Self {
        Self::Term(reason.into())
    }

    pub fn is_ack(&self) -> bool {
        matches!(self, Self::Ack)
    }

    pub fn is_nak(&self) -> bool {
        matches!(self, Self::Nak(_))
    }

    pub fn is_term(&self) -> bool {
        matches!(self, Self::Term(_))
    }

    pub fn outcome(&self) -> &'static str {
        match self {
            Self::Ack => "ack",
            Self::Nak(_) => "nak",
            Self::Term(_) => "term",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consume_request_defaults_to_first_attempt() {
        let req = ConsumeRequest::new("envelopes.acme".to_string(), Bytes::from("payload"), None);

        assert_eq!(req.subject, "envelopes.acme");
        assert_eq!(req.delivery_attempt, 1);
        assert_eq!(req.with_delivery_attempt(3).delivery_attempt, 3);
    }

    #[test]
    fn test_consume_response_nak() {
        let resp = ConsumeResponse::nak("store unavailable");
        assert!(resp.is_nak());
        assert_eq!(resp.outcome(), "nak");
        assert_eq!(resp, ConsumeResponse::Nak(Some("store unavailable".to_string())));
    }

    #[test]
    fn test_consume_response_term() {
        let resp = ConsumeResponse::term("conflicting log id");
        assert!(resp.is_term());
        assert!(!resp.is_ack());
        assert_eq!(resp.outcome(), "term");
    }
}
