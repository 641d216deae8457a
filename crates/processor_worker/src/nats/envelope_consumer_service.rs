use crate::domain::{HandleOutcome, IdempotentProcessor};
use common::domain::{DomainError, Envelope};
use common::nats::{ConsumeRequest, ConsumeResponse};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::Service;
use tracing::{debug, warn};

/// Tower service that decodes one channel message and runs it through the
/// idempotent processor.
///
/// Outcome mapping:
/// - committed, duplicate, race resolved: ack
/// - conflict, dead-lettered: term (never redelivered)
/// - any error: nak (redelivered by the channel)
#[derive(Clone)]
pub struct EnvelopeConsumerService {
    processor: Arc<IdempotentProcessor>,
}

impl EnvelopeConsumerService {
    pub fn new(processor: Arc<IdempotentProcessor>) -> Self {
        Self { processor }
    }
}

pub fn consume_response_for(result: Result<HandleOutcome, DomainError>) -> ConsumeResponse {
    match result {
        Ok(outcome) if outcome.is_rejection() => ConsumeResponse::term(outcome.as_str()),
        Ok(_) => ConsumeResponse::ack(),
        Err(e) => ConsumeResponse::nak(e.to_string()),
    }
}

impl Service<ConsumeRequest> for EnvelopeConsumerService {
    type Response = ConsumeResponse;
    type Error = anyhow::Error;
    type Future = BoxFuture<'static, Result<ConsumeResponse, anyhow::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: ConsumeRequest) -> Self::Future {
        let processor = Arc::clone(&self.processor);

        Box::pin(async move {
            let result = match Envelope::from_json_slice(&req.payload) {
                Ok(envelope) => processor.handle(&envelope).await,
                Err(e) => {
                    processor
                        .divert_undecodable(&req.subject, &req.payload, &e.to_string())
                        .await
                }
            };

            match &result {
                Ok(outcome) => debug!(
                    subject = %req.subject,
                    delivery_attempt = req.delivery_attempt,
                    outcome = outcome.as_str(),
                    "envelope handled"
                ),
                Err(e) => warn!(
                    subject = %req.subject,
                    delivery_attempt = req.delivery_attempt,
                    error = %e,
                    "envelope not handled, requesting redelivery"
                ),
            }

            Ok(consume_response_for(result))
        })
    }
}
