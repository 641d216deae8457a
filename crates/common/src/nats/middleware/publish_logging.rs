use std::fmt::Display;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use super::types::{PublishRequest, PublishResponse, TENANT_HEADER};
use futures::future::{BoxFuture, FutureExt};
use tower::{Layer, Service};
use tracing::{error, info, Instrument};

/// One line per publish: where it went, whose it was, how long the ack took.
#[derive(Clone, Copy, Debug, Default)]
pub struct NatsPublishLoggingLayer;

impl NatsPublishLoggingLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for NatsPublishLoggingLayer {
    type Service = NatsPublishLoggingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        NatsPublishLoggingService { inner }
    }
}

#[derive(Clone)]
pub struct NatsPublishLoggingService<S> {
    inner: S,
}

/// What gets logged about a publish, captured before the request is moved
#[derive(Debug, PartialEq)]
struct PublishAudit {
    subject: String,
    tenant_id: Option<String>,
    payload_bytes: usize,
}

impl PublishAudit {
    fn of(req: &PublishRequest) -> Self {
        Self {
            subject: req.subject.clone(),
            tenant_id: req
                .headers
                .get(TENANT_HEADER)
                .map(|value| value.as_str().to_string()),
            payload_bytes: req.payload.len(),
        }
    }

    fn finish<E: Display>(&self, elapsed: Duration, failure: Option<&E>) {
        let elapsed_ms = elapsed.as_millis() as u64;
        let tenant_id = self.tenant_id.as_deref().unwrap_or("-");
        match failure {
            None => info!(
                subject = %self.subject,
                tenant_id = %tenant_id,
                payload_bytes = self.payload_bytes,
                elapsed_ms,
                "message stored by jetstream"
            ),
            Some(e) => error!(
                subject = %self.subject,
                tenant_id = %tenant_id,
                payload_bytes = self.payload_bytes,
                elapsed_ms,
                error = %e,
                "jetstream did not confirm message"
            ),
        }
    }
}

impl<S> Service<PublishRequest> for NatsPublishLoggingService<S>
where
    S: Service<PublishRequest, Response = PublishResponse> + Clone + Send + 'static,
    S::Error: Display + Send,
    S::Future: Send + 'static,
{
    type Response = PublishResponse;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<PublishResponse, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: PublishRequest) -> Self::Future {
        let audit = PublishAudit::of(&req);
        // Call the instance poll_ready was driven on; keep a clone for the next one
        let replacement = self.inner.clone();
        let mut ready = std::mem::replace(&mut self.inner, replacement);

        async move {
            let started = Instant::now();
            let result = ready.call(req).await;
            audit.finish(started.elapsed(), result.as_ref().err());
            result
        }
        .in_current_span()
        .boxed()
    }
}
