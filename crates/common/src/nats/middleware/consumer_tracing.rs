use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use super::consumer_types::{ConsumeRequest, ConsumeResponse};
use crate::nats::trace_context::extract_trace_context;
use tower::{Layer, Service};
use tracing::{field, info_span, Instrument, Span};
use tracing_opentelemetry::OpenTelemetrySpanExt;

#[derive(Clone, Debug, Default)]
pub struct NatsConsumeTracingConfig {
    /// Recorded as `messaging.consumer.name` on consume spans
    pub consumer_name: String,
}

impl NatsConsumeTracingConfig {
    pub fn new(consumer_name: impl Into<String>) -> Self {
        Self {
            consumer_name: consumer_name.into(),
        }
    }
}

/// Tower layer that opens one consumer span per message, parented on the
/// publisher's trace when the message carries one
#[derive(Clone)]
pub struct NatsConsumeTracingLayer {
    config: NatsConsumeTracingConfig,
}

impl NatsConsumeTracingLayer {
    pub fn new(config: NatsConsumeTracingConfig) -> Self {
        Self { config }
    }
}

impl<S> Layer<S> for NatsConsumeTracingLayer {
    type Service = NatsConsumeTracingService<S>;

    fn layer(&self, service: S) -> Self::Service {
        NatsConsumeTracingService {
            inner: service,
            config: self.config.clone(),
        }
    }
}

#[derive(Clone)]
pub struct NatsConsumeTracingService<S> {
    inner: S,
    config: NatsConsumeTracingConfig,
}

impl<S> Service<ConsumeRequest> for NatsConsumeTracingService<S>
where
    S: Service<ConsumeRequest, Response = ConsumeResponse> + Clone + Send + 'static,
    S::Error: std::fmt::Display + Send,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: ConsumeRequest) -> Self::Future {
        let span = info_span!(
            target: "nats",
            "nats_consume",
            otel.name = "nats_consume",
            otel.kind = "consumer",
            messaging.system = "nats",
            messaging.operation = "process",
            messaging.destination.name = %req.subject,
            messaging.consumer.name = %self.config.consumer_name,
            messaging.message.body.size = req.payload.len(),
            messaging.delivery_attempt = req.delivery_attempt,
            messaging.outcome = field::Empty,
        );

        if let Some(headers) = req.headers.as_ref() {
            span.set_parent(extract_trace_context(headers));
        }

        let mut inner = self.inner.clone();

        Box::pin(
            async move {
                let result = inner.call(req).await;

                if let Ok(response) = &result {
                    Span::current().record("messaging.outcome", response.outcome());
                }

                result
            }
            .instrument(span),
        )
    }
}
