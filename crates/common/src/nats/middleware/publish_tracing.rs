use std::fmt::Display;
use std::task::{Context, Poll};

use super::types::{PublishRequest, PublishResponse, TENANT_HEADER};
use crate::nats::trace_context::inject_trace_context;
use futures::future::{BoxFuture, FutureExt};
use tower::{Layer, Service};
use tracing::{field, info_span, Instrument, Span};

#[derive(Clone, Debug, Default)]
pub struct NatsTracingConfig {
    /// Name of the producing component, e.g. `ingest_gateway`
    pub service_name: String,
}

impl NatsTracingConfig {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }
}

/// Wraps each publish in a producer span and writes that span's W3C context
/// into the outgoing headers, so the processor's consume span continues the
/// ingest request's trace.
#[derive(Clone)]
pub struct NatsPublishTracingLayer {
    config: NatsTracingConfig,
}

impl NatsPublishTracingLayer {
    pub fn new(config: NatsTracingConfig) -> Self {
        Self { config }
    }
}

impl<S> Layer<S> for NatsPublishTracingLayer {
    type Service = NatsPublishTracingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        NatsPublishTracingService {
            inner,
            component: self.config.service_name.clone(),
        }
    }
}

#[derive(Clone)]
pub struct NatsPublishTracingService<S> {
    inner: S,
    component: String,
}

/// `<destination> publish` per the OTel messaging conventions
fn producer_span(component: &str, req: &PublishRequest) -> Span {
    let tenant_id = req
        .headers
        .get(TENANT_HEADER)
        .map(|value| value.as_str())
        .unwrap_or_default();

    info_span!(
        target: "nats",
        "jetstream.publish",
        otel.name = %format!("{} publish", req.subject),
        otel.kind = "producer",
        otel.status_code = field::Empty,
        otel.status_description = field::Empty,
        messaging.system = "nats",
        messaging.operation = "publish",
        messaging.destination.name = %req.subject,
        messaging.message.body.size = req.payload.len(),
        tenant.id = %tenant_id,
        component = %component,
    )
}

fn record_outcome<E: Display>(span: &Span, failure: Option<&E>) {
    match failure {
        None => {
            span.record("otel.status_code", "OK");
        }
        Some(e) => {
            span.record("otel.status_code", "ERROR");
            span.record("otel.status_description", field::display(e));
        }
    }
}

impl<S> Service<PublishRequest> for NatsPublishTracingService<S>
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

    fn call(&mut self, mut req: PublishRequest) -> Self::Future {
        let span = producer_span(&self.component, &req);
        span.in_scope(|| inject_trace_context(&mut req.headers));

        let replacement = self.inner.clone();
        let mut ready = std::mem::replace(&mut self.inner, replacement);
        let outcome_span = span.clone();

        async move {
            let result = ready.call(req).await;
            record_outcome(&outcome_span, result.as_ref().err());
            result
        }
        .instrument(span)
        .boxed()
    }
}
