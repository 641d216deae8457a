use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use super::types::{PublishRequest, PublishResponse};
use super::{
    NatsPublishLoggingLayer, NatsPublishLoggingService, NatsPublishTracingLayer,
    NatsPublishTracingService, NatsTracingConfig,
};
use crate::nats::JetStreamPublisher;
use anyhow::Result;
use tower::{Service, ServiceBuilder, ServiceExt};

/// Innermost service: hands the request to JetStream and waits for the ack
#[derive(Clone)]
pub struct NatsPublishService {
    publisher: Arc<dyn JetStreamPublisher>,
}

impl NatsPublishService {
    pub fn new(publisher: Arc<dyn JetStreamPublisher>) -> Self {
        Self { publisher }
    }
}

impl Service<PublishRequest> for NatsPublishService {
    type Response = PublishResponse;
    type Error = anyhow::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: PublishRequest) -> Self::Future {
        let publisher = Arc::clone(&self.publisher);
        let subject = req.subject.clone();

        Box::pin(async move {
            publisher
                .publish_with_headers(subject.clone(), req.headers, req.payload)
                .await?;
            Ok(PublishResponse { subject })
        })
    }
}

/// Builds a publisher with optional tracing and logging layers
pub struct NatsPublisherBuilder {
    publisher: Arc<dyn JetStreamPublisher>,
    tracing_config: Option<NatsTracingConfig>,
    with_logging: bool,
}

impl NatsPublisherBuilder {
    pub fn new(publisher: Arc<dyn JetStreamPublisher>) -> Self {
        Self {
            publisher,
            tracing_config: None,
            with_logging: false,
        }
    }

    pub fn with_tracing(mut self, config: NatsTracingConfig) -> Self {
        self.tracing_config = Some(config);
        self
    }

    pub fn with_logging(mut self) -> Self {
        self.with_logging = true;
        self
    }

    /// Layer order, outermost first: tracing, logging, publish
    pub fn build(self) -> LayeredPublisher {
        let inner = NatsPublishService::new(self.publisher);

        match (self.tracing_config, self.with_logging) {
            (Some(tracing_config), true) => LayeredPublisher::TracedAndLogged(
                ServiceBuilder::new()
                    .layer(NatsPublishTracingLayer::new(tracing_config))
                    .layer(NatsPublishLoggingLayer::new())
                    .service(inner),
            ),
            (Some(tracing_config), false) => LayeredPublisher::Traced(
                ServiceBuilder::new()
                    .layer(NatsPublishTracingLayer::new(tracing_config))
                    .service(inner),
            ),
            (None, true) => LayeredPublisher::Logged(
                ServiceBuilder::new()
                    .layer(NatsPublishLoggingLayer::new())
                    .service(inner),
            ),
            (None, false) => LayeredPublisher::Bare(inner),
        }
    }
}

/// Concrete service type for every layer combination the builder produces
#[derive(Clone)]
pub enum LayeredPublisher {
    TracedAndLogged(NatsPublishTracingService<NatsPublishLoggingService<NatsPublishService>>),
    Traced(NatsPublishTracingService<NatsPublishService>),
    Logged(NatsPublishLoggingService<NatsPublishService>),
    Bare(NatsPublishService),
}

impl LayeredPublisher {
    /// Drive one request through a clone of the stack
    pub async fn publish(&self, req: PublishRequest) -> Result<PublishResponse> {
        self.clone().oneshot(req).await
    }
}

impl Service<PublishRequest> for LayeredPublisher {
    type Response = PublishResponse;
    type Error = anyhow::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        match self {
            LayeredPublisher::TracedAndLogged(svc) => svc.poll_ready(cx),
            LayeredPublisher::Traced(svc) => svc.poll_ready(cx),
            LayeredPublisher::Logged(svc) => svc.poll_ready(cx),
            LayeredPublisher::Bare(svc) => svc.poll_ready(cx),
        }
    }

    fn call(&mut self, req: PublishRequest) -> Self::Future {
        match self {
            LayeredPublisher::TracedAndLogged(svc) => svc.call(req),
            LayeredPublisher::Traced(svc) => svc.call(req),
            LayeredPublisher::Logged(svc) => svc.call(req),
            LayeredPublisher::Bare(svc) => svc.call(req),
        }
    }
}
