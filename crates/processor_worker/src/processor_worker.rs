use crate::domain::IdempotentProcessor;
use crate::nats::EnvelopeConsumerService;
use common::nats::{
    JetStreamConsumer, NatsConsumeLoggingLayer, NatsConsumeLoggingService,
    NatsConsumeTracingConfig, NatsConsumeTracingLayer, NatsConsumeTracingService, TowerConsumer,
    TowerConsumerConfig,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tracing::info;

/// Headroom added to worst-case processing for one store round trip
pub const STORE_ROUND_TRIP_ALLOWANCE: Duration = Duration::from_secs(5);

pub struct ProcessorWorkerConfig {
    pub envelope_stream: String,
    pub envelope_subject: String,
    pub consumer_name: String,
    pub batch_size: usize,
    pub batch_wait_secs: u64,
    pub concurrency: usize,
    pub ack_wait: Duration,
    pub max_deliver: i64,
    pub nak_delay: Duration,
}

/// True when `ack_wait` outlasts the slowest expected delivery; otherwise a
/// slow message is redelivered while still being processed.
pub fn ack_wait_covers(ack_wait: Duration, worst_case_processing: Duration) -> bool {
    ack_wait > worst_case_processing.saturating_add(STORE_ROUND_TRIP_ALLOWANCE)
}

type ConsumerStack = NatsConsumeTracingService<NatsConsumeLoggingService<EnvelopeConsumerService>>;

/// Envelope consumer module, runnable as one runner process
pub struct ProcessorWorker {
    consumer: TowerConsumer<ConsumerStack>,
}

impl ProcessorWorker {
    pub async fn new(
        processor: Arc<IdempotentProcessor>,
        jetstream: Arc<dyn JetStreamConsumer>,
        config: ProcessorWorkerConfig,
    ) -> anyhow::Result<Self> {
        info!(
            stream = %config.envelope_stream,
            consumer = %config.consumer_name,
            concurrency = config.concurrency,
            "initializing processor worker"
        );

        let service = ServiceBuilder::new()
            .layer(NatsConsumeTracingLayer::new(NatsConsumeTracingConfig::new(
                &config.consumer_name,
            )))
            .layer(NatsConsumeLoggingLayer::new())
            .service(EnvelopeConsumerService::new(processor));

        let consumer = TowerConsumer::new(
            jetstream,
            TowerConsumerConfig {
                stream_name: config.envelope_stream,
                consumer_name: config.consumer_name,
                subject_filter: config.envelope_subject,
                batch_size: config.batch_size,
                max_wait: Duration::from_secs(config.batch_wait_secs),
                max_in_flight: config.concurrency,
                ack_wait: config.ack_wait,
                max_deliver: config.max_deliver,
                nak_delay: config.nak_delay,
            },
            service,
        )
        .await?;

        Ok(Self { consumer })
    }

    pub fn into_runner_process(
        self,
    ) -> impl FnOnce(
        CancellationToken,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send>,
    > {
        move |ctx| Box::pin(async move { self.consumer.run(ctx).await })
    }
}
