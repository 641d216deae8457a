use crate::nats::{ConsumeRequest, ConsumeResponse, JetStreamConsumer, PullConsumer};
use anyhow::{Context, Result};
use async_nats::jetstream::{self, AckKind};
use bytes::Bytes;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::{Service, ServiceExt};
use tracing::{debug, error, info, warn};

/// Settings for a durable pull consumer driven by a Tower service
#[derive(Debug, Clone)]
pub struct TowerConsumerConfig {
    pub stream_name: String,
    pub consumer_name: String,
    pub subject_filter: String,
    pub batch_size: usize,
    pub max_wait: Duration,
    /// Messages from one batch processed at the same time
    pub max_in_flight: usize,
    /// Unacknowledged deliveries are redelivered after this long
    pub ack_wait: Duration,
    /// Server-side delivery cap; 0 or negative means unlimited
    pub max_deliver: i64,
    /// Backoff the server applies before redelivering a Nak'd message
    pub nak_delay: Duration,
}

impl TowerConsumerConfig {
    fn pull_config(&self) -> jetstream::consumer::pull::Config {
        jetstream::consumer::pull::Config {
            name: Some(self.consumer_name.clone()),
            durable_name: Some(self.consumer_name.clone()),
            filter_subject: self.subject_filter.clone(),
            ack_policy: jetstream::consumer::AckPolicy::Explicit,
            ack_wait: self.ack_wait,
            max_deliver: if self.max_deliver > 0 {
                self.max_deliver
            } else {
                -1
            },
            ..Default::default()
        }
    }
}

/// Pulls batches from JetStream and feeds each message through a Tower
/// service, acknowledging according to the returned `ConsumeResponse`.
///
/// A message is only acknowledged after the service future resolves, so a
/// crash mid-processing leaves it unacknowledged and the server redelivers
/// it once `ack_wait` expires.
pub struct TowerConsumer<S> {
    consumer: Box<dyn PullConsumer>,
    config: TowerConsumerConfig,
    service: S,
}

impl<S> TowerConsumer<S>
where
    S: Service<ConsumeRequest, Response = ConsumeResponse, Error = anyhow::Error>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    pub async fn new(
        jetstream: Arc<dyn JetStreamConsumer>,
        config: TowerConsumerConfig,
        service: S,
    ) -> Result<Self> {
        debug!(
            stream = %config.stream_name,
            consumer = %config.consumer_name,
            filter_subject = %config.subject_filter,
            ack_wait_ms = config.ack_wait.as_millis() as u64,
            max_deliver = config.max_deliver,
            nak_delay_ms = config.nak_delay.as_millis() as u64,
            "creating tower nats consumer"
        );

        let consumer = jetstream
            .create_consumer(config.pull_config(), &config.stream_name)
            .await
            .context("failed to create consumer")?;

        Ok(Self {
            consumer,
            config,
            service,
        })
    }

    /// Run the consumer loop until cancellation
    pub async fn run(mut self, ctx: CancellationToken) -> Result<()> {
        info!(
            stream = %self.config.stream_name,
            consumer = %self.config.consumer_name,
            max_in_flight = self.config.max_in_flight,
            "starting tower nats consumer"
        );

        loop {
            tokio::select! {
                _ = ctx.cancelled() => {
                    info!(
                        stream = %self.config.stream_name,
                        consumer = %self.config.consumer_name,
                        "received shutdown signal, stopping consumer"
                    );
                    break;
                }
                result = self.fetch_and_process_batch() => {
                    if let Err(e) = result {
                        error!(
                            stream = %self.config.stream_name,
                            consumer = %self.config.consumer_name,
                            error = %e,
                            "error processing batch"
                        );
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }

        debug!(consumer = %self.config.consumer_name, "consumer stopped");
        Ok(())
    }

    async fn fetch_and_process_batch(&mut self) -> Result<()> {
        let raw_messages = self
            .consumer
            .fetch_messages(self.config.batch_size, self.config.max_wait)
            .await?;

        if raw_messages.is_empty() {
            debug!("no messages in batch");
            return Ok(());
        }

        debug!(message_count = raw_messages.len(), "received message batch");

        let service = self.service.clone();
        let nak_delay = self.config.nak_delay;
        futures::stream::iter(raw_messages)
            .for_each_concurrent(self.config.max_in_flight.max(1), |msg| {
                let service = service.clone();
                async move { process_message(service, msg, nak_delay).await }
            })
            .await;

        Ok(())
    }
}

async fn process_message<S>(service: S, msg: jetstream::Message, nak_delay: Duration)
where
    S: Service<ConsumeRequest, Response = ConsumeResponse, Error = anyhow::Error>,
{
    let delivery_attempt = msg
        .info()
        .map(|info| info.delivered.max(1) as u64)
        .unwrap_or(1);

    let request = ConsumeRequest::new(
        msg.subject.to_string(),
        Bytes::copy_from_slice(&msg.payload),
        msg.headers.clone(),
    )
    .with_delivery_attempt(delivery_attempt);

    let response = match service.oneshot(request).await {
        Ok(resp) => resp,
        Err(e) => {
            error!(subject = %msg.subject, error = %e, "service error processing message");
            ConsumeResponse::nak(e.to_string())
        }
    };

    match &response {
        ConsumeResponse::Nak(Some(reason)) => {
            warn!(subject = %msg.subject, reason = %reason, "rejecting message for redelivery");
        }
        ConsumeResponse::Term(reason) => {
            warn!(subject = %msg.subject, reason = %reason, "terminating message");
        }
        _ => {}
    }

    if let Err(e) = msg.ack_with(ack_kind_for(&response, nak_delay)).await {
        // The server redelivers after ack_wait
        error!(
            subject = %msg.subject,
            outcome = response.outcome(),
            error = %e,
            "failed to acknowledge message"
        );
    }
}

/// JetStream acknowledgement for a service response. A Nak always carries
/// `nak_delay` so a failing dependency is not hammered by instant redelivery.
pub fn ack_kind_for(response: &ConsumeResponse, nak_delay: Duration) -> AckKind {
    match response {
        ConsumeResponse::Ack => AckKind::Ack,
        ConsumeResponse::Nak(_) => AckKind::Nak(Some(nak_delay)),
        ConsumeResponse::Term(_) => AckKind::Term,
    }
}
