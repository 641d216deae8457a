use async_trait::async_trait;
use common::domain::{DomainError, DomainResult, Envelope};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Derived fields committed alongside the envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingOutput {
    pub modified_text: String,
    pub char_count: i64,
}

/// Tenant-scoped business logic applied to an envelope before commit.
///
/// May run more than once for the same key (redelivery racing a commit), so
/// implementations must be a pure function of the envelope.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ProcessingStep: Send + Sync {
    async fn process(&self, envelope: &Envelope) -> DomainResult<ProcessingOutput>;
}

/// Placeholder workload: sleeps in proportion to the text length and
/// upper-cases it.
#[derive(Debug, Clone)]
pub struct SimulatedWorkload {
    delay_per_char: Duration,
}

impl SimulatedWorkload {
    pub fn new(delay_per_char: Duration) -> Self {
        Self { delay_per_char }
    }

    /// Time spent on a text of `char_count` characters
    pub fn latency_for(&self, char_count: usize) -> Duration {
        self.delay_per_char
            .saturating_mul(u32::try_from(char_count).unwrap_or(u32::MAX))
    }
}

impl Default for SimulatedWorkload {
    fn default() -> Self {
        Self::new(Duration::from_millis(50))
    }
}

#[async_trait]
impl ProcessingStep for SimulatedWorkload {
    async fn process(&self, envelope: &Envelope) -> DomainResult<ProcessingOutput> {
        let char_count = envelope.text().chars().count();
        let latency = self.latency_for(char_count);

        debug!(
            tenant_id = %envelope.tenant_id(),
            log_id = %envelope.log_id(),
            char_count,
            latency_ms = latency.as_millis() as u64,
            "running simulated workload"
        );

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        Ok(ProcessingOutput {
            modified_text: envelope.text().to_uppercase(),
            char_count: char_count as i64,
        })
    }
}

/// Wraps a step and fails every n-th invocation with a transient error
pub struct FaultInjectingStep {
    inner: Arc<dyn ProcessingStep>,
    every_n: u64,
    calls: AtomicU64,
}

impl FaultInjectingStep {
    pub fn new(inner: Arc<dyn ProcessingStep>, every_n: u64) -> Self {
        Self {
            inner,
            every_n,
            calls: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl ProcessingStep for FaultInjectingStep {
    async fn process(&self, envelope: &Envelope) -> DomainResult<ProcessingOutput> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;

        if self.every_n > 0 && call % self.every_n == 0 {
            warn!(
                tenant_id = %envelope.tenant_id(),
                log_id = %envelope.log_id(),
                call,
                "injecting processing fault"
            );
            return Err(DomainError::TransientFailure(format!(
                "injected fault on call {}",
                call
            )));
        }

        self.inner.process(envelope).await
    }
}
