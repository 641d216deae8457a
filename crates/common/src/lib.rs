pub mod domain;
pub mod memory;
pub mod nats;
pub mod postgres;
pub mod telemetry;
pub mod validation;

pub use domain::*;

// Re-export mocks when testing feature is enabled
#[cfg(any(test, feature = "testing"))]
pub use domain::MockDeadLetterProducer;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockEnvelopeProducer;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockProcessedLogRepository;
#[cfg(any(test, feature = "testing"))]
pub use nats::MockJetStreamConsumer;
#[cfg(any(test, feature = "testing"))]
pub use nats::MockJetStreamPublisher;
#[cfg(any(test, feature = "testing"))]
pub use nats::MockPullConsumer;
