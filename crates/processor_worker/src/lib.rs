pub mod domain;
pub mod nats;
pub mod processor_worker;

pub use domain::*;
pub use nats::*;
pub use processor_worker::*;
