mod dead_letter_producer;
mod envelope_consumer_service;

pub use dead_letter_producer::*;
pub use envelope_consumer_service::*;
