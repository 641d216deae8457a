mod processing_step;
mod processor;

pub use processing_step::*;
pub use processor::*;
