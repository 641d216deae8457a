mod ingestion_gateway;
mod normalizer;

pub use ingestion_gateway::*;
pub use normalizer::*;
