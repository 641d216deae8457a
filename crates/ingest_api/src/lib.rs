pub mod domain;
pub mod http;
pub mod ingest_api;
pub mod nats;

pub use domain::*;
pub use http::*;
pub use ingest_api::*;
pub use nats::*;
