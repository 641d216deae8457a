mod client;
mod middleware;
mod subject;
mod tower_consumer;
mod trace_context;
mod traits;

pub use client::*;
pub use middleware::*;
pub use subject::*;
pub use tower_consumer::*;
pub use trace_context::*;
pub use traits::*;
