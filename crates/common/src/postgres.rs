mod client;
mod config;
mod processed_log_repository;

pub use client::*;
pub use config::*;
pub use processed_log_repository::*;
