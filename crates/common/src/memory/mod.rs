mod in_memory_processed_log_repository;

pub use in_memory_processed_log_repository::*;
