// library entry
pub mod algorithms;
pub mod client;
pub mod config;
pub mod error;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod scheduler;
pub mod storage;

#[cfg(test)]
mod test_utils;

#[cfg(test)]
mod tests;

// Re-export key components for convenience
pub use algorithms::{RateLimitStatus, RateLimiter};
pub use client::KvClient;
pub use config::{KvClientConfig, RateLimiterConfig, SchedulerConfig, ServiceConfig};
pub use error::{MonitorError, Result, StorageError};
pub use logging::init as init_logging;
pub use storage::SetOptions;
