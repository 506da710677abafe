//! Core utilities, configuration, and common functionality

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod rate_limiter;
pub mod retry;
pub mod version_check;

// Re-exports for convenience
pub use config::BroadcastSettings;
pub use error::{AppError, AppResult};
pub use logging::{init_logger, log_startup_configuration};
