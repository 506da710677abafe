//! tgcast - broadcast dispatch engine for a Telegram subscription bot
//!
//! Operators pick an audience by selector token and a payload; the engine
//! resolves recipients, delivers over Telegram and/or email under a
//! per-channel rate limit, and keeps a persisted run record with live
//! counters that can be stopped mid-flight.
//!
//! # Module Structure
//!
//! - `core`: Configuration, errors, logging, metrics, pacing and retry
//! - `broadcast`: Selectors, audience resolution, dispatch, runs and registry
//! - `storage`: SQLite pool, migrations and store implementations
//! - `telegram`: Bot creation and the Telegram sender
//! - `email`: SMTP sender

pub mod broadcast;
pub mod cli;
pub mod core;
pub mod email;
pub mod storage;
pub mod telegram;

// Re-export commonly used types for convenience
pub use broadcast::{BroadcastError, BroadcastService};
pub use self::core::{config, AppError, AppResult};
pub use storage::{create_pool, get_connection, DbConnection, DbPool};
