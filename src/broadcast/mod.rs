//! Broadcast engine
//!
//! - `selector` / `audience`: target token → ordered recipients
//! - `dispatcher`: paced per-channel send loop with per-recipient retry
//! - `coordinator`: one run's lifecycle and counters
//! - `registry`: in-flight runs and cooperative stop
//! - `service`: the operator-facing API tying them together

pub mod audience;
pub mod coordinator;
pub mod dispatcher;
pub mod error;
pub mod model;
pub mod registry;
pub mod selector;
pub mod service;
pub mod store;

pub use audience::{AudienceResolver, UserStore};
pub use dispatcher::{DispatchJob, Dispatcher, EmailMessage, EmailSender, JobPayload, MessageSender, TelegramMessage};
pub use error::{BroadcastError, BroadcastResult, DeliveryError};
pub use model::{
    BroadcastPayload, BroadcastRequest, BroadcastRun, Channel, ChannelSelection, Counts, Media, MediaKind, Outcome,
    Pagination, RecipientIdentity, RecipientOutcome, RunStatus,
};
pub use registry::BroadcastRegistry;
pub use selector::{EmailCategory, Selector, UserCategory};
pub use service::BroadcastService;
pub use store::RunStore;
