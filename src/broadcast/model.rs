//! Broadcast data model: runs, counters, statuses and per-recipient outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// Delivery medium for a single dispatch job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Channel {
    Telegram,
    Email,
}

/// Channel requested for a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ChannelSelection {
    Telegram,
    Email,
    Both,
}

impl ChannelSelection {
    /// Delivery channels in dispatch order.
    pub fn channels(self) -> &'static [Channel] {
        match self {
            ChannelSelection::Telegram => &[Channel::Telegram],
            ChannelSelection::Email => &[Channel::Email],
            ChannelSelection::Both => &[Channel::Telegram, Channel::Email],
        }
    }

    pub fn includes(self, channel: Channel) -> bool {
        self.channels().contains(&channel)
    }
}

/// Run lifecycle.
///
/// `queued → in_progress → {completed, partial, failed, cancelled}`, with
/// `cancelling` between `in_progress` and `cancelled`. Never moves backward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    Cancelling,
    Completed,
    Partial,
    Failed,
    Cancelled,
}

impl RunStatus {
    fn rank(self) -> u8 {
        match self {
            RunStatus::Queued => 0,
            RunStatus::InProgress => 1,
            RunStatus::Cancelling => 2,
            RunStatus::Completed | RunStatus::Partial | RunStatus::Failed | RunStatus::Cancelled => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.rank() == 3
    }

    /// Whether moving from `self` to `next` respects the state machine.
    pub fn can_transition_to(self, next: RunStatus) -> bool {
        match (self, next) {
            (RunStatus::Queued, RunStatus::InProgress | RunStatus::Failed | RunStatus::Cancelled) => true,
            (RunStatus::InProgress, next) => next.rank() > 1,
            (RunStatus::Cancelling, RunStatus::Cancelled) => true,
            _ => false,
        }
    }
}

/// Terminal classification of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Outcome {
    Sent,
    Failed,
    Blocked,
}

/// Result of attempting delivery to one recipient. Aggregated, never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientOutcome {
    pub recipient_id: i64,
    pub channel: Channel,
    pub outcome: Outcome,
    pub error_detail: Option<String>,
}

/// Run counters.
///
/// `sent + failed + blocked <= total`; `total` is fixed once the audience
/// is resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    pub total: u64,
    pub sent: u64,
    pub failed: u64,
    pub blocked: u64,
}

impl Counts {
    pub fn attempted(&self) -> u64 {
        self.sent + self.failed + self.blocked
    }

    pub fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Sent => self.sent += 1,
            Outcome::Failed => self.failed += 1,
            Outcome::Blocked => self.blocked += 1,
        }
    }

    /// Terminal status for a run whose channels have all exited.
    ///
    /// An empty audience that was not stopped counts as completed.
    pub fn terminal_status(&self, cancelled: bool) -> RunStatus {
        if cancelled {
            RunStatus::Cancelled
        } else if self.failed == 0 && self.blocked == 0 {
            RunStatus::Completed
        } else if self.sent > 0 {
            RunStatus::Partial
        } else {
            RunStatus::Failed
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MediaKind {
    Photo,
    Video,
    Document,
}

/// Already-uploaded Telegram media, referenced by file id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Media {
    pub kind: MediaKind,
    pub file_id: String,
}

/// What gets sent. Telegram uses `text`/`media`, email uses subject + HTML.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastPayload {
    pub text: Option<String>,
    pub media: Option<Media>,
    pub email_subject: Option<String>,
    pub email_html: Option<String>,
}

/// A resolved audience member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientIdentity {
    /// Telegram user id, also the private chat id
    pub user_id: i64,
    pub username: Option<String>,
    pub email: Option<String>,
}

impl RecipientIdentity {
    pub fn new(user_id: i64) -> Self {
        Self {
            user_id,
            username: None,
            email: None,
        }
    }

    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

/// Operator request to start a broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastRequest {
    pub channel: ChannelSelection,
    /// Audience token; for `both` it drives the Telegram half
    pub target: String,
    /// Email audience token for `both`, `all_email` when absent
    pub email_target: Option<String>,
    pub payload: BroadcastPayload,
}

/// One persisted broadcast execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastRun {
    pub id: i64,
    pub channel: ChannelSelection,
    pub target_selector: String,
    pub email_selector: Option<String>,
    pub payload: BroadcastPayload,
    pub status: RunStatus,
    pub counts: Counts,
    /// Why the run failed before dispatch (e.g. unknown selector)
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Fields for a new run record; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewRun {
    pub channel: ChannelSelection,
    pub target_selector: String,
    pub email_selector: Option<String>,
    pub payload: BroadcastPayload,
    pub created_at: DateTime<Utc>,
}

/// Partial update of a run record. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunUpdate {
    pub status: Option<RunStatus>,
    pub counts: Option<Counts>,
    pub error: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl RunUpdate {
    pub fn status(status: RunStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn counts(counts: Counts) -> Self {
        Self {
            counts: Some(counts),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_counts(mut self, counts: Counts) -> Self {
        self.counts = Some(counts);
        self
    }

    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    #[must_use]
    pub fn finished_at(mut self, at: DateTime<Utc>) -> Self {
        self.completed_at = Some(at);
        self
    }
}

/// Offset pagination for run listings, newest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub limit: u32,
    pub offset: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self { limit: 20, offset: 0 }
    }
}
