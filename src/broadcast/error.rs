use std::time::Duration;
use thiserror::Error;

use crate::core::retry::Retryable;
use crate::storage::StoreError;

/// Errors surfaced to the operator by the broadcast API.
#[derive(Error, Debug)]
pub enum BroadcastError {
    /// Target token matches no known category, or names an inactive tariff
    #[error("Invalid selector: {0}")]
    InvalidSelector(String),

    /// Audience or run store could not be reached
    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    /// Payload does not fit the requested channel
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Broadcast run {0} not found")]
    RunNotFound(i64),
}

pub type BroadcastResult<T> = Result<T, BroadcastError>;

/// Why one delivery attempt did not succeed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// Permanent refusal: bot blocked, chat deactivated, address bounced
    #[error("recipient unreachable: {0}")]
    RecipientBlocked(String),

    /// Temporary failure; `retry_after` is the provider's backoff hint
    #[error("transient provider error: {detail}")]
    RecipientTransientError {
        detail: String,
        retry_after: Option<Duration>,
    },

    /// Malformed payload, permission denial and everything else
    #[error("delivery rejected: {0}")]
    RecipientPermanentError(String),
}

impl DeliveryError {
    pub fn transient(detail: impl Into<String>) -> Self {
        DeliveryError::RecipientTransientError {
            detail: detail.into(),
            retry_after: None,
        }
    }

    pub fn rate_limited(detail: impl Into<String>, retry_after: Duration) -> Self {
        DeliveryError::RecipientTransientError {
            detail: detail.into(),
            retry_after: Some(retry_after),
        }
    }
}

impl Retryable for DeliveryError {
    fn is_retryable(&self) -> bool {
        matches!(self, DeliveryError::RecipientTransientError { .. })
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            DeliveryError::RecipientTransientError { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}
