//! Rate-limited per-channel dispatch.
//!
//! A [`DispatchJob`] is one channel's slice of a run. [`Dispatcher::run`]
//! turns it into a lazy stream of [`RecipientOutcome`]s, one per attempted
//! recipient in job order. Sends are paced through the shared
//! [`RateLimiter`], transient provider errors get one retry, and the job's
//! cancellation token is checked before every recipient.

use async_trait::async_trait;
use futures_util::stream::{self, Stream};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::broadcast::error::DeliveryError;
use crate::broadcast::model::{BroadcastPayload, Channel, Media, Outcome, RecipientIdentity, RecipientOutcome};
use crate::core::config::BroadcastSettings;
use crate::core::metrics;
use crate::core::rate_limiter::RateLimiter;
use crate::core::retry::{retry, RetryConfig};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelegramMessage {
    pub text: Option<String>,
    /// Sent with `text` as caption when present
    pub media: Option<Media>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub subject: String,
    pub html: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobPayload {
    Telegram(TelegramMessage),
    Email(EmailMessage),
}

impl JobPayload {
    /// Picks the half of `payload` that `channel` sends.
    pub fn for_channel(channel: Channel, payload: &BroadcastPayload) -> Result<Self, String> {
        match channel {
            Channel::Telegram => {
                let text = payload.text.as_deref().map(str::trim).filter(|t| !t.is_empty());
                if text.is_none() && payload.media.is_none() {
                    return Err("telegram broadcast needs text or media".to_string());
                }
                Ok(JobPayload::Telegram(TelegramMessage {
                    text: text.map(str::to_string),
                    media: payload.media.clone(),
                }))
            }
            Channel::Email => match (&payload.email_subject, &payload.email_html) {
                (Some(subject), Some(html)) if !subject.trim().is_empty() && !html.trim().is_empty() => {
                    Ok(JobPayload::Email(EmailMessage {
                        subject: subject.clone(),
                        html: html.clone(),
                    }))
                }
                _ => Err("email broadcast needs a subject and an HTML body".to_string()),
            },
        }
    }

    pub fn channel(&self) -> Channel {
        match self {
            JobPayload::Telegram(_) => Channel::Telegram,
            JobPayload::Email(_) => Channel::Email,
        }
    }
}

/// Telegram send primitive.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send_message(&self, chat_id: i64, message: &TelegramMessage) -> Result<(), DeliveryError>;
}

/// Email send primitive. A bounced address is reported as
/// [`DeliveryError::RecipientBlocked`].
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send_email(&self, to: &str, message: &EmailMessage) -> Result<(), DeliveryError>;
}

/// One channel's work within a run. Consumed by [`Dispatcher::run`].
#[derive(Debug)]
pub struct DispatchJob {
    pub run_id: i64,
    pub recipients: Vec<RecipientIdentity>,
    pub payload: JobPayload,
    pub cancel: CancellationToken,
}

impl DispatchJob {
    pub fn channel(&self) -> Channel {
        self.payload.channel()
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    telegram: Arc<dyn MessageSender>,
    email: Option<Arc<dyn EmailSender>>,
    limiter: RateLimiter,
    retry: RetryConfig,
    send_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        telegram: Arc<dyn MessageSender>,
        email: Option<Arc<dyn EmailSender>>,
        limiter: RateLimiter,
        settings: &BroadcastSettings,
    ) -> Self {
        Self {
            telegram,
            email,
            limiter,
            retry: RetryConfig::single(settings.transient_backoff),
            send_timeout: settings.send_timeout,
        }
    }

    pub fn supports(&self, channel: Channel) -> bool {
        match channel {
            Channel::Telegram => true,
            Channel::Email => self.email.is_some(),
        }
    }

    /// Drives `job` lazily: each poll of the stream paces, sends and
    /// classifies one recipient. The stream ends when the audience is
    /// exhausted or the job is cancelled; recipients after a cancellation
    /// produce no outcome.
    pub fn run(&self, job: DispatchJob) -> impl Stream<Item = RecipientOutcome> + Send + 'static {
        log::info!(
            "Dispatch start: run {} on {} ({} recipients)",
            job.run_id,
            job.channel(),
            job.recipients.len()
        );

        stream::unfold((self.clone(), job, 0usize), |(dispatcher, job, index)| async move {
            if index >= job.recipients.len() {
                log::info!("Dispatch done: run {} on {}", job.run_id, job.channel());
                return None;
            }
            if job.cancel.is_cancelled() {
                log::info!(
                    "Dispatch cancelled: run {} on {} after {} of {} recipients",
                    job.run_id,
                    job.channel(),
                    index,
                    job.recipients.len()
                );
                return None;
            }

            let outcome = dispatcher.deliver(&job, &job.recipients[index]).await?;
            Some((outcome, (dispatcher, job, index + 1)))
        })
    }

    /// Paces, sends (with one retry on transient errors) and classifies.
    ///
    /// Returns `None` when the job was cancelled while waiting for a slot.
    async fn deliver(&self, job: &DispatchJob, recipient: &RecipientIdentity) -> Option<RecipientOutcome> {
        let channel = job.channel();

        self.limiter.acquire(channel).await;
        if job.cancel.is_cancelled() {
            return None;
        }

        let mut attempt = 0u32;
        let result = retry(&self.retry, || {
            attempt += 1;
            let is_retry = attempt > 1;
            async move {
                if is_retry {
                    metrics::record_send_retry(channel.as_ref());
                    self.limiter.acquire(channel).await;
                }
                self.send_once(&job.payload, recipient).await
            }
        })
        .await;

        let (outcome, error_detail) = match result.result {
            Ok(()) => (Outcome::Sent, None),
            Err(err) => {
                let last_error = err.into_last_error();
                (classify(&last_error), Some(last_error.to_string()))
            }
        };

        match outcome {
            Outcome::Sent => log::debug!("run {}: {} → {} sent", job.run_id, channel, recipient.user_id),
            _ => log::warn!(
                "run {}: {} → {} {} after {} attempt(s): {}",
                job.run_id,
                channel,
                recipient.user_id,
                outcome,
                result.attempts,
                error_detail.as_deref().unwrap_or_default()
            ),
        }
        metrics::record_outcome(channel.as_ref(), outcome.as_ref());

        Some(RecipientOutcome {
            recipient_id: recipient.user_id,
            channel,
            outcome,
            error_detail,
        })
    }

    async fn send_once(&self, payload: &JobPayload, recipient: &RecipientIdentity) -> Result<(), DeliveryError> {
        let send = async {
            match payload {
                JobPayload::Telegram(message) => self.telegram.send_message(recipient.user_id, message).await,
                JobPayload::Email(message) => match (&self.email, recipient.email.as_deref()) {
                    (Some(sender), Some(address)) => sender.send_email(address, message).await,
                    (None, _) => Err(DeliveryError::RecipientPermanentError(
                        "email channel not configured".to_string(),
                    )),
                    (Some(_), None) => Err(DeliveryError::RecipientPermanentError(
                        "recipient has no email".to_string(),
                    )),
                },
            }
        };

        match tokio::time::timeout(self.send_timeout, send).await {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::transient(format!(
                "send timed out after {:?}",
                self.send_timeout
            ))),
        }
    }
}

/// Maps a final delivery error to its outcome bucket.
pub fn classify(error: &DeliveryError) -> Outcome {
    match error {
        DeliveryError::RecipientBlocked(_) => Outcome::Blocked,
        DeliveryError::RecipientTransientError { .. } | DeliveryError::RecipientPermanentError(_) => Outcome::Failed,
    }
}
