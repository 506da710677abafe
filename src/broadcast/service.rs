//! Operator-facing broadcast API.
//!
//! One `BroadcastService` is built at startup and shared by handle; it owns
//! the registry, the per-channel pacer (inside the dispatcher) and the
//! store handles. Nothing here is a global.

use chrono::Utc;
use std::sync::Arc;

use crate::broadcast::audience::{AudienceResolver, UserStore};
use crate::broadcast::coordinator::RunCoordinator;
use crate::broadcast::dispatcher::{Dispatcher, EmailSender, JobPayload, MessageSender};
use crate::broadcast::error::{BroadcastError, BroadcastResult};
use crate::broadcast::model::{
    BroadcastRequest, BroadcastRun, Channel, ChannelSelection, NewRun, Pagination, RunStatus,
};
use crate::broadcast::registry::BroadcastRegistry;
use crate::broadcast::selector::EmailCategory;
use crate::broadcast::store::RunStore;
use crate::core::config::BroadcastSettings;
use crate::core::rate_limiter::RateLimiter;

pub struct BroadcastService {
    resolver: AudienceResolver,
    dispatcher: Dispatcher,
    runs: Arc<dyn RunStore>,
    registry: Arc<BroadcastRegistry>,
    settings: BroadcastSettings,
}

impl BroadcastService {
    pub fn new(
        users: Arc<dyn UserStore>,
        runs: Arc<dyn RunStore>,
        telegram: Arc<dyn MessageSender>,
        email: Option<Arc<dyn EmailSender>>,
        settings: BroadcastSettings,
    ) -> Self {
        let limiter = RateLimiter::new(&settings);
        Self {
            resolver: AudienceResolver::new(users),
            dispatcher: Dispatcher::new(telegram, email, limiter, &settings),
            runs,
            registry: BroadcastRegistry::new(settings.registry_grace),
            settings,
        }
    }

    pub fn registry(&self) -> &Arc<BroadcastRegistry> {
        &self.registry
    }

    /// Validates the request, records a queued run and starts its coordinator.
    ///
    /// Selector and payload problems are reported here and no run is created.
    pub async fn submit(&self, request: BroadcastRequest) -> BroadcastResult<BroadcastRun> {
        let email_selector = match request.channel {
            ChannelSelection::Both => Some(
                request
                    .email_target
                    .clone()
                    .unwrap_or_else(|| EmailCategory::All.token().to_string()),
            ),
            _ => None,
        };

        for &channel in request.channel.channels() {
            if !self.dispatcher.supports(channel) {
                return Err(BroadcastError::InvalidRequest(format!("{} channel is not configured", channel)));
            }
            JobPayload::for_channel(channel, &request.payload).map_err(BroadcastError::InvalidRequest)?;
            let token = match (channel, &email_selector) {
                (Channel::Email, Some(token)) => token.as_str(),
                _ => request.target.as_str(),
            };
            self.resolver.validate_for(token, channel).await?;
        }

        let id = self
            .runs
            .create(NewRun {
                channel: request.channel,
                target_selector: request.target.trim().to_string(),
                email_selector,
                payload: request.payload,
                created_at: Utc::now(),
            })
            .await?;
        let run = self.runs.get(id).await?.ok_or(BroadcastError::RunNotFound(id))?;

        let coordinator = RunCoordinator::new(
            run.clone(),
            self.resolver.clone(),
            self.dispatcher.clone(),
            Arc::clone(&self.runs),
            self.settings.store_write_attempts,
        );
        self.registry.start(id, move |cancel| coordinator.run(cancel));
        log::info!("Broadcast run {} submitted ({} → {})", id, run.channel, run.target_selector);

        Ok(run)
    }

    /// Audience size for a selector token at this moment.
    pub async fn preview(&self, target: &str) -> BroadcastResult<u64> {
        self.resolver.count(target).await
    }

    pub async fn status(&self, id: i64) -> BroadcastResult<BroadcastRun> {
        let mut run = self.runs.get(id).await?.ok_or(BroadcastError::RunNotFound(id))?;
        // The coordinator persists `cancelling` asynchronously; reflect a
        // signaled stop right away.
        if run.status == RunStatus::InProgress && self.registry.is_stopping(id) {
            run.status = RunStatus::Cancelling;
        }
        Ok(run)
    }

    /// Signals the run to stop and returns its current descriptor.
    /// Stopping a finished or unknown-to-this-process run changes nothing.
    pub async fn stop(&self, id: i64) -> BroadcastResult<BroadcastRun> {
        let signaled = self.registry.request_stop(id);
        if !signaled {
            log::info!("Stop for broadcast run {}: nothing to stop", id);
        }
        self.status(id).await
    }

    pub async fn list(&self, page: Pagination) -> BroadcastResult<Vec<BroadcastRun>> {
        Ok(self.runs.list(page).await?)
    }

    /// Waits for a run started by this process to finish, then returns its
    /// final descriptor. Runs unknown to the registry are returned as stored.
    pub async fn wait(&self, id: i64) -> BroadcastResult<BroadcastRun> {
        self.registry.wait(id).await;
        self.status(id).await
    }

    /// Marks runs orphaned by a previous process as failed.
    pub async fn recover_interrupted(&self) -> BroadcastResult<usize> {
        let count = self.runs.fail_interrupted().await?;
        if count > 0 {
            log::warn!("Marked {} interrupted broadcast run(s) as failed", count);
        }
        Ok(count)
    }

    /// Stops every live run; used on shutdown.
    pub fn shutdown(&self) -> usize {
        self.registry.stop_all()
    }
}
