//! Lifecycle of one broadcast run.
//!
//! The coordinator resolves every channel's audience, fixes `total`, then
//! runs one dispatch task per channel. Outcomes from all channels funnel
//! through a single mpsc receiver, which is the only place counters are
//! mutated and persisted.

use chrono::Utc;
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::broadcast::audience::AudienceResolver;
use crate::broadcast::dispatcher::{DispatchJob, Dispatcher, JobPayload};
use crate::broadcast::error::{BroadcastError, BroadcastResult};
use crate::broadcast::model::{BroadcastRun, Channel, Counts, RecipientIdentity, RunStatus, RunUpdate};
use crate::broadcast::selector::EmailCategory;
use crate::broadcast::store::RunStore;
use crate::core::metrics;
use crate::core::retry::{retry, RetryConfig, Retryable};

const OUTCOME_BUFFER: usize = 64;
const FINAL_WRITE_BACKOFF_STEPS: u32 = 8;

pub struct RunCoordinator {
    run: BroadcastRun,
    resolver: AudienceResolver,
    dispatcher: Dispatcher,
    store: Arc<dyn RunStore>,
    write_retry: RetryConfig,
    status: RunStatus,
    counts: Counts,
}

impl RunCoordinator {
    pub fn new(
        run: BroadcastRun,
        resolver: AudienceResolver,
        dispatcher: Dispatcher,
        store: Arc<dyn RunStore>,
        store_write_attempts: u32,
    ) -> Self {
        let status = run.status;
        Self {
            run,
            resolver,
            dispatcher,
            store,
            write_retry: RetryConfig::quick().max_retries(store_write_attempts.saturating_sub(1)),
            status,
            counts: Counts::default(),
        }
    }

    /// Audience token for one channel of this run.
    pub fn selector_for(run: &BroadcastRun, channel: Channel) -> &str {
        match channel {
            Channel::Telegram => &run.target_selector,
            Channel::Email if !run.channel.includes(Channel::Telegram) => &run.target_selector,
            Channel::Email => run.email_selector.as_deref().unwrap_or(EmailCategory::All.token()),
        }
    }

    /// Executes the run to a terminal status. Never returns an error: every
    /// failure ends up in the persisted record.
    pub async fn run(mut self, cancel: CancellationToken) -> RunStatus {
        let run_id = self.run.id;

        if cancel.is_cancelled() {
            log::info!("Broadcast run {} stopped before it started", run_id);
            return self.finalize(RunStatus::Cancelled, None).await;
        }

        self.transition(RunStatus::InProgress).await;
        log::info!(
            "Broadcast run {} started: channel={}, target={}",
            run_id,
            self.run.channel,
            self.run.target_selector
        );

        let jobs = match self.resolve_jobs(&cancel).await {
            Ok(jobs) => jobs,
            Err(e) => {
                log::error!("Broadcast run {} failed during audience resolution: {}", run_id, e);
                return self.finalize(RunStatus::Failed, Some(e.to_string())).await;
            }
        };

        self.counts.total = jobs.iter().map(|job| job.recipients.len() as u64).sum();
        self.persist(RunUpdate::counts(self.counts), "total").await;
        log::info!("Broadcast run {}: {} recipients in total", run_id, self.counts.total);

        if cancel.is_cancelled() {
            return self.finalize(RunStatus::Cancelled, None).await;
        }

        let cancelled = self.dispatch(jobs, &cancel).await;
        let status = settle(&self.counts, cancelled, &cancel);
        self.finalize(status, None).await
    }

    async fn resolve_jobs(&self, cancel: &CancellationToken) -> BroadcastResult<Vec<DispatchJob>> {
        let mut jobs = Vec::new();
        for &channel in self.run.channel.channels() {
            let payload = JobPayload::for_channel(channel, &self.run.payload).map_err(BroadcastError::InvalidRequest)?;
            let token = Self::selector_for(&self.run, channel);
            let recipients: Vec<RecipientIdentity> = self.resolver.resolve(token, channel).await?;
            log::info!(
                "Broadcast run {}: {} audience {} resolved to {} recipients",
                self.run.id,
                channel,
                token,
                recipients.len()
            );
            jobs.push(DispatchJob {
                run_id: self.run.id,
                recipients,
                payload,
                // Per-channel child token: stopping the run stops both,
                // and one channel ending never touches the other.
                cancel: cancel.child_token(),
            });
        }
        Ok(jobs)
    }

    /// Runs all jobs concurrently and folds their outcomes into the counters.
    /// Returns whether the run was stopped.
    async fn dispatch(&mut self, jobs: Vec<DispatchJob>, cancel: &CancellationToken) -> bool {
        let (tx, mut rx) = mpsc::channel(OUTCOME_BUFFER);
        let mut handles = Vec::with_capacity(jobs.len());

        for job in jobs {
            let channel = job.channel();
            let stream = self.dispatcher.run(job);
            let tx = tx.clone();
            let handle = tokio::spawn(async move {
                futures_util::pin_mut!(stream);
                while let Some(outcome) = stream.next().await {
                    if tx.send(outcome).await.is_err() {
                        break;
                    }
                }
            });
            handles.push((channel, handle));
        }
        drop(tx);

        let mut cancelling = false;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled(), if !cancelling => {
                    cancelling = true;
                    log::info!("Broadcast run {} cancelling", self.run.id);
                    self.transition(RunStatus::Cancelling).await;
                }
                received = rx.recv() => match received {
                    Some(outcome) => {
                        self.counts.record(outcome.outcome);
                        debug_assert!(self.counts.attempted() <= self.counts.total);
                        self.persist(RunUpdate::counts(self.counts), "progress").await;
                    }
                    None => break,
                },
            }
        }

        for (channel, handle) in handles {
            if let Err(e) = handle.await {
                log::error!("Broadcast run {}: {} dispatch task crashed: {}", self.run.id, channel, e);
            }
        }

        cancelling
    }

    async fn transition(&mut self, next: RunStatus) {
        if !self.status.can_transition_to(next) {
            log::warn!(
                "Broadcast run {}: ignoring transition {} → {}",
                self.run.id,
                self.status,
                next
            );
            return;
        }
        self.status = next;
        self.persist(RunUpdate::status(next), "status").await;
    }

    async fn finalize(mut self, status: RunStatus, error: Option<String>) -> RunStatus {
        let status = if self.status.can_transition_to(status) {
            status
        } else {
            // Only a stop can pre-empt the computed status once cancelling.
            RunStatus::Cancelled
        };
        self.status = status;

        let mut update = RunUpdate::status(status)
            .with_counts(self.counts)
            .finished_at(Utc::now());
        if let Some(error) = error {
            update = update.with_error(error);
        }
        self.persist_final(update).await;

        metrics::record_run_finished(status.as_ref());
        log::info!(
            "Broadcast run {} finished: {} (total={}, sent={}, failed={}, blocked={})",
            self.run.id,
            status,
            self.counts.total,
            self.counts.sent,
            self.counts.failed,
            self.counts.blocked
        );
        status
    }

    /// The terminal write is never dropped: it is retried with capped backoff
    /// until the store accepts it or reports a non-retryable error.
    async fn persist_final(&self, update: RunUpdate) {
        let mut attempt: u32 = 0;
        loop {
            let error = match self.store.update(self.run.id, update.clone()).await {
                Ok(()) => return,
                Err(e) => e,
            };
            metrics::record_progress_write_failure("final");
            if !error.is_retryable() {
                log::error!("Broadcast run {}: final write rejected: {}", self.run.id, error);
                return;
            }
            let delay = self.write_retry.delay_for_attempt(attempt.min(FINAL_WRITE_BACKOFF_STEPS));
            attempt = attempt.saturating_add(1);
            log::warn!(
                "Broadcast run {}: final write attempt {} failed (retrying in {:?}): {}",
                self.run.id,
                attempt,
                delay,
                error
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Writes `update` with bounded local retries. A write that still fails
    /// is logged and dropped; dispatch keeps going.
    async fn persist(&self, update: RunUpdate, stage: &str) {
        let result = retry(&self.write_retry, || self.store.update(self.run.id, update.clone())).await;
        if let Err(e) = result.result {
            metrics::record_progress_write_failure(stage);
            log::error!(
                "Broadcast run {}: dropping {} write after {} attempt(s): {:?}",
                self.run.id,
                stage,
                result.attempts,
                e.last_error()
            );
        }
    }
}

/// Terminal status once every channel has exited. A stop that lands after
/// the last outcome still wins.
fn settle(counts: &Counts, stopped: bool, cancel: &CancellationToken) -> RunStatus {
    counts.terminal_status(stopped || cancel.is_cancelled())
}
