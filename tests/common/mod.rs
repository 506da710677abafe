//! Common test utilities
//!
//! In-memory stores and scripted senders shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use tgcast::broadcast::model::{BroadcastRun, Counts, NewRun, Pagination, RunStatus, RunUpdate};
use tgcast::broadcast::{
    BroadcastService, DeliveryError, EmailMessage, EmailSender, MessageSender, RecipientIdentity, RunStore, Selector,
    TelegramMessage, UserStore,
};
use tgcast::core::BroadcastSettings;
use tgcast::storage::StoreError;

/// Audience fixture keyed by parsed selector.
#[derive(Default)]
pub struct InMemoryUserStore {
    audiences: Mutex<HashMap<Selector, Vec<RecipientIdentity>>>,
    active_tariffs: Mutex<HashSet<i64>>,
    unavailable: Mutex<bool>,
    /// When set, `iterate_by_filter` waits for `release` before answering
    gate: Option<Arc<Notify>>,
    resolving: Arc<Notify>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolution blocks until [`Notify::notify_one`] on the returned handle.
    pub fn gated() -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        let store = Self {
            gate: Some(Arc::clone(&gate)),
            ..Self::default()
        };
        (store, gate)
    }

    /// Fires once resolution has started (useful with [`gated`](Self::gated)).
    pub fn resolving(&self) -> Arc<Notify> {
        Arc::clone(&self.resolving)
    }

    pub fn with_audience(self, token: &str, recipients: Vec<RecipientIdentity>) -> Self {
        let selector: Selector = match token.parse() {
            Ok(selector) => selector,
            Err(e) => panic!("bad fixture selector {}: {}", token, e),
        };
        if let Selector::Tariff(id) = selector {
            self.active_tariffs.lock().unwrap().insert(id);
        }
        self.audiences.lock().unwrap().insert(selector, recipients);
        self
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock().unwrap() = unavailable;
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if *self.unavailable.lock().unwrap() {
            return Err(StoreError::Unavailable("user store is down".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn count_by_filter(&self, selector: &Selector) -> Result<u64, StoreError> {
        self.check_available()?;
        Ok(self
            .audiences
            .lock()
            .unwrap()
            .get(selector)
            .map(|recipients| recipients.len() as u64)
            .unwrap_or(0))
    }

    async fn iterate_by_filter(&self, selector: &Selector) -> Result<Vec<RecipientIdentity>, StoreError> {
        self.resolving.notify_one();
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.check_available()?;
        Ok(self.audiences.lock().unwrap().get(selector).cloned().unwrap_or_default())
    }

    async fn is_active_tariff(&self, tariff_id: i64) -> Result<bool, StoreError> {
        self.check_available()?;
        Ok(self.active_tariffs.lock().unwrap().contains(&tariff_id))
    }
}

/// Run records in memory, with a log of every applied update.
#[derive(Default)]
pub struct InMemoryRunStore {
    runs: Mutex<Vec<BroadcastRun>>,
    history: Mutex<Vec<(i64, Counts, RunStatus)>>,
    failing_updates: Mutex<u32>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `n` updates fail with a retryable error.
    pub fn fail_next_updates(&self, n: u32) {
        *self.failing_updates.lock().unwrap() = n;
    }

    /// `(run id, counts, status)` after each successful update, in order.
    pub fn history(&self, id: i64) -> Vec<(Counts, RunStatus)> {
        self.history
            .lock()
            .unwrap()
            .iter()
            .filter(|(run_id, _, _)| *run_id == id)
            .map(|(_, counts, status)| (*counts, *status))
            .collect()
    }

    pub fn statuses(&self, id: i64) -> Vec<RunStatus> {
        let mut statuses: Vec<RunStatus> = Vec::new();
        for (_, status) in self.history(id) {
            if statuses.last() != Some(&status) {
                statuses.push(status);
            }
        }
        statuses
    }

    pub fn run_count(&self) -> usize {
        self.runs.lock().unwrap().len()
    }

    /// Inserts a record as a previous process would have left it.
    pub fn insert_with_status(&self, status: RunStatus) -> i64 {
        let mut runs = self.runs.lock().unwrap();
        let id = runs.len() as i64 + 1;
        runs.push(BroadcastRun {
            id,
            channel: tgcast::broadcast::ChannelSelection::Telegram,
            target_selector: "all".to_string(),
            email_selector: None,
            payload: Default::default(),
            status,
            counts: Counts::default(),
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        });
        id
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn create(&self, run: NewRun) -> Result<i64, StoreError> {
        let mut runs = self.runs.lock().unwrap();
        let id = runs.len() as i64 + 1;
        runs.push(BroadcastRun {
            id,
            channel: run.channel,
            target_selector: run.target_selector,
            email_selector: run.email_selector,
            payload: run.payload,
            status: RunStatus::Queued,
            counts: Counts::default(),
            error: None,
            created_at: run.created_at,
            completed_at: None,
        });
        Ok(id)
    }

    async fn update(&self, id: i64, update: RunUpdate) -> Result<(), StoreError> {
        {
            let mut failing = self.failing_updates.lock().unwrap();
            if *failing > 0 {
                *failing -= 1;
                return Err(StoreError::Unavailable("run store write failed".to_string()));
            }
        }

        let mut runs = self.runs.lock().unwrap();
        let run = runs
            .iter_mut()
            .find(|run| run.id == id)
            .ok_or(StoreError::NotFound(id))?;
        if let Some(status) = update.status {
            run.status = status;
        }
        if let Some(counts) = update.counts {
            run.counts = counts;
        }
        if let Some(error) = update.error {
            run.error = Some(error);
        }
        if let Some(completed_at) = update.completed_at {
            run.completed_at = Some(completed_at);
        }
        self.history.lock().unwrap().push((id, run.counts, run.status));
        Ok(())
    }

    async fn get(&self, id: i64) -> Result<Option<BroadcastRun>, StoreError> {
        Ok(self.runs.lock().unwrap().iter().find(|run| run.id == id).cloned())
    }

    async fn list(&self, page: Pagination) -> Result<Vec<BroadcastRun>, StoreError> {
        let runs = self.runs.lock().unwrap();
        Ok(runs
            .iter()
            .rev()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .cloned()
            .collect())
    }

    async fn fail_interrupted(&self) -> Result<usize, StoreError> {
        let mut runs = self.runs.lock().unwrap();
        let mut touched = 0;
        for run in runs.iter_mut().filter(|run| !run.status.is_terminal()) {
            run.status = RunStatus::Failed;
            run.error = Some("interrupted".to_string());
            run.completed_at = Some(Utc::now());
            touched += 1;
        }
        Ok(touched)
    }
}

/// Replays scripted results per chat id; unscripted chats succeed.
#[derive(Default)]
pub struct ScriptedTelegram {
    script: Mutex<HashMap<i64, Vec<Result<(), DeliveryError>>>>,
    delivered: Mutex<Vec<i64>>,
}

impl ScriptedTelegram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, chat_id: i64, results: Vec<Result<(), DeliveryError>>) -> Self {
        self.script.lock().unwrap().insert(chat_id, results);
        self
    }

    pub fn blocked(self, chat_id: i64) -> Self {
        self.script(chat_id, vec![Err(DeliveryError::RecipientBlocked("bot was blocked".to_string()))])
    }

    pub fn delivered(&self) -> Vec<i64> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageSender for ScriptedTelegram {
    async fn send_message(&self, chat_id: i64, _message: &TelegramMessage) -> Result<(), DeliveryError> {
        let scripted = {
            let mut script = self.script.lock().unwrap();
            match script.get_mut(&chat_id) {
                Some(results) if !results.is_empty() => results.remove(0),
                _ => Ok(()),
            }
        };
        if scripted.is_ok() {
            self.delivered.lock().unwrap().push(chat_id);
        }
        scripted
    }
}

/// Records every address it "sends" to.
#[derive(Default)]
pub struct RecordingEmail {
    sent: Mutex<Vec<String>>,
    rejected: HashSet<String>,
}

impl RecordingEmail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting(mut self, address: &str) -> Self {
        self.rejected.insert(address.to_string());
        self
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmailSender for RecordingEmail {
    async fn send_email(&self, to: &str, _message: &EmailMessage) -> Result<(), DeliveryError> {
        if self.rejected.contains(to) {
            return Err(DeliveryError::RecipientBlocked(format!("550 mailbox unavailable: {}", to)));
        }
        self.sent.lock().unwrap().push(to.to_string());
        Ok(())
    }
}

pub fn recipients(ids: &[i64]) -> Vec<RecipientIdentity> {
    ids.iter().map(|&id| RecipientIdentity::new(id)).collect()
}

pub fn email_recipients(addresses: &[(i64, &str)]) -> Vec<RecipientIdentity> {
    addresses
        .iter()
        .map(|&(id, address)| RecipientIdentity::new(id).with_email(address))
        .collect()
}

/// Everything a service test needs to inspect afterwards.
pub struct Harness {
    pub service: BroadcastService,
    pub users: Arc<InMemoryUserStore>,
    pub runs: Arc<InMemoryRunStore>,
    pub telegram: Arc<ScriptedTelegram>,
    pub email: Arc<RecordingEmail>,
}

impl Harness {
    pub fn new(users: InMemoryUserStore, telegram: ScriptedTelegram) -> Self {
        Self::with_email(users, telegram, RecordingEmail::new(), BroadcastSettings::unthrottled())
    }

    pub fn with_email(
        users: InMemoryUserStore,
        telegram: ScriptedTelegram,
        email: RecordingEmail,
        settings: BroadcastSettings,
    ) -> Self {
        let users = Arc::new(users);
        let runs = Arc::new(InMemoryRunStore::new());
        let telegram = Arc::new(telegram);
        let email = Arc::new(email);
        let service = BroadcastService::new(
            Arc::clone(&users) as Arc<dyn UserStore>,
            Arc::clone(&runs) as Arc<dyn RunStore>,
            Arc::clone(&telegram) as Arc<dyn MessageSender>,
            Some(Arc::clone(&email) as Arc<dyn EmailSender>),
            settings,
        );
        Self {
            service,
            users,
            runs,
            telegram,
            email,
        }
    }
}
