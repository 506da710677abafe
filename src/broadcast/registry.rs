//! Process-wide table of in-flight broadcast runs.
//!
//! Each entry owns the run's cancellation token and a completion signal.
//! Finished entries linger for a grace period so late stop requests get a
//! consistent `false`, then they are purged.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::broadcast::model::RunStatus;
use crate::core::metrics;

struct RegistryEntry {
    cancel: CancellationToken,
    /// `Some` once the coordinator finalized the run
    done: watch::Sender<Option<RunStatus>>,
    finished_at: Option<Instant>,
}

impl RegistryEntry {
    fn is_live(&self) -> bool {
        self.finished_at.is_none()
    }
}

pub struct BroadcastRegistry {
    entries: Mutex<HashMap<i64, RegistryEntry>>,
    grace: Duration,
}

impl BroadcastRegistry {
    pub fn new(grace: Duration) -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(HashMap::new()),
            grace,
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<i64, RegistryEntry>> {
        // Entries stay consistent even if a holder panicked; nothing is held across awaits.
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Broadcast registry lock was poisoned, recovering...");
                poisoned.into_inner()
            }
        }
    }

    /// Registers `run_id` and spawns its coordinator.
    ///
    /// `make_task` receives the run's cancellation token. Returns `false`
    /// without spawning when the id is already live.
    pub fn start<F, Fut>(self: &Arc<Self>, run_id: i64, make_task: F) -> bool
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = RunStatus> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        {
            let mut entries = self.lock();
            self.purge_expired(&mut entries);
            if entries.get(&run_id).is_some_and(RegistryEntry::is_live) {
                log::warn!("Broadcast run {} is already running", run_id);
                return false;
            }
            let (done, _) = watch::channel(None);
            entries.insert(
                run_id,
                RegistryEntry {
                    cancel: cancel.clone(),
                    done,
                    finished_at: None,
                },
            );
        }

        metrics::BROADCAST_RUNS_ACTIVE.inc();
        let task = tokio::spawn(make_task(cancel));
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let status = match task.await {
                Ok(status) => status,
                Err(e) => {
                    log::error!("Broadcast run {} coordinator crashed: {}", run_id, e);
                    RunStatus::Failed
                }
            };
            registry.finish(run_id, status);
        });
        true
    }

    /// Signals a live run to stop. Never waits for it.
    ///
    /// Returns `true` while the run is live (for every caller, the first
    /// one flips the token), `false` for unknown or finished runs.
    pub fn request_stop(&self, run_id: i64) -> bool {
        let entries = self.lock();
        match entries.get(&run_id) {
            Some(entry) if entry.is_live() => {
                if !entry.cancel.is_cancelled() {
                    log::info!("Stop requested for broadcast run {}", run_id);
                    entry.cancel.cancel();
                }
                true
            }
            _ => false,
        }
    }

    pub fn is_active(&self, run_id: i64) -> bool {
        self.lock().get(&run_id).is_some_and(RegistryEntry::is_live)
    }

    /// Live and already asked to stop.
    pub fn is_stopping(&self, run_id: i64) -> bool {
        self.lock()
            .get(&run_id)
            .is_some_and(|entry| entry.is_live() && entry.cancel.is_cancelled())
    }

    /// Waits until `run_id` is finalized and returns its terminal status.
    ///
    /// `None` when the registry does not know the run (never started here,
    /// or already purged).
    pub async fn wait(&self, run_id: i64) -> Option<RunStatus> {
        let mut rx = {
            let entries = self.lock();
            entries.get(&run_id)?.done.subscribe()
        };
        let status = match rx.wait_for(Option::is_some).await {
            Ok(status) => *status,
            Err(_) => None,
        };
        status
    }

    /// Cancels every live run, e.g. on process shutdown.
    pub fn stop_all(&self) -> usize {
        let entries = self.lock();
        let mut signaled = 0;
        for entry in entries.values().filter(|entry| entry.is_live()) {
            entry.cancel.cancel();
            signaled += 1;
        }
        signaled
    }

    fn finish(&self, run_id: i64, status: RunStatus) {
        let mut entries = self.lock();
        if let Some(entry) = entries.get_mut(&run_id) {
            if entry.is_live() {
                entry.finished_at = Some(Instant::now());
                entry.done.send_replace(Some(status));
                metrics::BROADCAST_RUNS_ACTIVE.dec();
            }
        }
        self.purge_expired(&mut entries);
    }

    fn purge_expired(&self, entries: &mut HashMap<i64, RegistryEntry>) {
        let now = Instant::now();
        let grace = self.grace;
        entries.retain(|_, entry| match entry.finished_at {
            Some(at) => now.duration_since(at) < grace,
            None => true,
        });
    }
}
