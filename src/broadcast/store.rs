use async_trait::async_trait;

use crate::broadcast::model::{BroadcastRun, NewRun, Pagination, RunUpdate};
use crate::storage::StoreError;

/// Persisted broadcast run records.
///
/// The coordinator is the only writer of a run once it has started;
/// `update` applies only the fields that are `Some`.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn create(&self, run: NewRun) -> Result<i64, StoreError>;

    async fn update(&self, id: i64, update: RunUpdate) -> Result<(), StoreError>;

    async fn get(&self, id: i64) -> Result<Option<BroadcastRun>, StoreError>;

    /// Newest first.
    async fn list(&self, page: Pagination) -> Result<Vec<BroadcastRun>, StoreError>;

    /// Marks runs left non-terminal by a previous process as failed.
    /// Returns how many were touched.
    async fn fail_interrupted(&self) -> Result<usize, StoreError>;
}
