use async_trait::async_trait;
use tasklist_core::{
    models::{Task, TaskId},
    SyncResult,
};

/// The remote task service the sync engine delivers queued mutations to.
///
/// Any `Err` is treated as a delivery failure for the entry being sent.
#[async_trait]
pub trait RemoteService: Send + Sync {
    /// Create or replace a task by id.
    async fn upsert(&self, task: &Task) -> SyncResult<()>;

    /// Remove a task. Removing an unknown id succeeds.
    async fn delete(&self, id: TaskId) -> SyncResult<()>;

    /// Every task the remote currently holds.
    async fn fetch_all(&self) -> SyncResult<Vec<Task>>;
}
