use crate::{database::ClientDatabase, events::EventDispatcher};
use std::sync::Arc;
use tasklist_core::{
    models::{now_millis, NewTask, Task, TaskChanges, TaskId, TaskPage, TaskQuery},
    SyncResult,
};

/// The only write path for tasks.
///
/// Every mutation commits the task change together with the sync queue entry
/// that will deliver it, then emits a task event.
pub struct MutationGateway {
    db: Arc<ClientDatabase>,
    events: Arc<EventDispatcher>,
}

impl MutationGateway {
    pub fn new(db: Arc<ClientDatabase>, events: Arc<EventDispatcher>) -> Self {
        Self { db, events }
    }

    pub async fn create(&self, new_task: NewTask) -> SyncResult<Task> {
        let task = new_task.into_task(now_millis())?;
        self.db.insert_task_and_enqueue(&task).await?;

        tracing::info!("CLIENT: Created task {} locally", task.id);
        self.events.emit_task_created(task.id, &task.title);
        Ok(task)
    }

    pub async fn update(&self, id: TaskId, changes: TaskChanges) -> SyncResult<Task> {
        let changes = changes.normalized()?;
        let task = self
            .db
            .update_task_and_enqueue(id, changes, now_millis())
            .await?;

        tracing::info!("CLIENT: Updated task {} locally", id);
        self.events.emit_task_updated(task.id, &task.title);
        Ok(task)
    }

    /// Returns the removed task.
    pub async fn delete(&self, id: TaskId) -> SyncResult<Task> {
        let removed = self.db.delete_task_and_enqueue(id, now_millis()).await?;

        tracing::info!("CLIENT: Deleted task {} locally", id);
        self.events.emit_task_deleted(id);
        Ok(removed)
    }

    pub async fn get(&self, id: TaskId) -> SyncResult<Task> {
        self.db.get_task(id).await
    }

    /// All tasks, most recently changed first.
    pub async fn list_all(&self) -> SyncResult<Vec<Task>> {
        self.db.list_tasks().await
    }

    pub async fn query(&self, query: &TaskQuery) -> SyncResult<TaskPage> {
        self.db.query_tasks(query).await
    }
}
