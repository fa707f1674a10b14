use dashmap::DashMap;
use tasklist_core::models::{Task, TaskId};

/// In-memory authoritative copy of every task the clients have pushed.
#[derive(Debug, Default)]
pub struct TaskStore {
    tasks: DashMap<TaskId, Task>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace by id. Returns true when the task was not known before.
    pub fn upsert(&self, mut task: Task) -> bool {
        // Anything the server holds is confirmed
        task.is_synced = true;
        self.tasks.insert(task.id, task).is_none()
    }

    /// Deleting an unknown id is not an error; returns whether anything was removed.
    pub fn delete(&self, id: TaskId) -> bool {
        self.tasks.remove(&id).is_some()
    }

    pub fn get(&self, id: TaskId) -> Option<Task> {
        self.tasks.get(&id).map(|entry| entry.value().clone())
    }

    /// Newest first, ties broken by id.
    pub fn list(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.tasks.iter().map(|entry| entry.value().clone()).collect();
        tasks.sort_by(|a, b| {
            b.last_updated
                .cmp(&a.last_updated)
                .then_with(|| a.id.cmp(&b.id))
        });
        tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn task(id: TaskId, title: &str, last_updated: i64) -> Task {
        Task {
            id,
            title: title.to_string(),
            completed: false,
            date: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            display_tint: None,
            last_updated,
            is_synced: false,
        }
    }

    #[test]
    fn test_upsert_replaces_by_id() {
        let store = TaskStore::new();
        assert!(store.upsert(task(1, "Buy milk", 10)));
        assert!(!store.upsert(task(1, "Buy oat milk", 20)));

        assert_eq!(store.len(), 1);
        let stored = store.get(1).unwrap();
        assert_eq!(stored.title, "Buy oat milk");
        assert!(stored.is_synced);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let store = TaskStore::new();
        store.upsert(task(1, "Buy milk", 10));
        assert!(store.delete(1));
        assert!(!store.delete(1));
        assert!(store.is_empty());
        assert!(store.get(1).is_none());
    }

    #[test]
    fn test_list_is_newest_first() {
        let store = TaskStore::new();
        store.upsert(task(1, "Old", 10));
        store.upsert(task(2, "New", 30));
        store.upsert(task(3, "Middle", 20));

        let ids: Vec<TaskId> = store.list().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![2, 3, 1]);
    }
}
