use crate::store::TaskStore;
use std::sync::Arc;
use tasklist_core::{
    checksum::verify_checksum,
    errors::ServerError,
    models::Task,
    protocol::{ClientMessage, ErrorCode, ServerMessage},
    SyncResult,
};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Per-connection message handler. Replies go out through `tx`.
pub struct SyncHandler {
    store: Arc<TaskStore>,
    tx: mpsc::Sender<ServerMessage>,
}

impl SyncHandler {
    pub fn new(store: Arc<TaskStore>, tx: mpsc::Sender<ServerMessage>) -> Self {
        Self { store, tx }
    }

    /// Entry point for raw text frames.
    pub async fn handle_text(&self, text: &str) -> SyncResult<()> {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(msg) => self.handle_message(msg).await,
            Err(e) => {
                tracing::warn!("Failed to parse client message: {}", e);
                self.send(ServerMessage::Error {
                    code: ErrorCode::MalformedMessage,
                    message: e.to_string(),
                })
                .await
            }
        }
    }

    pub async fn handle_message(&self, msg: ClientMessage) -> SyncResult<()> {
        tracing::debug!(op = msg.operation_type(), "Received client message");

        match msg {
            ClientMessage::UpsertTask {
                request_id,
                task,
                checksum,
            } => self.handle_upsert(request_id, task, &checksum).await,
            ClientMessage::DeleteTask {
                request_id,
                task_id,
            } => {
                if self.store.delete(task_id) {
                    tracing::info!("Deleted task {}", task_id);
                } else {
                    tracing::debug!("Delete for unknown task {} acknowledged", task_id);
                }
                self.send(ServerMessage::Ack { request_id }).await
            }
            ClientMessage::ListTasks { request_id } => {
                let tasks = self.store.list();
                tracing::debug!("Sending {} tasks", tasks.len());
                self.send(ServerMessage::TaskList { request_id, tasks }).await
            }
            ClientMessage::Ping => self.send(ServerMessage::Pong).await,
        }
    }

    async fn handle_upsert(&self, request_id: Uuid, task: Task, checksum: &str) -> SyncResult<()> {
        if !verify_checksum(&task, checksum)? {
            tracing::warn!("Checksum mismatch for task {}", task.id);
            return self
                .reject(request_id, ErrorCode::ChecksumMismatch, "payload checksum mismatch")
                .await;
        }

        if let Err(e) = task.validate() {
            tracing::warn!("Rejected task {}: {}", task.id, e);
            return self
                .reject(request_id, ErrorCode::InvalidTask, &e.to_string())
                .await;
        }

        let id = task.id;
        if self.store.upsert(task) {
            tracing::info!("Created task {}", id);
        } else {
            tracing::info!("Updated task {}", id);
        }
        self.send(ServerMessage::Ack { request_id }).await
    }

    async fn reject(&self, request_id: Uuid, code: ErrorCode, reason: &str) -> SyncResult<()> {
        self.send(ServerMessage::Rejected {
            request_id,
            code,
            reason: reason.to_string(),
        })
        .await
    }

    async fn send(&self, msg: ServerMessage) -> SyncResult<()> {
        self.tx
            .send(msg)
            .await
            .map_err(|_| ServerError::ServerSync("connection closed".to_string()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tasklist_core::checksum::task_checksum;

    fn task(id: i64, title: &str) -> Task {
        Task {
            id,
            title: title.to_string(),
            completed: false,
            date: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            display_tint: None,
            last_updated: 1_000,
            is_synced: false,
        }
    }

    fn handler() -> (SyncHandler, Arc<TaskStore>, mpsc::Receiver<ServerMessage>) {
        let store = Arc::new(TaskStore::new());
        let (tx, rx) = mpsc::channel(16);
        (SyncHandler::new(store.clone(), tx), store, rx)
    }

    fn upsert(task: Task) -> (Uuid, ClientMessage) {
        let request_id = Uuid::new_v4();
        let checksum = task_checksum(&task).unwrap();
        (
            request_id,
            ClientMessage::UpsertTask {
                request_id,
                task,
                checksum,
            },
        )
    }

    #[tokio::test]
    async fn test_upsert_is_acked_and_stored() {
        let (handler, store, mut rx) = handler();
        let (request_id, msg) = upsert(task(1, "Buy milk"));

        handler.handle_message(msg).await.unwrap();

        match rx.recv().await.unwrap() {
            ServerMessage::Ack { request_id: id } => assert_eq!(id, request_id),
            other => panic!("unexpected reply: {:?}", other),
        }
        assert_eq!(store.get(1).unwrap().title, "Buy milk");
    }

    #[tokio::test]
    async fn test_checksum_mismatch_is_rejected() {
        let (handler, store, mut rx) = handler();
        let request_id = Uuid::new_v4();
        let msg = ClientMessage::UpsertTask {
            request_id,
            task: task(1, "Buy milk"),
            checksum: "0".repeat(64),
        };

        handler.handle_message(msg).await.unwrap();

        match rx.recv().await.unwrap() {
            ServerMessage::Rejected { code, .. } => assert_eq!(code, ErrorCode::ChecksumMismatch),
            other => panic!("unexpected reply: {:?}", other),
        }
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_empty_title_is_rejected() {
        let (handler, store, mut rx) = handler();
        let (_, msg) = upsert(task(1, "  "));

        handler.handle_message(msg).await.unwrap();

        match rx.recv().await.unwrap() {
            ServerMessage::Rejected { code, .. } => assert_eq!(code, ErrorCode::InvalidTask),
            other => panic!("unexpected reply: {:?}", other),
        }
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_delete_of_unknown_task_is_acked() {
        let (handler, _store, mut rx) = handler();
        let request_id = Uuid::new_v4();

        handler
            .handle_message(ClientMessage::DeleteTask {
                request_id,
                task_id: 99,
            })
            .await
            .unwrap();

        assert!(matches!(rx.recv().await.unwrap(), ServerMessage::Ack { .. }));
    }

    #[tokio::test]
    async fn test_list_and_ping() {
        let (handler, store, mut rx) = handler();
        store.upsert(task(1, "One"));
        store.upsert(task(2, "Two"));

        handler
            .handle_message(ClientMessage::ListTasks {
                request_id: Uuid::new_v4(),
            })
            .await
            .unwrap();
        match rx.recv().await.unwrap() {
            ServerMessage::TaskList { tasks, .. } => assert_eq!(tasks.len(), 2),
            other => panic!("unexpected reply: {:?}", other),
        }

        handler.handle_message(ClientMessage::Ping).await.unwrap();
        assert!(matches!(rx.recv().await.unwrap(), ServerMessage::Pong));
    }

    #[tokio::test]
    async fn test_malformed_text_gets_error_reply() {
        let (handler, _store, mut rx) = handler();

        handler.handle_text("{\"type\":\"teleport\"}").await.unwrap();

        match rx.recv().await.unwrap() {
            ServerMessage::Error { code, .. } => assert_eq!(code, ErrorCode::MalformedMessage),
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_send_after_close_is_an_error() {
        let (handler, _store, rx) = handler();
        drop(rx);
        assert!(handler.handle_message(ClientMessage::Ping).await.is_err());
    }
}
