use crate::models::{Task, TaskId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    // Create and update both travel as a full-record upsert
    UpsertTask {
        request_id: Uuid,
        task: Task,
        checksum: String,
    },
    DeleteTask {
        request_id: Uuid,
        task_id: TaskId,
    },

    // Initial load of an empty local store
    ListTasks {
        request_id: Uuid,
    },

    // Heartbeat
    Ping,
}

impl ClientMessage {
    pub fn request_id(&self) -> Option<Uuid> {
        match self {
            ClientMessage::UpsertTask { request_id, .. }
            | ClientMessage::DeleteTask { request_id, .. }
            | ClientMessage::ListTasks { request_id } => Some(*request_id),
            ClientMessage::Ping => None,
        }
    }

    pub fn operation_type(&self) -> &'static str {
        match self {
            ClientMessage::UpsertTask { .. } => "upsert",
            ClientMessage::DeleteTask { .. } => "delete",
            ClientMessage::ListTasks { .. } => "list",
            ClientMessage::Ping => "ping",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Ack {
        request_id: Uuid,
    },
    TaskList {
        request_id: Uuid,
        tasks: Vec<Task>,
    },
    Rejected {
        request_id: Uuid,
        code: ErrorCode,
        reason: String,
    },

    // Messages that could not be tied to a request
    Error {
        code: ErrorCode,
        message: String,
    },

    // Heartbeat
    Pong,
}

impl ServerMessage {
    pub fn request_id(&self) -> Option<Uuid> {
        match self {
            ServerMessage::Ack { request_id }
            | ServerMessage::TaskList { request_id, .. }
            | ServerMessage::Rejected { request_id, .. } => Some(*request_id),
            ServerMessage::Error { .. } | ServerMessage::Pong => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidTask,
    ChecksumMismatch,
    MalformedMessage,
    ServerError,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_message_wire_format() {
        let request_id = Uuid::new_v4();
        let msg = ClientMessage::DeleteTask {
            request_id,
            task_id: 17,
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "delete_task");
        assert_eq!(value["task_id"], 17);
        assert_eq!(msg.request_id(), Some(request_id));
        assert_eq!(msg.operation_type(), "delete");
        assert_eq!(ClientMessage::Ping.request_id(), None);
    }

    #[test]
    fn test_server_message_parsing() {
        let request_id = Uuid::new_v4();
        let raw = json!({
            "type": "rejected",
            "request_id": request_id,
            "code": "checksum_mismatch",
            "reason": "payload corrupted"
        });
        let msg: ServerMessage = serde_json::from_value(raw).unwrap();
        assert_eq!(msg.request_id(), Some(request_id));
        match msg {
            ServerMessage::Rejected { code, .. } => assert_eq!(code, ErrorCode::ChecksumMismatch),
            other => panic!("unexpected message: {:?}", other),
        }

        let pong: ServerMessage = serde_json::from_str(r#"{"type":"pong"}"#).unwrap();
        assert!(matches!(pong, ServerMessage::Pong));
        assert_eq!(pong.request_id(), None);
    }
}
