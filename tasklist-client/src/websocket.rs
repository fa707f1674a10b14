use crate::remote::RemoteService;
use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tasklist_core::{
    checksum::task_checksum,
    errors::ClientError,
    models::{Task, TaskId},
    protocol::{ClientMessage, ServerMessage},
    SyncResult,
};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use uuid::Uuid;

type PendingReplies = Arc<StdMutex<HashMap<Uuid, oneshot::Sender<ServerMessage>>>>;
type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// One live socket: a writer channel plus the replies it is still waiting for.
struct Connection {
    tx: mpsc::Sender<ClientMessage>,
    pending: PendingReplies,
    is_connected: Arc<AtomicBool>,
}

impl Connection {
    fn is_alive(&self) -> bool {
        self.is_connected.load(Ordering::Relaxed) && !self.tx.is_closed()
    }
}

/// [`RemoteService`] over the JSON WebSocket protocol.
///
/// The socket is opened on first use and re-opened on the next request after
/// it drops. Each request waits for the reply carrying its request id.
pub struct WebSocketRemote {
    server_url: String,
    connection: Mutex<Option<Connection>>,
    request_timeout: Duration,
    connect_attempts: usize,
}

impl WebSocketRemote {
    pub fn new(server_url: impl Into<String>, request_timeout: Duration) -> Self {
        Self {
            server_url: server_url.into(),
            connection: Mutex::new(None),
            request_timeout,
            connect_attempts: 3,
        }
    }

    pub fn with_connect_attempts(mut self, attempts: usize) -> Self {
        self.connect_attempts = attempts;
        self
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    pub async fn is_connected(&self) -> bool {
        self.connection
            .lock()
            .await
            .as_ref()
            .map(Connection::is_alive)
            .unwrap_or(false)
    }

    /// Heartbeat. The pong is only logged.
    pub async fn ping(&self) -> SyncResult<()> {
        let (tx, _) = self.sender().await?;
        tx.send(ClientMessage::Ping)
            .await
            .map_err(|_| ClientError::ConnectionLost)?;
        Ok(())
    }

    async fn connect_with_retry(&self) -> SyncResult<WsStream> {
        let backoff = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_secs(2))
            .with_max_times(self.connect_attempts)
            .with_jitter();

        let server_url = self.server_url.clone();
        let (ws_stream, _) = (|| async { connect_async(server_url.as_str()).await })
            .retry(backoff)
            .notify(|err, delay| {
                tracing::debug!(
                    "CLIENT: Connection to {} failed ({}), retrying in {:?}",
                    self.server_url,
                    err,
                    delay
                );
            })
            .await
            .map_err(|e| ClientError::WebSocket(e.to_string()))?;

        Ok(ws_stream)
    }

    async fn open(&self) -> SyncResult<Connection> {
        let ws_stream = self.connect_with_retry().await?;
        tracing::info!("CLIENT: Connected to {}", self.server_url);

        let (write, read) = ws_stream.split();
        let (tx_send, mut rx_send) = mpsc::channel::<ClientMessage>(100);
        let pending: PendingReplies = Arc::new(StdMutex::new(HashMap::new()));
        let is_connected = Arc::new(AtomicBool::new(true));

        // Writer task
        let is_connected_w = is_connected.clone();
        tokio::spawn(async move {
            let mut write = write;
            while let Some(msg) = rx_send.recv().await {
                let json = match serde_json::to_string(&msg) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::error!("CLIENT: Failed to encode {}: {}", msg.operation_type(), e);
                        continue;
                    }
                };
                if write.send(Message::Text(json)).await.is_err() {
                    is_connected_w.store(false, Ordering::Relaxed);
                    break;
                }
            }
            let _ = write.close().await;
        });

        // Reader task
        let is_connected_r = is_connected.clone();
        let pending_r = pending.clone();
        tokio::spawn(async move {
            let mut read = read;
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(server_msg) => dispatch_reply(&pending_r, server_msg),
                        Err(e) => tracing::warn!("CLIENT: Ignoring malformed server message: {}", e),
                    },
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => {}
                }
            }

            is_connected_r.store(false, Ordering::Relaxed);
            // Dropping the senders wakes every waiter with a closed channel
            if let Ok(mut pending) = pending_r.lock() {
                pending.clear();
            }
            tracing::warn!("CLIENT: WebSocket connection closed");
        });

        Ok(Connection {
            tx: tx_send,
            pending,
            is_connected,
        })
    }

    /// The live connection's writer and reply map, connecting if needed.
    async fn sender(&self) -> SyncResult<(mpsc::Sender<ClientMessage>, PendingReplies)> {
        let mut connection = self.connection.lock().await;
        if let Some(conn) = connection.as_ref() {
            if conn.is_alive() {
                return Ok((conn.tx.clone(), conn.pending.clone()));
            }
            tracing::info!("CLIENT: Reconnecting to {}", self.server_url);
        }

        let conn = self.open().await?;
        let handles = (conn.tx.clone(), conn.pending.clone());
        *connection = Some(conn);
        Ok(handles)
    }

    async fn request(&self, message: ClientMessage) -> SyncResult<ServerMessage> {
        let request_id = message
            .request_id()
            .ok_or_else(|| ClientError::UnexpectedResponse("message has no request id".into()))?;

        let (tx, pending) = self.sender().await?;
        let (reply_tx, reply_rx) = oneshot::channel();
        pending
            .lock()
            .map_err(|_| ClientError::LockError("pending replies".into()))?
            .insert(request_id, reply_tx);

        tracing::debug!("CLIENT: Sending {} request {}", message.operation_type(), request_id);
        if tx.send(message).await.is_err() {
            forget(&pending, request_id);
            return Err(ClientError::ConnectionLost.into());
        }

        match tokio::time::timeout(self.request_timeout, reply_rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(ClientError::ConnectionLost.into()),
            Err(_) => {
                forget(&pending, request_id);
                Err(ClientError::Timeout(self.request_timeout).into())
            }
        }
    }
}

fn dispatch_reply(pending: &PendingReplies, message: ServerMessage) {
    match message.request_id() {
        Some(request_id) => {
            let waiter = pending.lock().ok().and_then(|mut p| p.remove(&request_id));
            match waiter {
                Some(waiter) => {
                    let _ = waiter.send(message);
                }
                None => tracing::debug!("CLIENT: No waiter for reply {}", request_id),
            }
        }
        None => match message {
            ServerMessage::Error { code, message } => {
                tracing::warn!("CLIENT: Server error {:?}: {}", code, message)
            }
            ServerMessage::Pong => tracing::debug!("CLIENT: Pong"),
            _ => {}
        },
    }
}

fn forget(pending: &PendingReplies, request_id: Uuid) {
    if let Ok(mut pending) = pending.lock() {
        pending.remove(&request_id);
    }
}

fn expect_ack(reply: ServerMessage) -> SyncResult<()> {
    match reply {
        ServerMessage::Ack { .. } => Ok(()),
        ServerMessage::Rejected { code, reason, .. } => {
            Err(ClientError::Rejected { code, reason }.into())
        }
        other => Err(ClientError::UnexpectedResponse(format!("{:?}", other)).into()),
    }
}

#[async_trait]
impl RemoteService for WebSocketRemote {
    async fn upsert(&self, task: &Task) -> SyncResult<()> {
        let checksum = task_checksum(task)?;
        let reply = self
            .request(ClientMessage::UpsertTask {
                request_id: Uuid::new_v4(),
                task: task.clone(),
                checksum,
            })
            .await?;
        expect_ack(reply)
    }

    async fn delete(&self, id: TaskId) -> SyncResult<()> {
        let reply = self
            .request(ClientMessage::DeleteTask {
                request_id: Uuid::new_v4(),
                task_id: id,
            })
            .await?;
        expect_ack(reply)
    }

    async fn fetch_all(&self) -> SyncResult<Vec<Task>> {
        let reply = self
            .request(ClientMessage::ListTasks {
                request_id: Uuid::new_v4(),
            })
            .await?;
        match reply {
            ServerMessage::TaskList { tasks, .. } => Ok(tasks),
            ServerMessage::Rejected { code, reason, .. } => {
                Err(ClientError::Rejected { code, reason }.into())
            }
            other => Err(ClientError::UnexpectedResponse(format!("{:?}", other)).into()),
        }
    }
}
