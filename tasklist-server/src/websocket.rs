use crate::{sync_handler::SyncHandler, AppState};
use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tasklist_core::protocol::ServerMessage;
use uuid::Uuid;

pub async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    let connection_id = Uuid::new_v4();
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = tokio::sync::mpsc::channel::<ServerMessage>(100);

    let _connection = state.track_connection();
    tracing::info!(%connection_id, "Client connected");

    // Forward replies to the socket
    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!("Failed to serialize server message: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    let handler = SyncHandler::new(state.store.clone(), tx);

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if let Err(e) = handler.handle_text(&text).await {
                    tracing::error!("Error handling message: {}", e);
                    break;
                }
            }
            Ok(Message::Close(_)) => break,
            // Ping/pong frames are answered by axum
            Ok(_) => {}
            Err(e) => {
                tracing::debug!("WebSocket receive error: {}", e);
                break;
            }
        }
    }

    // Dropping the last sender lets the writer flush and exit
    drop(handler);
    let _ = writer.await;
    tracing::info!(%connection_id, "Client disconnected");
}
