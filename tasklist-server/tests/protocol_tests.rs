mod common;

use chrono::NaiveDate;
use common::{spawn_server, wait_until};
use std::time::Duration;
use futures_util::{SinkExt, StreamExt};
use tasklist_core::{
    checksum::task_checksum,
    models::Task,
    protocol::{ClientMessage, ErrorCode, ServerMessage},
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use uuid::Uuid;

type Socket =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

fn task(id: i64, title: &str) -> Task {
    Task {
        id,
        title: title.to_string(),
        completed: false,
        date: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
        display_tint: Some("hsla(120, 60%, 85%, 0.6)".to_string()),
        last_updated: 1_000,
        is_synced: false,
    }
}

async fn send(socket: &mut Socket, msg: &ClientMessage) -> anyhow::Result<()> {
    socket
        .send(Message::Text(serde_json::to_string(msg)?))
        .await?;
    Ok(())
}

async fn recv(socket: &mut Socket) -> anyhow::Result<ServerMessage> {
    loop {
        match socket.next().await {
            Some(Ok(Message::Text(text))) => return Ok(serde_json::from_str(&text)?),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
            None => anyhow::bail!("socket closed"),
        }
    }
}

#[tokio::test]
async fn test_upsert_round_trip_over_socket() -> anyhow::Result<()> {
    let server = spawn_server().await?;
    let (mut socket, _) = connect_async(server.ws_url()).await?;

    let request_id = Uuid::new_v4();
    let task = task(1, "Buy milk");
    send(
        &mut socket,
        &ClientMessage::UpsertTask {
            request_id,
            checksum: task_checksum(&task)?,
            task: task.clone(),
        },
    )
    .await?;

    match recv(&mut socket).await? {
        ServerMessage::Ack { request_id: id } => assert_eq!(id, request_id),
        other => panic!("unexpected reply: {:?}", other),
    }
    let stored = server.state.store.get(1).unwrap();
    assert_eq!(stored.display_tint, task.display_tint);
    assert_eq!(server.state.connection_count(), 1);

    send(&mut socket, &ClientMessage::Ping).await?;
    assert!(matches!(recv(&mut socket).await?, ServerMessage::Pong));

    socket.close(None).await?;
    let state = server.state.clone();
    assert!(
        wait_until(Duration::from_secs(2), || {
            let state = state.clone();
            async move { state.connection_count() == 0 }
        })
        .await
    );
    Ok(())
}

#[tokio::test]
async fn test_tampered_payload_is_rejected() -> anyhow::Result<()> {
    let server = spawn_server().await?;
    let (mut socket, _) = connect_async(server.ws_url()).await?;

    let original = task(1, "Buy milk");
    let mut tampered = original.clone();
    tampered.title = "Buy whisky".to_string();

    send(
        &mut socket,
        &ClientMessage::UpsertTask {
            request_id: Uuid::new_v4(),
            checksum: task_checksum(&original)?,
            task: tampered,
        },
    )
    .await?;

    match recv(&mut socket).await? {
        ServerMessage::Rejected { code, .. } => assert_eq!(code, ErrorCode::ChecksumMismatch),
        other => panic!("unexpected reply: {:?}", other),
    }
    assert!(server.state.store.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_malformed_frame_keeps_connection_open() -> anyhow::Result<()> {
    let server = spawn_server().await?;
    let (mut socket, _) = connect_async(server.ws_url()).await?;

    socket.send(Message::Text("not json".to_string())).await?;
    match recv(&mut socket).await? {
        ServerMessage::Error { code, .. } => assert_eq!(code, ErrorCode::MalformedMessage),
        other => panic!("unexpected reply: {:?}", other),
    }

    send(&mut socket, &ClientMessage::Ping).await?;
    assert!(matches!(recv(&mut socket).await?, ServerMessage::Pong));
    Ok(())
}
