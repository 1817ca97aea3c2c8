//! WebSocket connection handler

use super::messages::{ClientMessage, OUTBOUND_QUEUE_SIZE, PING_INTERVAL_SECS, ServerMessage};
use super::state::RelayState;
use crate::registry::MemberId;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, interval_at};

/// Serve one participant until its socket closes
pub async fn handle_socket(socket: WebSocket, state: Arc<RelayState>, client_ip: String) {
    let (sink, mut stream) = socket.split();
    let member = MemberId::new();
    let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_SIZE);

    tracing::info!("Relay connection {} from {}", member, client_ip);
    let evicted = state.register(member, tx.clone()).await;

    let writer = tokio::spawn(write_loop(sink, rx, member));

    loop {
        let msg = tokio::select! {
            _ = evicted.cancelled() => {
                tracing::warn!("Closing {}: client is not reading its messages", member);
                break;
            }
            msg = stream.next() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };

        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(text.as_str()) {
                Ok(ClientMessage::JoinRoom(code)) => state.on_join_room(member, &code).await,
                Ok(ClientMessage::Signal(envelope)) => state.on_signal(member, envelope).await,
                Err(e) => {
                    tracing::warn!("Malformed message from {}: {}", member, e);
                    reply(&tx, ServerMessage::Error(format!("malformed message: {}", e)));
                }
            },
            Ok(Message::Binary(_)) => {
                reply(&tx, ServerMessage::Error("binary frames are not supported".to_string()));
            }
            Ok(Message::Close(_)) => {
                tracing::debug!("Member {} closed the socket", member);
                break;
            }
            Ok(_) => {
                // Ping/Pong handled by axum
            }
            Err(e) => {
                tracing::warn!("WebSocket error from {}: {}", member, e);
                break;
            }
        }
    }

    state.on_disconnect(member).await;
    drop(tx);
    if evicted.is_cancelled() {
        // The writer may be stuck on a client that stopped reading
        writer.abort();
    }
    let _ = writer.await;
    tracing::info!("Relay connection {} closed", member);
}

fn reply(tx: &mpsc::Sender<ServerMessage>, msg: ServerMessage) {
    if let Err(e) = tx.try_send(msg) {
        tracing::warn!("Dropping reply: {}", e);
    }
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<ServerMessage>,
    member: MemberId,
) {
    let period = Duration::from_secs(PING_INTERVAL_SECS);
    let mut ping = interval_at(Instant::now() + period, period);

    loop {
        tokio::select! {
            msg = rx.recv() => {
                let Some(msg) = msg else { break };
                let json = match serde_json::to_string(&msg) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::error!("Failed to encode {:?}: {}", msg, e);
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(json.into())).await {
                    tracing::debug!("Send to {} failed: {}", member, e);
                    break;
                }
            }
            _ = ping.tick() => {
                if let Err(e) = sink.send(Message::Ping(Bytes::new())).await {
                    tracing::debug!("Ping to {} failed: {}", member, e);
                    break;
                }
            }
        }
    }

    let _ = sink.close().await;
}
