//! WebSocket client for the rendezvous relay

use anyhow::{Context, Result, bail};
use drop_core::relay::{ClientMessage, ServerMessage, SignalData, SignalEnvelope};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::event::PeerEvent;

/// Connection to the relay for one room
pub struct SignalingClient {
    room_code: String,
    outbound: mpsc::UnboundedSender<ClientMessage>,
    shutdown: CancellationToken,
    reader: JoinHandle<()>,
}

impl SignalingClient {
    /// Connect to `url` (`ws://host:port/ws`). Relay messages for this client
    /// are translated into `PeerEvent`s on `events`.
    pub async fn connect(
        url: &str,
        room_code: &str,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Self> {
        let url = Url::parse(url).with_context(|| format!("Invalid relay URL: {}", url))?;
        if url.scheme() != "ws" {
            bail!("Unsupported relay scheme '{}', expected ws://", url.scheme());
        }

        info!("Connecting to relay {}", url);
        let (ws, _) = connect_async(url.as_str())
            .await
            .with_context(|| format!("Failed to connect to relay {}", url))?;
        let (mut write, mut read) = ws.split();

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<ClientMessage>();
        let shutdown = CancellationToken::new();

        let writer_shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                let msg = tokio::select! {
                    _ = writer_shutdown.cancelled() => break,
                    msg = outbound_rx.recv() => match msg {
                        Some(msg) => msg,
                        None => break,
                    },
                };
                let json = match serde_json::to_string(&msg) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!("Failed to encode {:?}: {}", msg, e);
                        continue;
                    }
                };
                if let Err(e) = write.send(Message::Text(json.into())).await {
                    warn!("Relay send failed: {}", e);
                    break;
                }
            }
            let _ = write.close().await;
        });

        let reader_shutdown = shutdown.clone();
        let reader = tokio::spawn(async move {
            loop {
                let msg = tokio::select! {
                    _ = reader_shutdown.cancelled() => break,
                    msg = read.next() => msg,
                };
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ServerMessage>(text.as_str()) {
                            Ok(msg) => {
                                for event in translate(msg) {
                                    if events.send(event).is_err() {
                                        return;
                                    }
                                }
                            }
                            Err(e) => warn!("Ignoring unknown relay message: {}", e),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("Relay closed the connection");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("Relay connection error: {}", e);
                        break;
                    }
                }
            }
            let _ = events.send(PeerEvent::RelayClosed);
        });

        Ok(Self {
            room_code: room_code.to_string(),
            outbound,
            shutdown,
            reader,
        })
    }

    pub fn room_code(&self) -> &str {
        &self.room_code
    }

    pub fn join_room(&self) -> Result<()> {
        info!("Joining room {}", self.room_code);
        self.send(ClientMessage::JoinRoom(self.room_code.clone()))
    }

    pub fn send_signal(&self, data: &SignalData) -> Result<()> {
        let envelope = SignalEnvelope {
            room_code: self.room_code.clone(),
            data: serde_json::to_value(data)?,
        };
        self.send(ClientMessage::Signal(envelope))
    }

    /// Leave the relay; the other member gets `peer-disconnected`
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled() || self.reader.is_finished()
    }

    fn send(&self, msg: ClientMessage) -> Result<()> {
        if self.shutdown.is_cancelled() {
            bail!("Relay connection closed");
        }
        self.outbound
            .send(msg)
            .map_err(|_| anyhow::anyhow!("Relay connection closed"))
    }
}

impl Drop for SignalingClient {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Relay message -> connection events. A signal may carry both a descriptor
/// and a candidate.
fn translate(msg: ServerMessage) -> Vec<PeerEvent> {
    match msg {
        ServerMessage::PeerConnected => vec![PeerEvent::Paired],
        ServerMessage::PeerDisconnected => vec![PeerEvent::PeerDisconnected],
        ServerMessage::RoomFull(code) => vec![PeerEvent::RoomFull(code)],
        ServerMessage::Error(message) => vec![PeerEvent::RelayError(message)],
        ServerMessage::Signal(value) => match serde_json::from_value::<SignalData>(value) {
            Ok(data) => {
                let mut events = Vec::new();
                if let Some(descriptor) = data.sdp {
                    events.push(PeerEvent::Descriptor(descriptor));
                }
                if let Some(candidate) = data.candidate {
                    events.push(PeerEvent::Candidate(candidate.candidate));
                }
                if events.is_empty() {
                    debug!("Empty signal ignored");
                }
                events
            }
            Err(e) => {
                warn!("Skipping signal with unknown shape: {}", e);
                Vec::new()
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drop_core::relay::{Descriptor, DescriptorKind};
    use serde_json::json;

    #[test]
    fn test_translate_signal() {
        let data = SignalData {
            sdp: Some(Descriptor {
                kind: DescriptorKind::Answer,
                sdp: "abc".into(),
            }),
            candidate: Some(drop_core::relay::Candidate {
                candidate: "tcp 127.0.0.1:1".into(),
            }),
        };
        let events = translate(ServerMessage::Signal(serde_json::to_value(data).unwrap()));
        assert!(matches!(&events[0], PeerEvent::Descriptor(d) if d.sdp == "abc"));
        assert!(matches!(&events[1], PeerEvent::Candidate(c) if c == "tcp 127.0.0.1:1"));
    }

    #[test]
    fn test_translate_unknown_signal_is_skipped() {
        let events = translate(ServerMessage::Signal(json!({"sdp": {"type": "pranswer"}})));
        assert!(events.is_empty());

        let events = translate(ServerMessage::Signal(json!({"other": 1})));
        assert!(events.is_empty());
    }

    #[test]
    fn test_translate_membership() {
        assert!(matches!(translate(ServerMessage::PeerConnected)[0], PeerEvent::Paired));
        assert!(matches!(
            translate(ServerMessage::RoomFull("1".into()))[0],
            PeerEvent::RoomFull(_)
        ));
    }

    #[tokio::test]
    async fn test_rejects_non_ws_url() {
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(SignalingClient::connect("http://127.0.0.1:1/ws", "1", tx.clone()).await.is_err());
        assert!(SignalingClient::connect("not a url", "1", tx).await.is_err());
    }
}
