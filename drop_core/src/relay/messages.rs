//! Signaling wire format: `{"event": ..., "data": ...}` JSON text frames

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Depth of each connection's outbound queue
pub const OUTBOUND_QUEUE_SIZE: usize = 64;

/// Keep-alive ping period for relay sockets
pub const PING_INTERVAL_SECS: u64 = 15;

/// Messages from a participant to the relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Join the room with this code
    JoinRoom(String),
    Signal(SignalEnvelope),
}

/// Signal addressed to the other member of a room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalEnvelope {
    pub room_code: String,
    /// Forwarded verbatim, never inspected by the relay
    pub data: Value,
}

/// Messages from the relay to a participant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerMessage {
    PeerConnected,
    PeerDisconnected,
    Signal(Value),
    RoomFull(String),
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DescriptorKind {
    Offer,
    Answer,
}

/// Session descriptor exchanged during connection establishment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    #[serde(rename = "type")]
    pub kind: DescriptorKind,
    pub sdp: String,
}

/// Connectivity candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub candidate: String,
}

/// Payload peers put in `signal.data`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp: Option<Descriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate: Option<Candidate>,
}

impl SignalData {
    pub fn descriptor(descriptor: Descriptor) -> Self {
        Self {
            sdp: Some(descriptor),
            candidate: None,
        }
    }

    pub fn candidate(candidate: impl Into<String>) -> Self {
        Self {
            sdp: None,
            candidate: Some(Candidate {
                candidate: candidate.into(),
            }),
        }
    }
}
