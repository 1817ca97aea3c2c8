use crate::FileMetadata;
use crate::channel::{ChannelMessage, ChannelSender};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::TransferError;

/// Control messages exchanged on the direct channel (JSON text frames)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ControlMessage {
    /// Announces the next file
    Metadata(FileMetadata),
    /// All chunks of the current file were sent
    Completed,
    /// Receiver finalized a file
    TransferAck,
}

/// What arrived on the channel, classified for the state machines
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    Control(ControlMessage),
    Chunk(Bytes),
    /// Text that is not a known control message
    Malformed(String),
}

impl Incoming {
    pub fn classify(msg: ChannelMessage) -> Self {
        match msg {
            ChannelMessage::Binary(data) => Incoming::Chunk(data),
            ChannelMessage::Text(text) => match serde_json::from_str(&text) {
                Ok(control) => Incoming::Control(control),
                Err(_) => Incoming::Malformed(text),
            },
        }
    }
}

/// Send a control message over the channel
pub fn send_control(channel: &ChannelSender, msg: &ControlMessage) -> Result<(), TransferError> {
    let json = serde_json::to_string(msg)?;
    channel.send_text(json)?;
    Ok(())
}
