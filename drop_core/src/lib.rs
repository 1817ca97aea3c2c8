use serde::{Deserialize, Serialize};

pub mod channel;
pub mod code;
pub mod config;
pub mod registry;
pub mod relay;
pub mod transfer;

pub use channel::{ChannelMessage, DataChannel};
pub use code::{generate_room_code, validate_room_code};
pub use config::AppConfig;
pub use transfer::{OutgoingFile, ReceivedFile, TransferError, TransferState};

/// File metadata announced before the chunks of a file.
///
/// `size` is authoritative: progress is computed against it and the receiver
/// refuses to finalize a file whose byte count differs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub name: String,
    pub size: u64,
    pub mime_type: String,
}

impl FileMetadata {
    pub fn new(name: impl Into<String>, size: u64, mime_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size,
            mime_type: mime_type.into(),
        }
    }
}

/// Report from the protocol layers to whoever drives them
#[derive(Debug, Clone)]
pub enum AppEvent {
    Status(String),

    /// Both members of the room are present
    PeerConnected,

    /// The other member left; a failure only if a session was active
    PeerDisconnected,

    /// The code is already used by two other participants
    RoomFull {
        room_code: String,
    },

    /// Direct channel is open, transfer can start
    ChannelOpen,

    /// Integer percent, 0..=100
    TransferProgress {
        file_name: String,
        progress: u8,
        is_sending: bool,
    },

    /// Sender: all chunks and `completed` for this file were sent
    FileSent {
        file_name: String,
    },

    /// Receiver: file finalized and acknowledged
    FileReceived(ReceivedFile),

    /// Every file was sent and acknowledged (sender) or the sender closed cleanly (receiver)
    TransferCompleted {
        files: usize,
    },

    /// Terminal failure of the current transfer
    TransferFailed(String),

    Error(String),
}
