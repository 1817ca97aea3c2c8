use crate::channel::ChannelError;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("peer disconnected during transfer")]
    PeerDisconnected,

    #[error("channel did not drain within {0:?}")]
    BackpressureStalled(Duration),

    #[error("file rejected: {0}")]
    Rejected(String),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("invalid chunk size 0")]
    InvalidChunkSize,

    #[error("failed to encode control message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<ChannelError> for TransferError {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::Closed => TransferError::PeerDisconnected,
        }
    }
}
