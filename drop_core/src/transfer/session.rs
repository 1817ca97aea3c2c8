/// Lifecycle of one file transfer, per direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferState {
    #[default]
    Idle,
    /// Metadata sent / received
    Announced,
    /// At least one chunk sent / received
    Streaming,
    /// `completed` sent (sender) or file finalized (receiver)
    Completed,
    /// Receiver confirmed every file
    Acknowledged,
    Aborted,
}

impl TransferState {
    /// A disconnect in this state fails the transfer
    pub fn is_active(self) -> bool {
        matches!(self, TransferState::Announced | TransferState::Streaming)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TransferState::Acknowledged | TransferState::Aborted)
    }
}
