use drop_core::DataChannel;
use drop_core::relay::Descriptor;

/// Everything that can happen to a peer connection, in arrival order.
///
/// The signaling reader and the transport both push into the same queue, so a
/// connection is driven by a single task.
#[derive(Debug)]
pub enum PeerEvent {
    /// The room now has both participants
    Paired,
    RoomFull(String),
    RelayError(String),
    /// Remote offer or answer
    Descriptor(Descriptor),
    /// Remote candidate
    Candidate(String),
    /// Candidate gathered by the local transport, to be signaled
    LocalCandidate(String),
    ChannelOpen(DataChannel),
    PeerDisconnected,
    /// The relay socket is gone
    RelayClosed,
}
