//! Relay state: the room registry plus one outbound queue per connection

use super::messages::{ServerMessage, SignalEnvelope};
use crate::code::validate_room_code;
use crate::registry::{MemberId, RegistryError, RoomRegistry};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio_util::sync::CancellationToken;

/// A connection's outbound queue and the token that evicts it
struct Outbound {
    tx: mpsc::Sender<ServerMessage>,
    evict: CancellationToken,
}

/// Shared relay state
///
/// Lock order is always `registry` then `members`.
#[derive(Default)]
pub struct RelayState {
    registry: Mutex<RoomRegistry>,
    members: RwLock<HashMap<MemberId, Outbound>>,
    pub connection_count: AtomicUsize,
}

impl RelayState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection's outbound queue. The returned token fires when
    /// the relay gives up on the connection because its queue overflowed.
    pub async fn register(&self, member: MemberId, tx: mpsc::Sender<ServerMessage>) -> CancellationToken {
        let evict = CancellationToken::new();
        self.members.write().await.insert(
            member,
            Outbound {
                tx,
                evict: evict.clone(),
            },
        );
        self.connection_count.fetch_add(1, Ordering::SeqCst);
        evict
    }

    pub async fn room_count(&self) -> usize {
        self.registry.lock().await.room_count()
    }

    pub async fn room_size(&self, code: &str) -> usize {
        self.registry.lock().await.room_size(code)
    }

    pub fn connections(&self) -> usize {
        self.connection_count.load(Ordering::SeqCst)
    }

    pub async fn on_join_room(&self, member: MemberId, code: &str) {
        if let Err(e) = validate_room_code(code) {
            tracing::warn!("Member {} sent invalid room code: {}", member, e);
            self.deliver(member, ServerMessage::Error(e.to_string())).await;
            return;
        }

        let mut registry = self.registry.lock().await;
        match registry.join(code, member) {
            Ok(outcome) if outcome.newly_paired => {
                tracing::info!("Room {} paired", code);
                for m in registry.members_of(code) {
                    self.deliver(m, ServerMessage::PeerConnected).await;
                }
            }
            Ok(outcome) => {
                tracing::info!("Member {} joined room {} ({}/2)", member, code, outcome.members);
            }
            Err(RegistryError::RoomFull(code)) => {
                tracing::warn!("Room {} is full, rejecting {}", code, member);
                self.deliver(member, ServerMessage::RoomFull(code)).await;
            }
            Err(e @ RegistryError::AlreadyInRoom(_)) => {
                tracing::warn!("Member {}: {}", member, e);
                self.deliver(member, ServerMessage::Error(e.to_string())).await;
            }
        }
    }

    pub async fn on_signal(&self, member: MemberId, envelope: SignalEnvelope) {
        let peers = {
            let registry = self.registry.lock().await;
            if registry.room_of(member) != Some(envelope.room_code.as_str()) {
                tracing::warn!(
                    "Dropping signal from {} for room {} it is not a member of",
                    member,
                    envelope.room_code
                );
                return;
            }
            registry.peers_of(&envelope.room_code, member)
        };

        for peer in peers {
            self.deliver(peer, ServerMessage::Signal(envelope.data.clone())).await;
        }
    }

    /// Remove a connection. Only the first call per member has any effect.
    pub async fn on_disconnect(&self, member: MemberId) {
        if self.members.write().await.remove(&member).is_none() {
            return;
        }
        self.connection_count.fetch_sub(1, Ordering::SeqCst);

        let mut registry = self.registry.lock().await;
        for departure in registry.leave(member) {
            tracing::info!(
                "Member {} left room {} ({} remaining)",
                member,
                departure.room_code,
                departure.remaining.len()
            );
            for peer in departure.remaining {
                self.deliver(peer, ServerMessage::PeerDisconnected).await;
            }
        }
    }

    /// A full queue evicts the member rather than losing the message
    async fn deliver(&self, to: MemberId, msg: ServerMessage) {
        let members = self.members.read().await;
        let Some(out) = members.get(&to) else {
            tracing::debug!("Member {} is gone, dropping {:?}", to, msg);
            return;
        };
        match out.tx.try_send(msg) {
            Ok(()) => {}
            Err(TrySendError::Full(msg)) => {
                tracing::warn!("Outbound queue for {} is full, evicting (dropped {:?})", to, msg);
                out.evict.cancel();
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!("Outbound queue for {} already closed", to);
                out.evict.cancel();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    async fn connect(state: &RelayState) -> (MemberId, mpsc::Receiver<ServerMessage>) {
        let (member, rx, _) = connect_with_capacity(state, 16).await;
        (member, rx)
    }

    async fn connect_with_capacity(
        state: &RelayState,
        capacity: usize,
    ) -> (MemberId, mpsc::Receiver<ServerMessage>, CancellationToken) {
        let member = MemberId::new();
        let (tx, rx) = mpsc::channel(capacity);
        let evict = state.register(member, tx).await;
        (member, rx, evict)
    }

    #[tokio::test]
    async fn test_pairing_notifies_both() {
        let state = RelayState::new();
        let (a, mut a_rx) = connect(&state).await;
        let (b, mut b_rx) = connect(&state).await;

        state.on_join_room(a, "482913").await;
        assert!(a_rx.try_recv().is_err());

        state.on_join_room(b, "482913").await;
        assert_eq!(a_rx.try_recv().unwrap(), ServerMessage::PeerConnected);
        assert_eq!(b_rx.try_recv().unwrap(), ServerMessage::PeerConnected);

        // A rejoin does not pair again
        state.on_join_room(b, "482913").await;
        assert!(a_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_third_member_gets_room_full() {
        let state = RelayState::new();
        let (a, mut a_rx) = connect(&state).await;
        let (b, _b_rx) = connect(&state).await;
        let (c, mut c_rx) = connect(&state).await;

        state.on_join_room(a, "111111").await;
        state.on_join_room(b, "111111").await;
        let _ = a_rx.try_recv();

        state.on_join_room(c, "111111").await;
        assert_eq!(c_rx.try_recv().unwrap(), ServerMessage::RoomFull("111111".into()));
        assert!(a_rx.try_recv().is_err());
        assert_eq!(state.room_size("111111").await, 2);
    }

    #[tokio::test]
    async fn test_invalid_code_is_an_error() {
        let state = RelayState::new();
        let (a, mut a_rx) = connect(&state).await;

        state.on_join_room(a, "").await;
        assert!(matches!(a_rx.try_recv().unwrap(), ServerMessage::Error(_)));
        assert_eq!(state.room_count().await, 0);
    }

    #[tokio::test]
    async fn test_signal_forwarded_verbatim_to_members_only() {
        let state = RelayState::new();
        let (a, _a_rx) = connect(&state).await;
        let (b, mut b_rx) = connect(&state).await;
        let (outsider, _o_rx) = connect(&state).await;

        state.on_join_room(a, "222222").await;
        state.on_join_room(b, "222222").await;
        let _ = b_rx.try_recv();

        let data = json!({"sdp": {"type": "offer", "sdp": "opaque"}, "extra": [1, 2]});
        state
            .on_signal(a, SignalEnvelope { room_code: "222222".into(), data: data.clone() })
            .await;
        assert_eq!(b_rx.try_recv().unwrap(), ServerMessage::Signal(data.clone()));

        state
            .on_signal(outsider, SignalEnvelope { room_code: "222222".into(), data })
            .await;
        assert!(b_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_disconnect_notifies_once() {
        let state = RelayState::new();
        let (a, _a_rx) = connect(&state).await;
        let (b, mut b_rx) = connect(&state).await;

        state.on_join_room(a, "333333").await;
        state.on_join_room(b, "333333").await;
        let _ = b_rx.try_recv();

        state.on_disconnect(a).await;
        state.on_disconnect(a).await;
        assert_eq!(b_rx.try_recv().unwrap(), ServerMessage::PeerDisconnected);
        assert!(b_rx.try_recv().is_err());
        assert_eq!(state.room_size("333333").await, 1);
        assert_eq!(state.connections(), 1);

        state.on_disconnect(b).await;
        assert_eq!(state.room_count().await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_joins_pair_once() {
        let state = Arc::new(RelayState::new());
        let (a, mut a_rx) = connect(&state).await;
        let (b, mut b_rx) = connect(&state).await;

        let s1 = state.clone();
        let s2 = state.clone();
        let h1 = tokio::spawn(async move { s1.on_join_room(a, "444444").await });
        let h2 = tokio::spawn(async move { s2.on_join_room(b, "444444").await });
        h1.await.unwrap();
        h2.await.unwrap();

        assert_eq!(a_rx.try_recv().unwrap(), ServerMessage::PeerConnected);
        assert!(a_rx.try_recv().is_err());
        assert_eq!(b_rx.try_recv().unwrap(), ServerMessage::PeerConnected);
        assert!(b_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_queue_evicts_instead_of_dropping() {
        let state = RelayState::new();
        let (a, mut a_rx, a_evict) = connect_with_capacity(&state, 16).await;
        let (b, mut b_rx, b_evict) = connect_with_capacity(&state, 1).await;

        state.on_join_room(a, "555555").await;
        state.on_join_room(b, "555555").await;
        assert_eq!(a_rx.try_recv().unwrap(), ServerMessage::PeerConnected);

        // b never reads: its single slot holds peer-connected
        state
            .on_signal(a, SignalEnvelope { room_code: "555555".into(), data: json!({"candidate": "c1"}) })
            .await;
        assert!(b_evict.is_cancelled());
        assert!(!a_evict.is_cancelled());

        // The socket handler reacts to eviction by disconnecting the member
        state.on_disconnect(b).await;
        assert_eq!(a_rx.try_recv().unwrap(), ServerMessage::PeerDisconnected);
        assert_eq!(b_rx.try_recv().unwrap(), ServerMessage::PeerConnected);
        assert_eq!(state.room_size("555555").await, 1);
    }
}
