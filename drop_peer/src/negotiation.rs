//! Connection establishment over the relay's signal path.
//!
//! The sender is the initiator: it creates the offer once the room is paired.
//! The receiver answers. Candidates flow both ways until the transport reports
//! an open channel.

use drop_core::DataChannel;
use drop_core::relay::{Descriptor, DescriptorKind, SignalData};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid candidate: {0}")]
    InvalidCandidate(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The transport that turns descriptors and candidates into a direct channel.
///
/// Implementations push `PeerEvent::LocalCandidate` and `PeerEvent::ChannelOpen`
/// into the connection's event queue on their own.
pub trait Transport: Send {
    fn create_offer(&mut self) -> Result<Descriptor, NegotiationError>;

    /// Apply the remote offer, returning the answer to send back
    fn accept_offer(&mut self, offer: &Descriptor) -> Result<Descriptor, NegotiationError>;

    fn accept_answer(&mut self, answer: &Descriptor) -> Result<(), NegotiationError>;

    fn add_remote_candidate(&mut self, candidate: &str) -> Result<(), NegotiationError>;

    /// Drop any listener, pending connection attempt or half-open state
    fn close(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Waiting,
    OfferSent,
    AnswerSent,
    Connected,
}

pub struct Negotiator<T: Transport> {
    role: Role,
    transport: T,
    state: NegotiationState,
    remote_applied: bool,
    pending_candidates: Vec<String>,
}

impl<T: Transport> Negotiator<T> {
    pub fn new(role: Role, transport: T) -> Self {
        Self {
            role,
            transport,
            state: NegotiationState::Waiting,
            remote_applied: false,
            pending_candidates: Vec::new(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == NegotiationState::Connected
    }

    /// Both members are in the room. The initiator answers with its offer.
    pub fn on_paired(&mut self) -> Result<Option<SignalData>, NegotiationError> {
        if self.role != Role::Initiator || self.state != NegotiationState::Waiting {
            debug!("Paired notification ignored in {:?} as {:?}", self.state, self.role);
            return Ok(None);
        }

        let offer = self.transport.create_offer()?;
        self.state = NegotiationState::OfferSent;
        info!("Offer created");
        Ok(Some(SignalData::descriptor(offer)))
    }

    pub fn on_descriptor(
        &mut self,
        descriptor: Descriptor,
    ) -> Result<Option<SignalData>, NegotiationError> {
        match (self.role, descriptor.kind, self.state) {
            (Role::Responder, DescriptorKind::Offer, NegotiationState::Waiting) => {
                let answer = self.transport.accept_offer(&descriptor)?;
                self.state = NegotiationState::AnswerSent;
                self.apply_pending()?;
                info!("Offer accepted, answer created");
                Ok(Some(SignalData::descriptor(answer)))
            }
            (Role::Initiator, DescriptorKind::Answer, NegotiationState::OfferSent) => {
                self.transport.accept_answer(&descriptor)?;
                self.apply_pending()?;
                info!("Answer applied");
                Ok(None)
            }
            (role, kind, state) => {
                warn!("Ignoring {:?} descriptor as {:?} in {:?}", kind, role, state);
                Ok(None)
            }
        }
    }

    /// Remote candidates wait until the remote descriptor is applied
    pub fn on_remote_candidate(&mut self, candidate: String) -> Result<(), NegotiationError> {
        if self.remote_applied {
            self.transport.add_remote_candidate(&candidate)
        } else {
            debug!("Buffering early candidate {}", candidate);
            self.pending_candidates.push(candidate);
            Ok(())
        }
    }

    pub fn on_local_candidate(&self, candidate: String) -> SignalData {
        SignalData::candidate(candidate)
    }

    /// The first channel wins; later ones are closed
    pub fn on_channel_open(&mut self, channel: DataChannel) -> Option<DataChannel> {
        if self.state == NegotiationState::Connected {
            debug!("Closing surplus channel");
            channel.close();
            return None;
        }
        self.state = NegotiationState::Connected;
        info!("Direct channel open");
        Some(channel)
    }

    /// Peer left before the channel opened; start over on the next pairing
    pub fn reset(&mut self) {
        self.transport.close();
        self.state = NegotiationState::Waiting;
        self.remote_applied = false;
        self.pending_candidates.clear();
    }

    pub fn close(&mut self) {
        self.transport.close();
    }

    fn apply_pending(&mut self) -> Result<(), NegotiationError> {
        self.remote_applied = true;
        for candidate in std::mem::take(&mut self.pending_candidates) {
            self.transport.add_remote_candidate(&candidate)?;
        }
        Ok(())
    }
}
