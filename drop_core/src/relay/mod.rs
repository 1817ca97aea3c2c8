//! Rendezvous relay
//!
//! Pairs exactly two participants per room code and forwards their
//! connection-establishment signals. It never sees file data.

mod handler;
pub mod messages;
mod server;
mod state;

pub use handler::handle_socket;
pub use messages::{
    Candidate, ClientMessage, Descriptor, DescriptorKind, ServerMessage, SignalData,
    SignalEnvelope,
};
pub use server::{create_router, serve, start_relay_server};
pub use state::RelayState;
