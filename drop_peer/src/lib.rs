pub mod connection;
pub mod event;
pub mod negotiation;
pub mod receiver;
pub mod sender;
pub mod signaling;
pub mod tcp_transport;

pub use connection::PeerConnection;
pub use event::PeerEvent;
pub use negotiation::{Negotiator, Role, Transport};
pub use receiver::receive_files;
pub use sender::send_files;
pub use signaling::SignalingClient;
pub use tcp_transport::TcpTransport;
