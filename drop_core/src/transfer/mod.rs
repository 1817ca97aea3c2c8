//! File transfer over an open direct channel.
//!
//! The wire protocol is deliberately small:
//! - `metadata` (JSON text) announces a file
//! - binary chunks carry its bytes, in order
//! - `completed` closes the file, answered by `transfer-ack`

pub mod chunker;
pub mod constants;
pub mod error;
pub mod file;
pub mod progress;
pub mod protocol;
pub mod receiver;
pub mod sender;
pub mod session;

// Re-export public API
pub use chunker::{Chunker, Pacer};
pub use error::TransferError;
pub use file::{OutgoingFile, ReceivedFile, guess_mime_type, sanitize_file_name};
pub use progress::ProgressTracker;
pub use protocol::ControlMessage;
pub use receiver::TransferReceiver;
pub use sender::TransferSender;
pub use session::TransferState;
