use crate::channel::{ChannelMessage, ChannelSender, DataChannel};
use crate::{AppEvent, FileMetadata};
use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;

use super::progress::ProgressTracker;
use super::protocol::{ControlMessage, Incoming, send_control};
use super::{ReceivedFile, TransferError, TransferState};

/// The file currently being assembled
struct ReceiveSession {
    metadata: FileMetadata,
    chunks: Vec<Bytes>,
    received: u64,
    progress: ProgressTracker,
}

impl ReceiveSession {
    fn new(metadata: FileMetadata) -> Self {
        let progress = ProgressTracker::new(metadata.size);
        Self {
            metadata,
            chunks: Vec::new(),
            received: 0,
            progress,
        }
    }

    fn assemble(self) -> ReceivedFile {
        let mut buf = BytesMut::with_capacity(self.received as usize);
        for chunk in &self.chunks {
            buf.extend_from_slice(chunk);
        }
        ReceivedFile {
            metadata: self.metadata,
            data: buf.freeze(),
        }
    }
}

/// Inbound side of a transfer: reassembles files from the message stream and
/// acknowledges each one once finalized.
pub struct TransferReceiver {
    session: Option<ReceiveSession>,
    state: TransferState,
    received: Vec<ReceivedFile>,
    event_tx: mpsc::Sender<AppEvent>,
}

impl TransferReceiver {
    pub fn new(event_tx: mpsc::Sender<AppEvent>) -> Self {
        Self {
            session: None,
            state: TransferState::Idle,
            received: Vec::new(),
            event_tx,
        }
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    /// A file was announced and not yet finalized
    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    pub fn received_files(&self) -> &[ReceivedFile] {
        &self.received
    }

    pub fn take_received(&mut self) -> Vec<ReceivedFile> {
        std::mem::take(&mut self.received)
    }

    pub fn clear_received(&mut self) {
        self.received.clear();
    }

    /// Feed one channel message. `reply` carries the acknowledgements back.
    ///
    /// An `Err` means the current session was aborted; the receiver is idle
    /// again and ready for a new announcement.
    pub async fn handle_message(
        &mut self,
        msg: ChannelMessage,
        reply: &ChannelSender,
    ) -> Result<(), TransferError> {
        match Incoming::classify(msg) {
            Incoming::Control(ControlMessage::Metadata(metadata)) => {
                self.on_metadata(metadata).await;
                Ok(())
            }
            Incoming::Chunk(data) => self.on_chunk(data).await,
            Incoming::Control(ControlMessage::Completed) => self.on_completed(reply).await,
            Incoming::Control(ControlMessage::TransferAck) => {
                tracing::warn!("Ignoring transfer-ack sent to the receiving side");
                Ok(())
            }
            Incoming::Malformed(text) => {
                tracing::warn!("Ignoring malformed control message: {}", text);
                Ok(())
            }
        }
    }

    /// The channel closed or the peer left. Only fails if a file was in flight.
    pub async fn handle_disconnect(&mut self) -> Result<(), TransferError> {
        match self.session.take() {
            Some(session) => {
                tracing::warn!(
                    "Peer disconnected while receiving {} ({}/{} bytes)",
                    session.metadata.name,
                    session.received,
                    session.metadata.size
                );
                self.abort(TransferError::PeerDisconnected).await
            }
            None => {
                tracing::debug!("Channel closed with no active session");
                Ok(())
            }
        }
    }

    /// Process messages until the channel closes. Returns the number of files
    /// received in this run. An aborted session closes the channel.
    pub async fn run(&mut self, channel: &mut DataChannel) -> Result<usize, TransferError> {
        let reply = channel.sender().clone();
        while let Some(msg) = channel.recv().await {
            if let Err(e) = self.handle_message(msg, &reply).await {
                channel.close();
                return Err(e);
            }
        }
        self.handle_disconnect().await?;

        let files = self.received.len();
        let _ = self.event_tx.send(AppEvent::TransferCompleted { files }).await;
        Ok(files)
    }

    async fn on_metadata(&mut self, metadata: FileMetadata) {
        if let Some(current) = &self.session {
            tracing::warn!(
                "Ignoring metadata for {} while {} is still being received",
                metadata.name,
                current.metadata.name
            );
            return;
        }

        tracing::info!(
            "Receiving {} ({} bytes, {})",
            metadata.name,
            metadata.size,
            metadata.mime_type
        );
        let mut session = ReceiveSession::new(metadata);
        self.state = TransferState::Announced;
        if let Some(p) = session.progress.start() {
            self.report(&session.metadata.name, p).await;
        }
        self.session = Some(session);
    }

    async fn on_chunk(&mut self, data: Bytes) -> Result<(), TransferError> {
        let Some(session) = self.session.as_mut() else {
            tracing::warn!("Dropping {} stray bytes outside of a file session", data.len());
            return Ok(());
        };

        let received = session.received + data.len() as u64;
        if received > session.metadata.size {
            let err = TransferError::Protocol(format!(
                "{} exceeds its declared size of {} bytes",
                session.metadata.name, session.metadata.size
            ));
            self.session = None;
            return self.abort(err).await;
        }

        session.received = received;
        let len = data.len() as u64;
        session.chunks.push(data);
        self.state = TransferState::Streaming;

        let update = session.progress.advance(len);
        let name = session.metadata.name.clone();
        if let Some(p) = update {
            self.report(&name, p).await;
        }
        Ok(())
    }

    async fn on_completed(&mut self, reply: &ChannelSender) -> Result<(), TransferError> {
        let Some(mut session) = self.session.take() else {
            tracing::warn!("Ignoring completed without an announced file");
            return Ok(());
        };

        if session.received != session.metadata.size {
            let err = TransferError::Protocol(format!(
                "{} completed with {} of {} bytes",
                session.metadata.name, session.received, session.metadata.size
            ));
            return self.abort(err).await;
        }

        if let Some(p) = session.progress.finish() {
            self.report(&session.metadata.name, p).await;
        }

        let file = session.assemble();
        tracing::info!("Received {} ({} bytes)", file.metadata.name, file.data.len());
        self.received.push(file.clone());
        let _ = self.event_tx.send(AppEvent::FileReceived(file)).await;

        if let Err(e) = send_control(reply, &ControlMessage::TransferAck) {
            tracing::warn!("Failed to send transfer-ack: {}", e);
        }
        self.state = TransferState::Idle;
        Ok(())
    }

    async fn abort(&mut self, err: TransferError) -> Result<(), TransferError> {
        self.state = TransferState::Aborted;
        tracing::warn!("Receive aborted: {}", err);
        let _ = self.event_tx.send(AppEvent::TransferFailed(err.to_string())).await;
        Err(err)
    }

    async fn report(&self, file_name: &str, progress: u8) {
        let _ = self
            .event_tx
            .send(AppEvent::TransferProgress {
                file_name: file_name.to_string(),
                progress,
                is_sending: false,
            })
            .await;
    }
}
