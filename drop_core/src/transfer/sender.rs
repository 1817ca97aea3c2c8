use crate::AppEvent;
use crate::channel::DataChannel;
use crate::config::{SendLimits, TransferConfig};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::chunker::{Chunker, Pacer};
use super::file::{OutgoingFile, validate_files};
use super::progress::ProgressTracker;
use super::protocol::{ControlMessage, Incoming, send_control};
use super::{TransferError, TransferState};

/// Drives the outbound side of a transfer over an open direct channel.
///
/// Files go out strictly one after another: metadata, chunks (paced by the
/// channel's buffered amount), `completed`. The transfer only counts as done
/// once the receiver acknowledged every file.
pub struct TransferSender {
    config: TransferConfig,
    limits: SendLimits,
    state: TransferState,
    event_tx: mpsc::Sender<AppEvent>,
}

impl TransferSender {
    pub fn new(config: TransferConfig, limits: SendLimits, event_tx: mpsc::Sender<AppEvent>) -> Self {
        Self {
            config,
            limits,
            state: TransferState::Idle,
            event_tx,
        }
    }

    /// State of the current (or last) file session
    pub fn state(&self) -> TransferState {
        self.state
    }

    /// Send `files` in order. Closes the channel when done, whatever the outcome.
    /// A channel that is already closed fails before anything is announced.
    ///
    /// `cancel` is the disconnect signal: once triggered the transfer aborts at
    /// the next chunk boundary, backpressure wait or ack wait.
    pub async fn send_files(
        &mut self,
        channel: &mut DataChannel,
        files: &[OutgoingFile],
        cancel: &CancellationToken,
    ) -> Result<(), TransferError> {
        validate_files(files, &self.limits)?;
        if channel.is_closed() {
            return Err(TransferError::PeerDisconnected);
        }

        let result = self.run(channel, files, cancel).await;
        channel.close();

        match &result {
            Ok(()) => {
                self.state = TransferState::Acknowledged;
                tracing::info!("All {} file(s) sent and acknowledged", files.len());
                let _ = self
                    .event_tx
                    .send(AppEvent::TransferCompleted { files: files.len() })
                    .await;
            }
            Err(e) => {
                self.state = TransferState::Aborted;
                tracing::warn!("Transfer aborted: {}", e);
                let _ = self.event_tx.send(AppEvent::TransferFailed(e.to_string())).await;
            }
        }
        result
    }

    async fn run(
        &mut self,
        channel: &mut DataChannel,
        files: &[OutgoingFile],
        cancel: &CancellationToken,
    ) -> Result<(), TransferError> {
        let total: u64 = files.iter().map(|f| f.metadata.size).sum();
        let mut progress = ProgressTracker::new(total);
        let pacer = Pacer::new(
            self.config.high_water_mark,
            self.config.low_water_mark,
            self.config.backpressure_timeout(),
        );
        let mut acked = 0usize;

        for (idx, file) in files.iter().enumerate() {
            let name = file.metadata.name.clone();
            if idx == 0 {
                if let Some(p) = progress.start() {
                    self.report(&name, p).await;
                }
            }

            tracing::info!(
                "Sending {} ({} bytes, {}) [{}/{}]",
                name,
                file.metadata.size,
                file.metadata.mime_type,
                idx + 1,
                files.len()
            );
            send_control(channel.sender(), &ControlMessage::Metadata(file.metadata.clone()))?;
            self.state = TransferState::Announced;

            for chunk in Chunker::new(file.data.clone(), self.config.chunk_size)? {
                pacer.ready(channel.sender(), cancel).await?;
                let len = chunk.len() as u64;
                channel.sender().send_binary(chunk)?;
                self.state = TransferState::Streaming;

                if let Some(p) = progress.advance(len) {
                    self.report(&name, p).await;
                }
            }

            send_control(channel.sender(), &ControlMessage::Completed)?;
            self.state = TransferState::Completed;
            let _ = self
                .event_tx
                .send(AppEvent::FileSent { file_name: name.clone() })
                .await;

            if self.config.wait_for_ack_per_file {
                wait_for_acks(channel, &mut acked, idx + 1, cancel).await?;
            }
        }

        if let Some(p) = progress.finish() {
            let name = files.last().map(|f| f.metadata.name.as_str()).unwrap_or("");
            self.report(name, p).await;
        }

        wait_for_acks(channel, &mut acked, files.len(), cancel).await
    }

    async fn report(&self, file_name: &str, progress: u8) {
        let _ = self
            .event_tx
            .send(AppEvent::TransferProgress {
                file_name: file_name.to_string(),
                progress,
                is_sending: true,
            })
            .await;
    }
}

/// Read the channel until `target` acknowledgements were counted
async fn wait_for_acks(
    channel: &mut DataChannel,
    acked: &mut usize,
    target: usize,
    cancel: &CancellationToken,
) -> Result<(), TransferError> {
    while *acked < target {
        let msg = tokio::select! {
            _ = cancel.cancelled() => return Err(TransferError::PeerDisconnected),
            msg = channel.recv() => msg,
        };

        match msg.map(Incoming::classify) {
            Some(Incoming::Control(ControlMessage::TransferAck)) => {
                *acked += 1;
                tracing::debug!("transfer-ack {}/{}", acked, target);
            }
            Some(Incoming::Control(other)) => {
                tracing::warn!("Ignoring unexpected control message from receiver: {:?}", other);
            }
            Some(Incoming::Chunk(data)) => {
                tracing::warn!("Ignoring {} stray bytes from receiver", data.len());
            }
            Some(Incoming::Malformed(text)) => {
                tracing::warn!("Ignoring malformed message from receiver: {}", text);
            }
            None => return Err(TransferError::PeerDisconnected),
        }
    }
    Ok(())
}

