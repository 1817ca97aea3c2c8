//! Direct peer-to-peer message channel.
//!
//! A [`DataChannel`] is an ordered, reliable, message-oriented pipe between the
//! two peers once negotiation succeeded. Backends (in-memory pair, framed TCP)
//! own the other end through a [`ChannelBackend`] and report how many bytes
//! are still queued via [`BufferedAmount`], which is what the sender paces on.

pub mod memory;
pub mod tcp;

use bytes::Bytes;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;

/// Inbound messages a backend may queue before it stops reading
pub const DEFAULT_INBOUND_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelMessage {
    /// Control message (JSON)
    Text(String),
    /// Raw chunk bytes
    Binary(Bytes),
}

impl ChannelMessage {
    pub fn len(&self) -> usize {
        match self {
            ChannelMessage::Text(text) => text.len(),
            ChannelMessage::Binary(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("direct channel is closed")]
    Closed,
}

/// Bytes handed to the channel but not yet written out by its backend
#[derive(Debug, Default)]
pub struct BufferedAmount {
    bytes: AtomicU64,
    drained: Notify,
}

impl BufferedAmount {
    pub fn get(&self) -> u64 {
        self.bytes.load(Ordering::SeqCst)
    }

    fn add(&self, n: u64) {
        self.bytes.fetch_add(n, Ordering::SeqCst);
    }

    /// Called by the backend once `n` bytes left the queue
    pub fn release(&self, n: u64) {
        let _ = self
            .bytes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                Some(current.saturating_sub(n))
            });
        self.drained.notify_waiters();
    }

    /// Resolve once the buffered amount is at or below `low`
    pub async fn wait_at_or_below(&self, low: u64) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            // Register before checking so a release in between is not missed
            notified.as_mut().enable();
            if self.get() <= low {
                return;
            }
            notified.await;
        }
    }
}

/// Sending half of a [`DataChannel`]
#[derive(Debug, Clone)]
pub struct ChannelSender {
    tx: mpsc::UnboundedSender<ChannelMessage>,
    buffered: Arc<BufferedAmount>,
    closed: CancellationToken,
}

impl ChannelSender {
    pub fn send(&self, msg: ChannelMessage) -> Result<(), ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }
        let len = msg.len() as u64;
        self.buffered.add(len);
        self.tx.send(msg).map_err(|_| {
            self.buffered.release(len);
            ChannelError::Closed
        })
    }

    pub fn send_text(&self, text: impl Into<String>) -> Result<(), ChannelError> {
        self.send(ChannelMessage::Text(text.into()))
    }

    pub fn send_binary(&self, data: Bytes) -> Result<(), ChannelError> {
        self.send(ChannelMessage::Binary(data))
    }

    pub fn buffered_amount(&self) -> u64 {
        self.buffered.get()
    }

    /// Suspend until the backend drained the queue to `low` bytes or less
    pub async fn wait_buffered_at_or_below(&self, low: u64) -> Result<(), ChannelError> {
        tokio::select! {
            _ = self.closed.cancelled() => Err(ChannelError::Closed),
            _ = self.buffered.wait_at_or_below(low) => Ok(()),
        }
    }

    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.tx.is_closed()
    }

    /// Resolves once either side closed the channel
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }
}

/// Receiving half of a [`DataChannel`]
#[derive(Debug)]
pub struct ChannelReceiver {
    rx: mpsc::Receiver<ChannelMessage>,
    closed: CancellationToken,
}

impl ChannelReceiver {
    /// Next message in send order; `None` once the channel is closed and drained
    pub async fn recv(&mut self) -> Option<ChannelMessage> {
        tokio::select! {
            biased;
            msg = self.rx.recv() => msg,
            _ = self.closed.cancelled() => None,
        }
    }
}

/// The backend's view of a channel
#[derive(Debug)]
pub struct ChannelBackend {
    /// Messages the local side sent, in order
    pub outbound: mpsc::UnboundedReceiver<ChannelMessage>,
    /// Where messages from the remote side are delivered
    pub inbound: mpsc::Sender<ChannelMessage>,
    pub buffered: Arc<BufferedAmount>,
    pub closed: CancellationToken,
}

#[derive(Debug)]
pub struct DataChannel {
    sender: ChannelSender,
    receiver: ChannelReceiver,
}

impl DataChannel {
    /// Create a channel whose other end is driven by the returned backend
    pub fn new(inbound_capacity: usize) -> (DataChannel, ChannelBackend) {
        Self::with_token(inbound_capacity, CancellationToken::new())
    }

    pub(crate) fn with_token(
        inbound_capacity: usize,
        closed: CancellationToken,
    ) -> (DataChannel, ChannelBackend) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::channel(inbound_capacity.max(1));
        let buffered = Arc::new(BufferedAmount::default());

        let channel = DataChannel {
            sender: ChannelSender {
                tx: out_tx,
                buffered: buffered.clone(),
                closed: closed.clone(),
            },
            receiver: ChannelReceiver {
                rx: in_rx,
                closed: closed.clone(),
            },
        };
        let backend = ChannelBackend {
            outbound: out_rx,
            inbound: in_tx,
            buffered,
            closed,
        };
        (channel, backend)
    }

    pub fn split(self) -> (ChannelSender, ChannelReceiver) {
        (self.sender, self.receiver)
    }

    pub fn sender(&self) -> &ChannelSender {
        &self.sender
    }

    pub fn send(&self, msg: ChannelMessage) -> Result<(), ChannelError> {
        self.sender.send(msg)
    }

    pub async fn recv(&mut self) -> Option<ChannelMessage> {
        self.receiver.recv().await
    }

    pub fn buffered_amount(&self) -> u64 {
        self.sender.buffered_amount()
    }

    pub fn close(&self) {
        self.sender.close();
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
