//! Fixed-size chunking and pacing against the channel's buffered amount.

use crate::channel::ChannelSender;
use bytes::Bytes;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::TransferError;

/// Splits a file into ordered, zero-copy chunks of at most `chunk_size` bytes
#[derive(Debug, Clone)]
pub struct Chunker {
    data: Bytes,
    chunk_size: usize,
    offset: usize,
}

impl Chunker {
    pub fn new(data: Bytes, chunk_size: usize) -> Result<Self, TransferError> {
        if chunk_size == 0 {
            return Err(TransferError::InvalidChunkSize);
        }
        Ok(Self {
            data,
            chunk_size,
            offset: 0,
        })
    }

    /// Number of chunks a file of `len` bytes is split into
    pub fn chunk_count(len: u64, chunk_size: usize) -> u64 {
        if chunk_size == 0 {
            return 0;
        }
        len.div_ceil(chunk_size as u64)
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }
}

impl Iterator for Chunker {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        if self.offset >= self.data.len() {
            return None;
        }
        let end = (self.offset + self.chunk_size).min(self.data.len());
        let chunk = self.data.slice(self.offset..end);
        self.offset = end;
        Some(chunk)
    }
}

/// Backpressure rule: above `high` buffered bytes, wait until the channel
/// reports `low` or less
#[derive(Debug, Clone, Copy)]
pub struct Pacer {
    high: u64,
    low: u64,
    timeout: Option<Duration>,
}

impl Pacer {
    pub fn new(high: u64, low: u64, timeout: Option<Duration>) -> Self {
        Self {
            high,
            low: low.min(high),
            timeout,
        }
    }

    /// Returns once the next chunk may be sent
    pub async fn ready(
        &self,
        channel: &ChannelSender,
        cancel: &CancellationToken,
    ) -> Result<(), TransferError> {
        if cancel.is_cancelled() {
            return Err(TransferError::PeerDisconnected);
        }
        let buffered = channel.buffered_amount();
        if buffered <= self.high {
            return Ok(());
        }

        tracing::debug!(
            "Backpressure: {} bytes buffered, waiting for {}",
            buffered,
            self.low
        );

        let drained = async {
            match self.timeout {
                Some(limit) => {
                    match tokio::time::timeout(limit, channel.wait_buffered_at_or_below(self.low)).await {
                        Ok(result) => result.map_err(TransferError::from),
                        Err(_) => Err(TransferError::BackpressureStalled(limit)),
                    }
                }
                None => channel
                    .wait_buffered_at_or_below(self.low)
                    .await
                    .map_err(TransferError::from),
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(TransferError::PeerDisconnected),
            result = drained => result,
        }
    }
}
