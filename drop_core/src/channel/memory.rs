//! In-memory connected channel pair.
//!
//! Each direction is pumped by its own task; the pump releases buffered bytes
//! only once the message is queued at the other end, so a reader that stops
//! consuming makes the writer's buffered amount grow.

use super::{BufferedAmount, ChannelBackend, ChannelMessage, DataChannel};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Create two connected channels. Closing or dropping either end closes both.
pub fn pair(capacity: usize) -> (DataChannel, DataChannel) {
    let closed = CancellationToken::new();
    let (a, a_backend) = DataChannel::with_token(capacity, closed.clone());
    let (b, b_backend) = DataChannel::with_token(capacity, closed.clone());

    let ChannelBackend {
        outbound: a_out,
        inbound: a_in,
        buffered: a_buffered,
        ..
    } = a_backend;
    let ChannelBackend {
        outbound: b_out,
        inbound: b_in,
        buffered: b_buffered,
        ..
    } = b_backend;

    tokio::spawn(pump(a_out, b_in, a_buffered, closed.clone()));
    tokio::spawn(pump(b_out, a_in, b_buffered, closed));

    (a, b)
}

async fn pump(
    mut from: mpsc::UnboundedReceiver<ChannelMessage>,
    to: mpsc::Sender<ChannelMessage>,
    buffered: Arc<BufferedAmount>,
    closed: CancellationToken,
) {
    loop {
        let msg = tokio::select! {
            biased;
            _ = closed.cancelled() => break,
            msg = from.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };

        let len = msg.len() as u64;
        let delivered = tokio::select! {
            _ = closed.cancelled() => false,
            sent = to.send(msg) => sent.is_ok(),
        };
        buffered.release(len);
        if !delivered {
            break;
        }
    }
    closed.cancel();
}
