//! Framed TCP backend for [`DataChannel`].
//!
//! Frame layout: 1 byte kind (0 = text, 1 = binary), 4 byte big-endian payload
//! length, payload. TCP gives ordering and reliability; the framing restores
//! message boundaries.

use super::{BufferedAmount, ChannelBackend, ChannelMessage, DEFAULT_INBOUND_CAPACITY, DataChannel};
use bytes::Bytes;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const KIND_TEXT: u8 = 0;
const KIND_BINARY: u8 = 1;

/// Largest frame accepted from the network (16MB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Write one message as a frame
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, msg: &ChannelMessage) -> io::Result<()> {
    let (kind, payload): (u8, &[u8]) = match msg {
        ChannelMessage::Text(text) => (KIND_TEXT, text.as_bytes()),
        ChannelMessage::Binary(data) => (KIND_BINARY, data.as_ref()),
    };
    if payload.len() > MAX_FRAME_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("frame of {} bytes exceeds {}", payload.len(), MAX_FRAME_SIZE),
        ));
    }

    writer.write_u8(kind).await?;
    writer.write_u32(payload.len() as u32).await?;
    writer.write_all(payload).await?;
    Ok(())
}

/// Read one frame; `Ok(None)` on a clean end of stream between frames
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Option<ChannelMessage>> {
    let kind = match reader.read_u8().await {
        Ok(kind) => kind,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    };

    let len = reader.read_u32().await? as usize;
    if len > MAX_FRAME_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {} bytes exceeds {}", len, MAX_FRAME_SIZE),
        ));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    match kind {
        KIND_TEXT => String::from_utf8(payload)
            .map(|text| Some(ChannelMessage::Text(text)))
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)),
        KIND_BINARY => Ok(Some(ChannelMessage::Binary(Bytes::from(payload)))),
        other => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unknown frame kind {}", other),
        )),
    }
}

/// Turn an established (and already authenticated) stream into a channel
pub fn spawn(stream: TcpStream) -> DataChannel {
    let peer = stream
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    let _ = stream.set_nodelay(true);

    let (channel, backend) = DataChannel::new(DEFAULT_INBOUND_CAPACITY);
    let (read_half, write_half) = stream.into_split();
    let ChannelBackend {
        outbound,
        inbound,
        buffered,
        closed,
    } = backend;

    tracing::debug!("Direct channel open with {}", peer);
    tokio::spawn(write_loop(write_half, outbound, buffered, closed.clone()));
    tokio::spawn(read_loop(read_half, inbound, closed, peer));

    channel
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<ChannelMessage>,
    buffered: Arc<BufferedAmount>,
    closed: CancellationToken,
) {
    loop {
        let msg = tokio::select! {
            biased;
            _ = closed.cancelled() => break,
            msg = outbound.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };

        let len = msg.len() as u64;
        let written = tokio::select! {
            _ = closed.cancelled() => break,
            result = write_frame(&mut writer, &msg) => result,
        };
        buffered.release(len);
        if let Err(e) = written {
            tracing::warn!("Direct channel write failed: {}", e);
            break;
        }
    }

    let _ = writer.shutdown().await;
    closed.cancel();
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    inbound: mpsc::Sender<ChannelMessage>,
    closed: CancellationToken,
    peer: String,
) {
    loop {
        let frame = tokio::select! {
            _ = closed.cancelled() => break,
            frame = read_frame(&mut reader) => frame,
        };

        match frame {
            Ok(Some(msg)) => {
                if inbound.send(msg).await.is_err() {
                    break;
                }
            }
            Ok(None) => {
                tracing::debug!("Direct channel closed by {}", peer);
                break;
            }
            Err(e) => {
                tracing::warn!("Direct channel read from {} failed: {}", peer, e);
                break;
            }
        }
    }
    closed.cancel();
}
