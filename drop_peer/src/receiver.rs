use anyhow::Result;
use drop_core::transfer::TransferReceiver;
use drop_core::{AppConfig, AppEvent, ReceivedFile};
use tokio::sync::mpsc;
use tracing::info;

use crate::connection::PeerConnection;
use crate::negotiation::Role;

/// Join `room_code` and receive files until the sender is done.
///
/// Files are returned in arrival order; nothing partial is ever included.
pub async fn receive_files(
    config: &AppConfig,
    room_code: &str,
    event_tx: mpsc::Sender<AppEvent>,
) -> Result<Vec<ReceivedFile>> {
    let mut connection =
        PeerConnection::open(config, room_code, Role::Responder, event_tx.clone()).await?;
    let mut receiver = TransferReceiver::new(event_tx);

    let result: Result<usize> = async {
        let channel = connection.establish().await?;
        Ok(connection.run_receiver(channel, &mut receiver).await?)
    }
    .await;

    connection.shutdown();
    let count = result?;
    info!("Received {} file(s) in room {}", count, room_code);
    Ok(receiver.take_received())
}
