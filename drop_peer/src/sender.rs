use anyhow::Result;
use drop_core::transfer::TransferSender;
use drop_core::transfer::file::validate_files;
use drop_core::{AppConfig, AppEvent, OutgoingFile};
use tokio::sync::mpsc;
use tracing::info;

use crate::connection::PeerConnection;
use crate::negotiation::Role;

/// Send `files` to whoever joins `room_code`.
///
/// Returns once every file was acknowledged by the receiver.
pub async fn send_files(
    config: &AppConfig,
    room_code: &str,
    files: Vec<OutgoingFile>,
    event_tx: mpsc::Sender<AppEvent>,
) -> Result<()> {
    validate_files(&files, &config.limits)?;

    let mut connection =
        PeerConnection::open(config, room_code, Role::Initiator, event_tx.clone()).await?;
    info!("Sending {} file(s) with code {}", files.len(), room_code);

    let result: Result<()> = async {
        let channel = connection.establish().await?;
        let mut sender =
            TransferSender::new(config.transfer.clone(), config.limits.clone(), event_tx.clone());
        connection.run_sender(channel, &files, &mut sender).await?;
        Ok(())
    }
    .await;

    connection.shutdown();
    result
}
