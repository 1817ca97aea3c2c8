//! One participant's connection: relay signaling, negotiation, then transfer.
//!
//! Every input (relay messages, transport events) goes through a single event
//! queue drained here, so there is no shared mutable state between tasks.

use anyhow::{Context, Result, anyhow, bail};
use drop_core::transfer::{TransferReceiver, TransferSender};
use drop_core::{AppConfig, AppEvent, DataChannel, OutgoingFile, TransferError, validate_room_code};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::event::PeerEvent;
use crate::negotiation::{Negotiator, Role};
use crate::signaling::SignalingClient;
use crate::tcp_transport::TcpTransport;

pub struct PeerConnection {
    room_code: String,
    signaling: SignalingClient,
    negotiator: Negotiator<TcpTransport>,
    events: mpsc::UnboundedReceiver<PeerEvent>,
    app_events: mpsc::Sender<AppEvent>,
    relay_open: bool,
}

impl PeerConnection {
    /// Connect to the relay and join `room_code`
    pub async fn open(
        config: &AppConfig,
        room_code: &str,
        role: Role,
        app_events: mpsc::Sender<AppEvent>,
    ) -> Result<Self> {
        validate_room_code(room_code).context("Invalid room code")?;

        let (tx, events) = mpsc::unbounded_channel();
        let signaling = SignalingClient::connect(&config.relay.ws_url(), room_code, tx.clone()).await?;
        let transport = TcpTransport::new(
            tx,
            &config.direct.advertise_hosts,
            config.direct.connect_timeout(),
        );
        signaling.join_room()?;

        let _ = app_events
            .send(AppEvent::Status(format!("Waiting for peer in room {}", room_code)))
            .await;

        Ok(Self {
            room_code: room_code.to_string(),
            signaling,
            negotiator: Negotiator::new(role, transport),
            events,
            app_events,
            relay_open: true,
        })
    }

    pub fn room_code(&self) -> &str {
        &self.room_code
    }

    /// Drive negotiation until the direct channel is open
    pub async fn establish(&mut self) -> Result<DataChannel> {
        loop {
            let event = self
                .events
                .recv()
                .await
                .ok_or_else(|| anyhow!("Connection event queue closed"))?;

            match event {
                PeerEvent::Paired => {
                    info!("Peer joined room {}", self.room_code);
                    self.notify(AppEvent::PeerConnected).await;
                    if let Some(signal) = self.negotiator.on_paired()? {
                        self.signaling.send_signal(&signal)?;
                    }
                }
                PeerEvent::RoomFull(code) => {
                    self.notify(AppEvent::RoomFull {
                        room_code: code.clone(),
                    })
                    .await;
                    bail!("Room {} is full", code);
                }
                PeerEvent::RelayError(message) => {
                    warn!("Relay error: {}", message);
                    self.notify(AppEvent::Error(message)).await;
                }
                PeerEvent::Descriptor(descriptor) => {
                    if let Some(signal) = self.negotiator.on_descriptor(descriptor)? {
                        self.signaling.send_signal(&signal)?;
                    }
                }
                PeerEvent::Candidate(candidate) => {
                    if let Err(e) = self.negotiator.on_remote_candidate(candidate) {
                        warn!("Remote candidate rejected: {}", e);
                    }
                }
                PeerEvent::LocalCandidate(candidate) => {
                    let signal = self.negotiator.on_local_candidate(candidate);
                    self.signaling.send_signal(&signal)?;
                }
                PeerEvent::ChannelOpen(channel) => {
                    if let Some(channel) = self.negotiator.on_channel_open(channel) {
                        self.notify(AppEvent::ChannelOpen).await;
                        return Ok(channel);
                    }
                }
                PeerEvent::PeerDisconnected => {
                    info!("Peer left room {} before connecting", self.room_code);
                    self.notify(AppEvent::PeerDisconnected).await;
                    self.negotiator.reset();
                }
                PeerEvent::RelayClosed => {
                    self.relay_open = false;
                    bail!("Relay connection closed before the peer connected");
                }
            }
        }
    }

    /// Send `files`, aborting on peer departure or relay loss
    pub async fn run_sender(
        &mut self,
        mut channel: DataChannel,
        files: &[OutgoingFile],
        sender: &mut TransferSender,
    ) -> Result<(), TransferError> {
        let cancel = CancellationToken::new();
        let transfer = sender.send_files(&mut channel, files, &cancel);
        tokio::pin!(transfer);

        loop {
            tokio::select! {
                result = &mut transfer => return result,
                event = self.events.recv(), if self.relay_open => match event {
                    Some(PeerEvent::PeerDisconnected) => {
                        warn!("Peer disconnected during transfer");
                        cancel.cancel();
                    }
                    Some(PeerEvent::RelayClosed) | None => {
                        warn!("Relay connection lost during transfer");
                        self.relay_open = false;
                        cancel.cancel();
                    }
                    Some(PeerEvent::ChannelOpen(extra)) => extra.close(),
                    Some(other) => debug!("Ignoring {:?} during transfer", other),
                },
            }
        }
    }

    /// Receive until the sender closes the channel. Returns the number of files
    /// received.
    pub async fn run_receiver(
        &mut self,
        mut channel: DataChannel,
        receiver: &mut TransferReceiver,
    ) -> Result<usize, TransferError> {
        let reply = channel.sender().clone();

        loop {
            tokio::select! {
                msg = channel.recv() => match msg {
                    Some(msg) => {
                        if let Err(e) = receiver.handle_message(msg, &reply).await {
                            channel.close();
                            return Err(e);
                        }
                    }
                    None => break,
                },
                event = self.events.recv(), if self.relay_open => match event {
                    Some(PeerEvent::PeerDisconnected) => {
                        if receiver.is_active() {
                            warn!("Peer disconnected mid-file");
                            channel.close();
                            break;
                        }
                        info!("Peer left the room");
                        self.notify(AppEvent::PeerDisconnected).await;
                    }
                    Some(PeerEvent::RelayClosed) | None => {
                        debug!("Relay gone, continuing on the direct channel");
                        self.relay_open = false;
                    }
                    Some(PeerEvent::ChannelOpen(extra)) => extra.close(),
                    Some(other) => debug!("Ignoring {:?} during transfer", other),
                },
            }
        }

        receiver.handle_disconnect().await?;
        let files = receiver.received_files().len();
        self.notify(AppEvent::TransferCompleted { files }).await;
        Ok(files)
    }

    /// Leave the relay and drop any transport state
    pub fn shutdown(&mut self) {
        self.signaling.close();
        self.negotiator.close();
    }

    async fn notify(&self, event: AppEvent) {
        let _ = self.app_events.send(event).await;
    }
}

impl Drop for PeerConnection {
    fn drop(&mut self) {
        self.shutdown();
    }
}
