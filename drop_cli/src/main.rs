use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use drop_core::{AppConfig, AppEvent, OutgoingFile, generate_room_code};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "drop", version, about = "Send files to another device with a short code")]
struct Cli {
    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the rendezvous relay
    Relay {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Send files; prints the code the receiver has to enter
    Send {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Use this code instead of a generated one
        #[arg(long)]
        code: Option<String>,
        /// Relay WebSocket URL, e.g. ws://192.168.1.10:7779/ws
        #[arg(long)]
        relay: Option<String>,
    },
    /// Receive files sent with `code`
    Receive {
        code: String,
        /// Download directory
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long)]
        relay: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let mut config = AppConfig::load();

    match cli.command {
        Command::Relay { host, port } => {
            if let Some(host) = host {
                config.relay.host = host;
            }
            if let Some(port) = port {
                config.relay.port = port;
            }
            run_relay(&config).await
        }
        Command::Send { files, code, relay } => {
            if let Some(url) = relay {
                config.relay.url = Some(url);
            }
            run_send(&config, files, code).await
        }
        Command::Receive { code, out, relay } => {
            if let Some(url) = relay {
                config.relay.url = Some(url);
            }
            if let Some(out) = out {
                config.download_path = out;
            }
            run_receive(&config, &code).await
        }
    }
}

async fn run_relay(config: &AppConfig) -> Result<()> {
    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    drop_core::relay::start_relay_server(&config.relay, Some(cancel)).await
}

async fn run_send(config: &AppConfig, paths: Vec<PathBuf>, code: Option<String>) -> Result<()> {
    let mut files = Vec::with_capacity(paths.len());
    for path in &paths {
        let file = OutgoingFile::from_path(path)
            .await
            .with_context(|| format!("Cannot read {}", path.display()))?;
        files.push(file);
    }

    let code = code.unwrap_or_else(generate_room_code);
    println!("Code: {}", code);

    let (event_tx, event_rx) = mpsc::channel(1000);
    let printer = tokio::spawn(print_events(event_rx));

    let result = drop_peer::send_files(config, &code, files, event_tx).await;
    let _ = printer.await;
    result
}

async fn run_receive(config: &AppConfig, code: &str) -> Result<()> {
    let (event_tx, event_rx) = mpsc::channel(1000);
    let printer = tokio::spawn(print_events(event_rx));

    let result = drop_peer::receive_files(config, code, event_tx).await;
    let _ = printer.await;
    let files = result?;

    if files.is_empty() {
        bail!("Nothing was received");
    }
    for file in &files {
        let path = file.save_to(&config.download_path).await?;
        println!("Saved {}", path.display());
    }
    Ok(())
}

/// Console rendering of transfer events
async fn print_events(mut rx: mpsc::Receiver<AppEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            AppEvent::Status(msg) => println!("{}", msg),
            AppEvent::PeerConnected => println!("Peer connected"),
            AppEvent::PeerDisconnected => println!("Peer disconnected"),
            AppEvent::RoomFull { room_code } => eprintln!("Room {} is full", room_code),
            AppEvent::ChannelOpen => println!("Direct connection established"),
            AppEvent::TransferProgress {
                file_name,
                progress,
                is_sending,
            } => {
                let verb = if is_sending { "Sending" } else { "Receiving" };
                println!("{} {}: {}%", verb, file_name, progress);
            }
            AppEvent::FileSent { file_name } => println!("Sent {}", file_name),
            AppEvent::FileReceived(file) => {
                println!("Received {} ({} bytes)", file.metadata.name, file.metadata.size)
            }
            AppEvent::TransferCompleted { files } => println!("Done: {} file(s)", files),
            AppEvent::TransferFailed(reason) => eprintln!("Transfer failed: {}", reason),
            AppEvent::Error(msg) => eprintln!("Error: {}", msg),
        }
    }
}
