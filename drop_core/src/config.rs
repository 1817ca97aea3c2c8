use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::transfer::constants::{CHUNK_SIZE, HIGH_WATER_MARK, LOW_WATER_MARK};

const APP_QUALIFIER: &str = "com";
const APP_ORGANIZATION: &str = "drop";
const APP_NAME: &str = "code_drop";
const CONFIG_FILE: &str = "config.json";

/// Default relay port
pub const RELAY_PORT: u16 = 7779;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Address the relay binds to
    pub host: String,
    pub port: u16,
    /// WebSocket URL peers dial; derived from host/port when unset
    pub url: Option<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: RELAY_PORT,
            url: None,
        }
    }
}

impl RelayConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// URL a peer should dial to reach this relay
    pub fn ws_url(&self) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }
        let host = if self.host == "0.0.0.0" {
            "127.0.0.1"
        } else {
            self.host.as_str()
        };
        format!("ws://{}:{}/ws", host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    pub chunk_size: usize,
    /// Sender suspends once the channel buffers more than this
    pub high_water_mark: u64,
    /// ...and resumes once it drains to this
    pub low_water_mark: u64,
    /// None waits for the channel to drain forever
    pub backpressure_timeout_secs: Option<u64>,
    /// Wait for `transfer-ack` of a file before announcing the next one
    pub wait_for_ack_per_file: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            high_water_mark: HIGH_WATER_MARK,
            low_water_mark: LOW_WATER_MARK,
            backpressure_timeout_secs: None,
            wait_for_ack_per_file: false,
        }
    }
}

impl TransferConfig {
    pub fn backpressure_timeout(&self) -> Option<Duration> {
        self.backpressure_timeout_secs.map(Duration::from_secs)
    }
}

/// Direct TCP channel between the two peers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectConfig {
    /// Addresses advertised as candidates; empty means loopback plus the LAN address
    pub advertise_hosts: Vec<String>,
    pub connect_timeout_secs: u64,
}

impl Default for DirectConfig {
    fn default() -> Self {
        Self {
            advertise_hosts: Vec::new(),
            connect_timeout_secs: 5,
        }
    }
}

impl DirectConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }
}

/// Checks applied by the sender before anything goes on the wire
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SendLimits {
    pub max_files: Option<usize>,
    pub max_file_size: Option<u64>,
    /// e.g. "image/" to only allow images
    pub allowed_mime_prefix: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub relay: RelayConfig,
    pub transfer: TransferConfig,
    pub direct: DirectConfig,
    pub limits: SendLimits,
    pub download_path: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        // ~/code_drop on every platform
        let download_path = directories::UserDirs::new()
            .map(|dirs| dirs.home_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_NAME);

        Self {
            relay: RelayConfig::default(),
            transfer: TransferConfig::default(),
            direct: DirectConfig::default(),
            limits: SendLimits::default(),
            download_path,
        }
    }
}

impl AppConfig {
    /// Get the config file path
    fn get_config_path() -> Option<PathBuf> {
        if let Ok(dir) = std::env::var("DROP_CONFIG_DIR") {
            return Some(PathBuf::from(dir).join(CONFIG_FILE));
        }

        get_config_dir().map(|dir| dir.join(CONFIG_FILE))
    }

    /// Load config from disk (or defaults), then apply `.env` and environment overrides
    pub fn load() -> Self {
        let _ = dotenvy::dotenv();

        let mut config = match Self::get_config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        };
        config.apply_env();
        config.validate();
        config
    }

    /// Read a config file; missing or unparsable files fall back to defaults
    pub fn load_from(path: &PathBuf) -> Self {
        match fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("Ignoring invalid config {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    /// Save config to disk
    pub fn save(&self) {
        let path = match Self::get_config_path() {
            Some(p) => p,
            None => return,
        };

        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }

        if let Ok(json) = serde_json::to_string_pretty(self) {
            if let Err(e) = fs::write(&path, json) {
                tracing::warn!("Could not save config {}: {}", path.display(), e);
            }
        }
    }

    fn apply_env(&mut self) {
        if let Ok(host) = std::env::var("DROP_RELAY_HOST") {
            self.relay.host = host;
        }
        if let Ok(port) = std::env::var("DROP_RELAY_PORT") {
            match port.parse() {
                Ok(port) => self.relay.port = port,
                Err(_) => tracing::warn!("Ignoring invalid DROP_RELAY_PORT: {}", port),
            }
        }
        if let Ok(url) = std::env::var("DROP_RELAY_URL") {
            self.relay.url = Some(url);
        }
    }

    /// Normalise values the transfer code cannot work with
    pub fn validate(&mut self) {
        let transfer = &mut self.transfer;
        if transfer.chunk_size == 0 {
            tracing::warn!("chunk_size 0 is invalid, using {}", CHUNK_SIZE);
            transfer.chunk_size = CHUNK_SIZE;
        }
        if transfer.low_water_mark > transfer.high_water_mark {
            tracing::warn!(
                "low_water_mark {} above high_water_mark {}, clamping",
                transfer.low_water_mark,
                transfer.high_water_mark
            );
            transfer.low_water_mark = transfer.high_water_mark;
        }
    }
}

/// Get the config directory path for this app
pub fn get_config_dir() -> Option<PathBuf> {
    ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
        .map(|dirs| dirs.config_dir().to_path_buf())
}
