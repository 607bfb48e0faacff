//! Configuration surface for the server, the client transport and the
//! WebSocket dialer.
//!
//! Every struct deserializes from YAML. Durations are written in milliseconds;
//! zero or a negative number disables the timeout.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration used by the `plow` binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen_addr: String,
    pub server: ServerConfig,
    pub transport: TransportConfig,
    pub upgrader: UpgraderConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
            server: ServerConfig::default(),
            transport: TransportConfig::default(),
            upgrader: UpgraderConfig::default(),
        }
    }
}

impl Config {
    /// Loads the YAML file named by `PLOW_CONFIG` (defaults when unset) and
    /// applies the `PLOW_LISTEN` override.
    pub fn load() -> anyhow::Result<Self> {
        let mut cfg = match std::env::var("PLOW_CONFIG") {
            Ok(path) => {
                let raw = std::fs::read_to_string(&path)
                    .map_err(|e| anyhow::anyhow!("reading {path}: {e}"))?;
                Self::from_yaml(&raw)?
            }
            Err(_) => Self::default(),
        };
        if let Ok(listen) = std::env::var("PLOW_LISTEN") {
            cfg.listen_addr = listen;
        }
        Ok(cfg)
    }

    pub fn from_yaml(raw: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }
}

/// Server limits and timeouts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Value of the `Server` response header.
    pub server_name: String,
    /// Longest accepted request line or header line, in bytes.
    pub read_line_max_length: usize,
    /// Longest accepted header block, in bytes.
    pub head_max_length: usize,
    pub max_body_size: u64,
    /// Responses up to this size are compressed in memory so that a
    /// `Content-Length` can be sent; larger ones go out uncompressed.
    pub max_encoding_size: u64,
    #[serde(with = "millis")]
    pub read_timeout: Option<Duration>,
    #[serde(with = "millis")]
    pub write_timeout: Option<Duration>,
    #[serde(with = "millis")]
    pub idle_timeout: Option<Duration>,
    #[serde(with = "millis")]
    pub tls_handshake_timeout: Option<Duration>,
    pub disable_keep_alive: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_name: "plow".to_string(),
            read_line_max_length: 4 * 1024,
            head_max_length: 8 * 1024,
            max_body_size: 10 * 1024 * 1024,
            max_encoding_size: 4 * 1024 * 1024,
            read_timeout: None,
            write_timeout: None,
            idle_timeout: None,
            tls_handshake_timeout: Some(Duration::from_secs(10)),
            disable_keep_alive: false,
        }
    }
}

/// Client round-tripper limits and timeouts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Static proxy URL (`http://`, `https://` or `socks5://`).
    pub proxy: Option<String>,
    #[serde(with = "millis")]
    pub proxy_dial_timeout: Option<Duration>,
    #[serde(with = "millis")]
    pub tls_handshake_timeout: Option<Duration>,
    #[serde(with = "millis")]
    pub read_timeout: Option<Duration>,
    #[serde(with = "millis")]
    pub write_timeout: Option<Duration>,
    pub read_line_max_length: usize,
    pub head_max_length: usize,
    pub max_body_size: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            proxy_dial_timeout: Some(Duration::from_secs(30)),
            tls_handshake_timeout: Some(Duration::from_secs(10)),
            read_timeout: None,
            write_timeout: None,
            read_line_max_length: 4 * 1024,
            head_max_length: 64 * 1024,
            max_body_size: 64 * 1024 * 1024,
        }
    }
}

/// Default cap on one WebSocket message, inflated and reassembled.
pub const DEFAULT_MAX_MESSAGE_SIZE: u64 = 16 * 1024 * 1024;

/// WebSocket client options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WsDialerConfig {
    pub origin: Option<String>,
    pub protocols: Vec<String>,
    pub enable_compression: bool,
    /// Zero disables the limit.
    pub max_frame_size: u64,
    /// Zero disables the limit.
    pub max_message_size: u64,
    #[serde(with = "millis")]
    pub read_timeout: Option<Duration>,
    #[serde(with = "millis")]
    pub write_timeout: Option<Duration>,
}

impl Default for WsDialerConfig {
    fn default() -> Self {
        Self {
            origin: None,
            protocols: Vec::new(),
            enable_compression: false,
            max_frame_size: 0,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            read_timeout: None,
            write_timeout: None,
        }
    }
}

/// WebSocket server options. The protocol selector is attached on
/// [`crate::ws::Upgrader`] itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpgraderConfig {
    pub enable_compression: bool,
    pub max_frame_size: u64,
    pub max_message_size: u64,
    #[serde(with = "millis")]
    pub read_timeout: Option<Duration>,
    #[serde(with = "millis")]
    pub write_timeout: Option<Duration>,
}

impl Default for UpgraderConfig {
    fn default() -> Self {
        Self {
            enable_compression: false,
            max_frame_size: 0,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            read_timeout: None,
            write_timeout: None,
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_u64(d.as_millis() as u64),
            None => s.serialize_u64(0),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let ms = i64::deserialize(d)?;
        Ok((ms > 0).then(|| Duration::from_millis(ms as u64)))
    }
}
