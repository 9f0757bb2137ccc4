//! Configuration management

use anyhow::Result;
use serde::Deserialize;
use std::path::PathBuf;

/// Directory name used under the platform config/data roots
const APP_DIR_NAME: &str = "mpd-renderer-bridge";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,

    /// Interval of the status poll / state publication loop
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default)]
    pub mpd: MpdConfig,

    #[serde(default)]
    pub hooks: HooksConfig,

    #[serde(default)]
    pub receiver: ReceiverConfig,

    #[serde(default)]
    pub radio: RadioConfig,

    #[serde(default)]
    pub stream: StreamConfig,
}

fn default_port() -> u16 {
    8090
}

fn default_poll_interval_ms() -> u64 {
    1000
}

#[derive(Debug, Clone, Deserialize)]
pub struct MpdConfig {
    #[serde(default = "default_mpd_host")]
    pub host: String,
    #[serde(default = "default_mpd_port")]
    pub port: u16,
    pub password: Option<String>,
    /// Bound on connecting and on each response
    #[serde(default = "default_mpd_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for MpdConfig {
    fn default() -> Self {
        Self {
            host: default_mpd_host(),
            port: default_mpd_port(),
            password: None,
            timeout_ms: default_mpd_timeout_ms(),
        }
    }
}

fn default_mpd_host() -> String {
    "localhost".to_string()
}

fn default_mpd_port() -> u16 {
    6600
}

fn default_mpd_timeout_ms() -> u64 {
    2000
}

/// External helper commands.
///
/// `onstart`, `onplay`, `onpause` and `onstop` are shell command lines.
/// `onvolumechange` and `getexternalvolume` are whitespace-separated argument
/// lists executed directly.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HooksConfig {
    pub onstart: Option<String>,
    pub onplay: Option<String>,
    pub onpause: Option<String>,
    pub onstop: Option<String>,
    pub onvolumechange: Option<String>,
    pub getexternalvolume: Option<String>,
    #[serde(default)]
    pub external_volume_control: bool,
}

/// How the relay's audio reaches the output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiverMode {
    /// The relay plays to its own audio device
    ExternalOutput,
    /// The relay serves HTTP and the player queue plays it
    #[default]
    QueueInjection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReceiverConfig {
    #[serde(default = "default_relay_path")]
    pub relay_path: String,
    /// Port the relay serves `/Songcast.wav` on in queue-injection mode
    #[serde(default = "default_relay_http_port")]
    pub http_port: u16,
    #[serde(default)]
    pub mode: ReceiverMode,
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
    /// Passed to the relay with `-c`
    pub relay_config: Option<String>,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            relay_path: default_relay_path(),
            http_port: default_relay_http_port(),
            mode: ReceiverMode::default(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
            relay_config: None,
        }
    }
}

fn default_relay_path() -> String {
    "sc2mpd".to_string()
}

fn default_relay_http_port() -> u16 {
    8768
}

fn default_handshake_timeout_secs() -> u64 {
    15
}

/// One internet radio channel. `uri` may name the stream itself or a PLS
/// playlist listing it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RadioChannel {
    pub title: String,
    pub uri: String,
    pub art_uri: Option<String>,
}

/// Channels are numbered from 1 in list order
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RadioConfig {
    #[serde(default)]
    pub channels: Vec<RadioChannel>,
}

/// `/stream` relay restrictions
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamConfig {
    /// Hosts `/stream` may fetch from. Empty allows any host.
    #[serde(default)]
    pub allowed_hosts: Vec<String>,
}

/// Get config directory (XDG_CONFIG_HOME or platform default)
pub fn get_config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("MRB_CONFIG_DIR") {
        return PathBuf::from(dir);
    }

    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library/Application Support")
                .join(APP_DIR_NAME);
        }
    }

    #[cfg(target_os = "linux")]
    {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            return PathBuf::from(xdg).join(APP_DIR_NAME);
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".config").join(APP_DIR_NAME);
        }
    }

    // Fallback to current directory
    PathBuf::from(".")
}

/// Get data directory (XDG_DATA_HOME or platform default)
pub fn get_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("MRB_DATA_DIR") {
        return PathBuf::from(dir);
    }

    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library/Application Support")
                .join(APP_DIR_NAME);
        }
    }

    #[cfg(target_os = "linux")]
    {
        if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
            return PathBuf::from(xdg).join(APP_DIR_NAME);
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".local/share").join(APP_DIR_NAME);
        }
    }

    // Fallback to ./data
    PathBuf::from("./data")
}

pub fn load_config() -> Result<Config> {
    let config_dir = get_config_dir();

    let builder = ::config::Config::builder()
        // Start with defaults
        .set_default("port", default_port() as i64)?
        // Load from config file if it exists
        .add_source(
            ::config::File::with_name(&config_dir.join("config").to_string_lossy()).required(false),
        )
        // Override with environment variables (MRB_PORT, MRB_MPD__HOST, etc.)
        .add_source(
            ::config::Environment::with_prefix("MRB")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("stream.allowed_hosts"),
        );

    let config = builder.build()?;

    Ok(config.try_deserialize()?)
}
