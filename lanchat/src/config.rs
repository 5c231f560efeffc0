//! Configuration for the `lanchat` binary.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/lanchat/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::node::NodeOptions;
use crate::transport::DEFAULT_PORT;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// An address setting is not an IP address (with optional port).
    #[error("invalid address {0:?}: expected an IP address, optionally with :port")]
    InvalidAddress(String),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    user: UserFileConfig,
    network: NetworkFileConfig,
    storage: StorageFileConfig,
}

/// `[user]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct UserFileConfig {
    name: Option<String>,
}

/// `[network]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct NetworkFileConfig {
    join: Option<String>,
    port: Option<u16>,
    bind: Option<String>,
    connect_timeout_secs: Option<u64>,
    feed_buffer: Option<usize>,
}

/// `[storage]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct StorageFileConfig {
    data_dir: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved configuration.
#[derive(Debug, Clone)]
pub struct LanchatConfig {
    /// Display name as configured; normalised later by the session.
    pub display_name: String,
    /// Host to join; `None` means host mode.
    pub join: Option<String>,
    /// Port the host listens on and clients connect to.
    pub port: u16,
    /// Address the host listener binds.
    pub bind: String,
    /// Time allowed for connecting to a host.
    pub connect_timeout: Duration,
    /// Capacity of the feed channel.
    pub feed_buffer: usize,
    /// Where received attachments are written.
    pub data_dir: PathBuf,
}

impl Default for LanchatConfig {
    fn default() -> Self {
        Self {
            display_name: String::new(),
            join: None,
            port: DEFAULT_PORT,
            bind: Ipv4Addr::UNSPECIFIED.to_string(),
            connect_timeout: Duration::from_secs(10),
            feed_buffer: 64,
            data_dir: default_data_dir(),
        }
    }
}

impl LanchatConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read,
    /// or if any config file cannot be parsed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Loads configuration at process start.
    ///
    /// A file named with `--config` must load. A broken file at the default
    /// location is skipped: the CLI values are used on their own and the
    /// error is handed back so the caller can report it.
    ///
    /// # Errors
    ///
    /// Returns the load error when `--config` was given.
    pub fn load_for_startup(cli: &CliArgs) -> Result<(Self, Option<ConfigError>), ConfigError> {
        match Self::load(cli) {
            Ok(config) => Ok((config, None)),
            Err(e) if cli.config.is_some() => Err(e),
            Err(e) => Ok((Self::resolve(cli, &ConfigFile::default()), Some(e))),
        }
    }

    /// Resolve a `LanchatConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            display_name: cli
                .name
                .clone()
                .or_else(|| file.user.name.clone())
                .unwrap_or(defaults.display_name),
            join: cli.join.clone().or_else(|| file.network.join.clone()),
            port: cli.port.or(file.network.port).unwrap_or(defaults.port),
            bind: cli
                .bind
                .clone()
                .or_else(|| file.network.bind.clone())
                .unwrap_or(defaults.bind),
            connect_timeout: file
                .network
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            feed_buffer: file.network.feed_buffer.unwrap_or(defaults.feed_buffer),
            data_dir: cli
                .data_dir
                .clone()
                .or_else(|| file.storage.data_dir.clone())
                .unwrap_or(defaults.data_dir),
        }
    }

    /// Options for constructing a [`crate::ChatNode`].
    #[must_use]
    pub fn node_options(&self) -> NodeOptions {
        NodeOptions {
            display_name: self.display_name.clone(),
            connect_timeout: self.connect_timeout,
            feed_buffer: self.feed_buffer,
        }
    }

    /// Address the host listener binds.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidAddress`] if `bind` is not an IP.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        parse_addr(&self.bind, self.port)
    }

    /// Host address to join, or `None` in host mode.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidAddress`] if `join` is not an IP,
    /// optionally followed by a port.
    pub fn join_addr(&self) -> Result<Option<SocketAddr>, ConfigError> {
        self.join
            .as_deref()
            .map(|join| parse_addr(join, self.port))
            .transpose()
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Local-network chat: host a room or join one")]
pub struct CliArgs {
    /// Your display name.
    #[arg(short, long, env = "LANCHAT_NAME")]
    pub name: Option<String>,

    /// Host to join (IP or IP:PORT). Without it, this device hosts.
    #[arg(short, long, env = "LANCHAT_JOIN")]
    pub join: Option<String>,

    /// Port to host on or connect to.
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Address to bind the host listener to.
    #[arg(long)]
    pub bind: Option<String>,

    /// Path to config file (default: `~/.config/lanchat/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Directory for received attachments.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "LANCHAT_LOG")]
    pub log_level: String,

    /// Path to log file (default: stderr).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("lanchat")
}

/// Parses `ip` or `ip:port`; a bare IP gets `default_port`.
fn parse_addr(text: &str, default_port: u16) -> Result<SocketAddr, ConfigError> {
    let text = text.trim();
    if let Ok(addr) = text.parse::<SocketAddr>() {
        return Ok(addr);
    }
    text.parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, default_port))
        .map_err(|_| ConfigError::InvalidAddress(text.to_string()))
}

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&Path>) -> Result<ConfigFile, ConfigError> {
    if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    }

    let Some(config_dir) = dirs::config_dir() else {
        return Ok(ConfigFile::default());
    };
    let path = config_dir.join("lanchat").join("config.toml");
    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
