//! Configuration module for the ackd server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments for the server
#[derive(Parser, Debug)]
#[command(name = "ackd")]
#[command(author = "ackd authors")]
#[command(version = "0.1.0")]
#[command(about = "Logs each received message and acknowledges it after a delay")]
#[command(long_about = None)]
pub struct CliArgs {
    /// Port to listen on (0 picks an ephemeral port)
    pub port: Option<u16>,

    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Delay between logging a message and acknowledging it, in milliseconds
    #[arg(short = 'd', long)]
    pub ack_delay_ms: Option<u64>,

    /// Message log path (defaults to `<port>.txt`)
    #[arg(short = 'o', long)]
    pub log_file: Option<PathBuf>,

    /// Submission queue entries for the io_uring instance
    #[arg(long)]
    pub ring_size: Option<u32>,

    /// Maximum completions dispatched per loop iteration
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Number of receive buffers (bounds concurrently reading connections)
    #[arg(short = 'm', long)]
    pub max_connections: Option<usize>,

    /// Allocate the receive buffer at accept time instead of on readiness
    #[arg(long)]
    pub eager_receive: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub ack: AckConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_backlog")]
    pub backlog: i32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            backlog: default_backlog(),
        }
    }
}

/// Event loop configuration
#[derive(Debug, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_ring_size")]
    pub ring_size: u32,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default)]
    pub eager_receive: bool,
    /// How often the loop wakes up to check for shutdown
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            ring_size: default_ring_size(),
            batch_size: default_batch_size(),
            max_connections: default_max_connections(),
            eager_receive: false,
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

/// Acknowledgment and message log configuration
#[derive(Debug, Deserialize)]
pub struct AckConfig {
    #[serde(default = "default_ack_delay_ms")]
    pub delay_ms: u64,
    pub log_file: Option<PathBuf>,
}

impl Default for AckConfig {
    fn default() -> Self {
        Self {
            delay_ms: default_ack_delay_ms(),
            log_file: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    1337
}

fn default_backlog() -> i32 {
    512
}

fn default_ring_size() -> u32 {
    1024
}

fn default_batch_size() -> usize {
    256
}

fn default_max_connections() -> usize {
    1024
}

fn default_tick_interval_ms() -> u64 {
    100
}

fn default_ack_delay_ms() -> u64 {
    3000 // 3 seconds
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub backlog: i32,
    pub ring_size: u32,
    pub batch_size: usize,
    pub max_connections: usize,
    pub eager_receive: bool,
    pub tick_interval: Duration,
    pub ack_delay: Duration,
    /// Explicit message log path; `None` means `<bound port>.txt`.
    pub log_file: Option<PathBuf>,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::merge(
            CliArgs {
                port: None,
                config: None,
                host: None,
                ack_delay_ms: None,
                log_file: None,
                ring_size: None,
                batch_size: None,
                max_connections: None,
                eager_receive: false,
                log_level: default_log_level(),
            },
            TomlConfig::default(),
        )
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Ok(Self::merge(cli, toml_config))
    }

    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Self {
        Config {
            host: cli.host.unwrap_or(toml_config.server.host),
            port: cli.port.unwrap_or(toml_config.server.port),
            backlog: toml_config.server.backlog,
            ring_size: cli.ring_size.unwrap_or(toml_config.runtime.ring_size),
            batch_size: cli.batch_size.unwrap_or(toml_config.runtime.batch_size),
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.runtime.max_connections),
            eager_receive: cli.eager_receive || toml_config.runtime.eager_receive,
            // A zero interval would turn the shutdown tick into a busy loop
            tick_interval: Duration::from_millis(toml_config.runtime.tick_interval_ms.max(1)),
            ack_delay: Duration::from_millis(
                cli.ack_delay_ms.unwrap_or(toml_config.ack.delay_ms),
            ),
            log_file: cli.log_file.or(toml_config.ack.log_file),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        }
    }

    /// Message log path for a server bound to `port`.
    pub fn log_path(&self, port: u16) -> PathBuf {
        self.log_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("{port}.txt")))
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 1337);
        assert_eq!(config.backlog, 512);
        assert_eq!(config.batch_size, 256);
        assert_eq!(config.ack_delay, Duration::from_secs(3));
        assert!(!config.eager_receive);
        assert_eq!(config.log_path(1337), PathBuf::from("1337.txt"));
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            host = "127.0.0.1"
            port = 14880

            [runtime]
            ring_size = 256
            max_connections = 64
            eager_receive = true

            [ack]
            delay_ms = 500
            log_file = "/tmp/messages.txt"

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 14880);
        assert_eq!(config.server.backlog, 512);
        assert_eq!(config.runtime.ring_size, 256);
        assert_eq!(config.runtime.batch_size, 256);
        assert_eq!(config.runtime.max_connections, 64);
        assert!(config.runtime.eager_receive);
        assert_eq!(config.ack.delay_ms, 500);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_cli_overrides_toml() {
        let cli = CliArgs::parse_from([
            "ackd",
            "1488",
            "--ack-delay-ms",
            "10",
            "-o",
            "out.txt",
        ]);
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [server]
            port = 14880
            [ack]
            delay_ms = 500
            "#,
        )
        .unwrap();

        let config = Config::merge(cli, toml_config);
        assert_eq!(config.port, 1488);
        assert_eq!(config.ack_delay, Duration::from_millis(10));
        assert_eq!(config.log_path(1488), PathBuf::from("out.txt"));
    }

    #[test]
    fn test_zero_tick_interval_clamped() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [runtime]
            tick_interval_ms = 0
            "#,
        )
        .unwrap();

        let config = Config::merge(CliArgs::parse_from(["ackd"]), toml_config);
        assert_eq!(config.tick_interval, Duration::from_millis(1));
    }
}
