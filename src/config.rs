//! Configuration module for sockfetch.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments (and the environment toggles they read) take precedence
//! over config file values. A toggle is on when its variable is set to
//! anything but empty, `0`, `false`, `no`, `off` or `n`.

use crate::destinations::{Destinations, DEFAULT_INDEX};
use clap::builder::FalseyValueParser;
use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "sockfetch")]
#[command(author = "sockfetch authors")]
#[command(version = "0.1.0")]
#[command(about = "Serve and fetch HTTP pages over raw TCP sockets", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Accept connections and answer 3-byte fetch commands
    Serve(ServeArgs),
    /// Fetch one destination and save its content
    Fetch(FetchArgs),
    /// List the destination table
    Destinations,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to bind to (e.g., 0.0.0.0:22034)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// The one command index served unless all commands are allowed
    #[arg(short = 'p', long)]
    pub permitted_command: Option<usize>,

    /// Serve every command index in the destination table
    #[arg(long, env = "SOCKFETCH_ALLOW_ALL_COMMANDS", value_parser = FalseyValueParser::new())]
    pub allow_all_commands: bool,

    /// Answer the permitted command with the local destination
    #[arg(long, env = "SOCKFETCH_LOCAL", value_parser = FalseyValueParser::new())]
    pub local: bool,

    /// Resolve destinations to IPv6 addresses
    #[arg(long, env = "SOCKFETCH_IPV6", value_parser = FalseyValueParser::new())]
    pub ipv6: bool,
}

#[derive(Args, Debug)]
pub struct FetchArgs {
    /// Destination index (see `sockfetch destinations`)
    pub index: Option<usize>,

    /// Resolve the destination to an IPv6 address
    #[arg(long, env = "SOCKFETCH_IPV6", value_parser = FalseyValueParser::new())]
    pub ipv6: bool,

    /// Directory the fetched page is saved to
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// The single command index served by default
    #[serde(default = "default_permitted_command")]
    pub permitted_command: usize,
    #[serde(default)]
    pub allow_all_commands: bool,
    #[serde(default)]
    pub local_destination: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            permitted_command: default_permitted_command(),
            allow_all_commands: false,
            local_destination: false,
        }
    }
}

/// Outbound fetch configuration
#[derive(Debug, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub ipv6: bool,
    /// Remote HTTP port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Send/receive timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Where fetched pages are written
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Replaces the built-in destination table
    pub destinations: Option<Vec<String>>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ipv6: false,
            port: default_port(),
            timeout_secs: default_timeout_secs(),
            output_dir: default_output_dir(),
            destinations: None,
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

fn default_listen() -> String {
    "0.0.0.0:22034".to_string()
}

fn default_permitted_command() -> usize {
    DEFAULT_INDEX
}

fn default_port() -> u16 {
    80
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_log_level() -> String {
    "info".to_string()
}

/// What the process was asked to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Serve,
    Fetch { index: Option<usize> },
    Destinations,
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,
    pub listen: String,
    pub permitted_command: usize,
    pub allow_all_commands: bool,
    pub local_destination: bool,
    pub ipv6: bool,
    pub port: u16,
    pub timeout: Duration,
    pub output_dir: PathBuf,
    pub destinations: Destinations,
    pub log_level: String,
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

    /// Merge CLI args with TOML config (CLI takes precedence)
    pub fn merge(cli: CliArgs, toml_config: TomlConfig) -> Self {
        let server = toml_config.server;
        let client = toml_config.client;

        let mut config = Config {
            mode: Mode::Serve,
            listen: server.listen,
            permitted_command: server.permitted_command,
            allow_all_commands: server.allow_all_commands,
            local_destination: server.local_destination,
            ipv6: client.ipv6,
            port: client.port,
            timeout: Duration::from_secs(client.timeout_secs),
            output_dir: client.output_dir,
            destinations: client
                .destinations
                .map(Destinations::new)
                .unwrap_or_default(),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        };

        match cli.command {
            CliCommand::Serve(args) => {
                if let Some(listen) = args.listen {
                    config.listen = listen;
                }
                if let Some(command) = args.permitted_command {
                    config.permitted_command = command;
                }
                config.allow_all_commands |= args.allow_all_commands;
                config.local_destination |= args.local;
                config.ipv6 |= args.ipv6;
            }
            CliCommand::Fetch(args) => {
                config.mode = Mode::Fetch { index: args.index };
                config.ipv6 |= args.ipv6;
                if let Some(dir) = args.output_dir {
                    config.output_dir = dir;
                }
            }
            CliCommand::Destinations => config.mode = Mode::Destinations,
        }

        config
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
