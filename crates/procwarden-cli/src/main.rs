//! procwarden - Operator CLI for the process inspection broker.
//!
//! Talks to `procwarden-daemon` over its Unix control socket. Commands run
//! one short exchange each: connect, handshake, issue the requests, print,
//! exit. Sessions are intentionally not reused across invocations; tier
//! elevation therefore lasts for a single command (see `elevate`, which
//! demonstrates the flow end to end on one connection).

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use procwarden_core::TrustTier;
use procwarden_core::config::{BrokerConfig, default_socket_path};

mod client;
mod commands;

/// procwarden - process inspection broker CLI
#[derive(Parser, Debug)]
#[command(name = "procwarden")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the broker configuration file, used to locate the socket
    #[arg(short, long, default_value = "procwarden.toml")]
    config: PathBuf,

    /// Path to the broker control socket
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    // === Broker state ===
    /// Show broker status and session facts
    Status,

    /// Informer settings for this session
    #[command(subcommand)]
    Settings(SettingsCommands),

    /// Per-request timeout for this session
    #[command(subcommand)]
    Timeouts(TimeoutsCommands),

    // === Process inspection and control ===
    /// Inspect a process
    Process {
        /// Target process id
        pid: u32,

        /// List open descriptors
        #[arg(long)]
        handles: bool,

        /// List memory mappings
        #[arg(long)]
        mappings: bool,

        /// Show credentials (requires the maximum tier)
        #[arg(long)]
        credentials: bool,
    },

    /// Send a termination signal to a process (requires the maximum tier)
    Terminate {
        /// Target process id
        pid: u32,

        /// Signal number to deliver
        #[arg(short, long, default_value = "9")]
        signal: i32,
    },

    /// Read a range of a process's memory (requires the maximum tier)
    ReadMemory {
        /// Target process id
        pid: u32,

        /// Start address (0x-prefixed hex or decimal)
        #[arg(value_parser = parse_address)]
        address: u64,

        /// Bytes to read
        length: u32,

        /// Print one line of plain hex instead of a dump
        #[arg(long)]
        plain: bool,
    },

    // === Session tokens ===
    /// Mint a session token against the broker's shared secret
    MintToken {
        /// Path to the token secret file
        #[arg(long)]
        secret_file: Option<PathBuf>,

        /// Name of an environment variable holding the secret
        #[arg(long, conflicts_with = "secret_file")]
        secret_env: Option<String>,

        /// Tier the token grants
        #[arg(long, value_parser = parse_tier)]
        tier: TrustTier,

        /// Token lifetime in seconds
        #[arg(long, default_value = "3600")]
        ttl_secs: u64,
    },

    /// Present a token to raise this session's tier
    Elevate {
        /// Hex token from `procwarden mint-token`
        token: String,
    },
}

#[derive(Subcommand, Debug)]
enum SettingsCommands {
    /// Show the session's informer flags
    Get,

    /// Replace the session's informer flags
    Set {
        /// Enable process lifecycle events
        #[arg(long)]
        lifecycle: bool,

        /// Enable denial notices
        #[arg(long)]
        denials: bool,

        /// Enable session lifecycle events
        #[arg(long)]
        sessions: bool,

        /// Raw flag bits (0x-prefixed hex or decimal), overriding the named
        /// flags
        #[arg(long, value_parser = parse_flag_bits)]
        raw: Option<u64>,
    },
}

#[derive(Subcommand, Debug)]
enum TimeoutsCommands {
    /// Show the session's request timeout
    Get,

    /// Change the session's request timeout
    Set {
        /// New timeout in milliseconds
        timeout_ms: u64,
    },
}

fn parse_address(value: &str) -> Result<u64, String> {
    parse_u64(value).map_err(|()| format!("invalid address '{value}'"))
}

fn parse_flag_bits(value: &str) -> Result<u64, String> {
    parse_u64(value).map_err(|()| format!("invalid flag bits '{value}'"))
}

fn parse_u64(value: &str) -> Result<u64, ()> {
    let parsed = if let Some(digits) = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        u64::from_str_radix(digits, 16)
    } else {
        value.parse()
    };
    parsed.map_err(|_| ())
}

fn parse_tier(value: &str) -> Result<TrustTier, String> {
    match value {
        "low" => Ok(TrustTier::Low),
        "medium" => Ok(TrustTier::Medium),
        "maximum" => Ok(TrustTier::Maximum),
        _ => Err(format!(
            "unknown tier '{value}' (expected low, medium, or maximum)"
        )),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    // CLI flag wins, then the config file, then the built-in default.
    let socket_path = cli.socket.clone().unwrap_or_else(|| {
        if cli.config.exists() {
            if let Ok(config) = BrokerConfig::from_file(&cli.config) {
                return config.daemon.socket_path;
            }
        }
        default_socket_path()
    });

    match cli.command {
        Commands::Status => commands::broker::status(&socket_path),
        Commands::Settings(cmd) => match cmd {
            SettingsCommands::Get => commands::broker::settings_get(&socket_path),
            SettingsCommands::Set {
                lifecycle,
                denials,
                sessions,
                raw,
            } => commands::broker::settings_set(&socket_path, lifecycle, denials, sessions, raw),
        },
        Commands::Timeouts(cmd) => match cmd {
            TimeoutsCommands::Get => commands::broker::timeouts_get(&socket_path),
            TimeoutsCommands::Set { timeout_ms } => {
                commands::broker::timeouts_set(&socket_path, timeout_ms)
            }
        },
        Commands::Process {
            pid,
            handles,
            mappings,
            credentials,
        } => commands::process::inspect(&socket_path, pid, handles, mappings, credentials),
        Commands::Terminate { pid, signal } => {
            commands::process::terminate(&socket_path, pid, signal)
        }
        Commands::ReadMemory {
            pid,
            address,
            length,
            plain,
        } => commands::process::read_memory(&socket_path, pid, address, length, plain),
        Commands::MintToken {
            secret_file,
            secret_env,
            tier,
            ttl_secs,
        } => commands::token::mint(secret_file.as_deref(), secret_env.as_deref(), tier, ttl_secs),
        Commands::Elevate { token } => commands::token::elevate(&socket_path, &token),
    }
}
