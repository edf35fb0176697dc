//! Configuration parsing and management.
//!
//! The broker reads a single TOML file describing where to listen, how peers
//! map to baseline trust tiers, and the session timeout defaults. Every
//! field has a default so an empty file is a valid configuration; unknown
//! keys are rejected so typos fail loudly instead of silently running with
//! defaults.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::tier::TrustTier;

/// Smallest accepted per-request timeout.
pub const MIN_REQUEST_TIMEOUT_MS: u64 = 100;

/// Largest accepted per-request timeout.
pub const MAX_REQUEST_TIMEOUT_MS: u64 = 60_000;

/// Top-level broker configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct BrokerConfig {
    /// Daemon process settings.
    #[serde(default)]
    pub daemon: DaemonSection,

    /// Peer-to-tier mapping.
    #[serde(default)]
    pub trust: TrustSection,

    /// Session timeout defaults.
    #[serde(default)]
    pub timeouts: TimeoutSection,
}

impl BrokerConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid, contains unknown keys, or
    /// fails [`Self::validate`].
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Check cross-field constraints that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mode = self.daemon.socket_mode;
        if mode & !0o777 != 0 {
            return Err(ConfigError::Validation(format!(
                "daemon.socket_mode {mode:#o} has bits outside the permission range"
            )));
        }
        if mode & 0o007 != 0 {
            return Err(ConfigError::Validation(format!(
                "daemon.socket_mode {mode:#o} grants world access to the control socket"
            )));
        }
        if self.daemon.max_connections == 0 {
            return Err(ConfigError::Validation(
                "daemon.max_connections must be at least 1".to_string(),
            ));
        }
        let timeout = self.timeouts.request_timeout_ms;
        if !(MIN_REQUEST_TIMEOUT_MS..=MAX_REQUEST_TIMEOUT_MS).contains(&timeout) {
            return Err(ConfigError::Validation(format!(
                "timeouts.request_timeout_ms {timeout} is outside \
                 {MIN_REQUEST_TIMEOUT_MS}..={MAX_REQUEST_TIMEOUT_MS}"
            )));
        }
        Ok(())
    }
}

/// Daemon process settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DaemonSection {
    /// Path to the control socket.
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    /// Permission bits for the control socket. Group bits are allowed so a
    /// trusted group can connect; world bits are rejected at validation.
    #[serde(default = "default_socket_mode")]
    pub socket_mode: u32,

    /// Path to the PID file.
    #[serde(default = "default_pid_file")]
    pub pid_file: PathBuf,

    /// Maximum concurrent client sessions.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Port for the localhost Prometheus endpoint. Disabled when absent.
    #[serde(default)]
    pub metrics_port: Option<u16>,

    /// Path to the shared secret used to verify session tokens. Token
    /// elevation is disabled when absent.
    #[serde(default)]
    pub token_secret: Option<PathBuf>,
}

impl Default for DaemonSection {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            socket_mode: default_socket_mode(),
            pid_file: default_pid_file(),
            max_connections: default_max_connections(),
            metrics_port: None,
            token_secret: None,
        }
    }
}

/// Peer-to-tier mapping applied when a connection is accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrustSection {
    /// Baseline tier for peers running as root or as the daemon's own user.
    #[serde(default = "default_root_tier")]
    pub root_tier: TrustTier,

    /// Group whose members receive [`TrustSection::trusted_group_tier`].
    /// No group-based elevation happens when absent.
    #[serde(default)]
    pub trusted_group: Option<String>,

    /// Baseline tier for members of the trusted group.
    #[serde(default = "default_trusted_group_tier")]
    pub trusted_group_tier: TrustTier,

    /// Baseline tier for every other authenticated peer.
    #[serde(default = "default_tier")]
    pub default_tier: TrustTier,
}

impl Default for TrustSection {
    fn default() -> Self {
        Self {
            root_tier: default_root_tier(),
            trusted_group: None,
            trusted_group_tier: default_trusted_group_tier(),
            default_tier: default_tier(),
        }
    }
}

/// Session timeout defaults. Sessions may adjust their own timeouts at
/// runtime within the same bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeoutSection {
    /// Initial per-request timeout for new sessions, in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for TimeoutSection {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

/// Control socket path used when the configuration does not name one.
pub fn default_socket_path() -> PathBuf {
    // ${XDG_RUNTIME_DIR}/procwarden/broker.sock, falling back to /tmp when
    // XDG_RUNTIME_DIR is not set.
    std::env::var("XDG_RUNTIME_DIR").map_or_else(
        |_| PathBuf::from("/tmp/procwarden/broker.sock"),
        |runtime_dir| {
            PathBuf::from(runtime_dir)
                .join("procwarden")
                .join("broker.sock")
        },
    )
}

const fn default_socket_mode() -> u32 {
    0o600
}

fn default_pid_file() -> PathBuf {
    PathBuf::from("/var/run/procwarden/procwarden.pid")
}

const fn default_max_connections() -> usize {
    64
}

const fn default_root_tier() -> TrustTier {
    TrustTier::Maximum
}

const fn default_trusted_group_tier() -> TrustTier {
    TrustTier::Medium
}

const fn default_tier() -> TrustTier {
    TrustTier::Low
}

const fn default_request_timeout_ms() -> u64 {
    30_000
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// I/O error reading configuration file.
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Validation error.
    #[error("configuration validation failed: {0}")]
    Validation(String),
}
