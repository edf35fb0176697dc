//! Protocol error types for the broker socket layer.
//!
//! This module provides structured error types for protocol-level failures,
//! enabling callers to distinguish between different failure modes.
//!
//! # Error Hierarchy
//!
//! - [`ProtocolError`]: Top-level error for all protocol operations
//! - Variants cover framing, handshake, credential, and I/O failures
//!
//! Dispatch-level failures (unsupported ids, denials, malformed payloads)
//! are not errors at this layer; they are answered with dispatch-failure
//! replies and the connection continues.

use std::io;

use thiserror::Error;

/// Maximum frame size in bytes (16 MiB).
///
/// Frames are capped to prevent memory exhaustion from a hostile peer; the
/// length prefix is validated before any allocation.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Maximum handshake frame size in bytes (64 KiB).
///
/// Handshake messages (Hello/HelloAck/HelloNack) have a stricter limit than
/// general protocol frames: the handshake runs before the peer has proven
/// anything beyond socket access, so the amount of memory and JSON parsing
/// it can demand is kept small.
pub const MAX_HANDSHAKE_FRAME_SIZE: usize = 64 * 1024;

/// Protocol version supported by this implementation.
///
/// Version negotiation occurs during handshake. Clients with incompatible
/// versions are rejected with [`ProtocolError::VersionMismatch`].
pub const PROTOCOL_VERSION: u32 = 1;

/// Protocol errors for the broker socket layer.
///
/// # Error Classification
///
/// - **Framing errors**: issues with frame encoding/decoding
/// - **Handshake errors**: version negotiation failures
/// - **Connection errors**: I/O and connection lifecycle issues
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum allowed size.
    ///
    /// The frame length prefix indicates a size larger than the active
    /// limit. Detected before allocation.
    #[error("frame too large: {size} bytes exceeds maximum {max} bytes")]
    FrameTooLarge {
        /// Actual frame size from length prefix.
        size: usize,
        /// Maximum allowed frame size.
        max: usize,
    },

    /// Frame data is invalid for the current protocol phase.
    ///
    /// Covers empty frames and JSON frames arriving after the handshake
    /// completed (a downgrade attempt).
    #[error("invalid frame: {reason}")]
    InvalidFrame {
        /// Description of the framing error.
        reason: String,
    },

    /// Protocol version mismatch during handshake.
    #[error("version mismatch: client version {client_version}, server version {server_version}")]
    VersionMismatch {
        /// Version requested by client.
        client_version: u32,
        /// Version supported by server.
        server_version: u32,
    },

    /// Handshake protocol failure.
    #[error("handshake failed: {reason}")]
    HandshakeFailed {
        /// Description of the handshake failure.
        reason: String,
    },

    /// Peer credentials could not be read or were unacceptable.
    ///
    /// The reason is logged server-side; peers receive a generic rejection.
    #[error("peer credential check failed: {reason}")]
    CredentialCheck {
        /// Description of the credential failure.
        reason: String,
    },

    /// Connection was closed unexpectedly.
    #[error("connection closed")]
    ConnectionClosed,

    /// Timeout waiting for a response or operation.
    #[error("operation timed out after {duration_ms} ms")]
    Timeout {
        /// Duration in milliseconds before timeout.
        duration_ms: u64,
    },

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization or deserialization error.
    #[error("serialization error: {reason}")]
    Serialization {
        /// Description of the serialization failure.
        reason: String,
    },
}

impl ProtocolError {
    /// Create a frame too large error.
    #[must_use]
    pub const fn frame_too_large(size: usize, max: usize) -> Self {
        Self::FrameTooLarge { size, max }
    }

    /// Create an invalid frame error.
    #[must_use]
    pub fn invalid_frame(reason: impl Into<String>) -> Self {
        Self::InvalidFrame {
            reason: reason.into(),
        }
    }

    /// Create a version mismatch error.
    #[must_use]
    pub const fn version_mismatch(client_version: u32) -> Self {
        Self::VersionMismatch {
            client_version,
            server_version: PROTOCOL_VERSION,
        }
    }

    /// Create a timeout error.
    #[must_use]
    pub const fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Create a handshake failed error.
    #[must_use]
    pub fn handshake_failed(reason: impl Into<String>) -> Self {
        Self::HandshakeFailed {
            reason: reason.into(),
        }
    }

    /// Create a credential check error.
    #[must_use]
    pub fn credential_check(reason: impl Into<String>) -> Self {
        Self::CredentialCheck {
            reason: reason.into(),
        }
    }

    /// Returns `true` if this error indicates a recoverable connection issue.
    ///
    /// Recoverable errors typically indicate transient failures where
    /// retrying the connection may succeed.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::ConnectionClosed)
    }

    /// Returns `true` if this error indicates a protocol violation.
    ///
    /// Protocol violations indicate bugs in the peer implementation or
    /// hostile behavior, and the connection should be terminated.
    #[must_use]
    pub const fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Self::FrameTooLarge { .. }
                | Self::InvalidFrame { .. }
                | Self::VersionMismatch { .. }
                | Self::HandshakeFailed { .. }
        )
    }
}

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
