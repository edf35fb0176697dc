//! In-message operation result codes.
//!
//! A dispatch that reaches its handler always completes from the broker's
//! point of view; whether the operation itself worked is reported inside the
//! reply through [`OperationStatus`]. Transport-level failures (unsupported
//! id, denial, malformed payload) never use these codes.

use std::fmt;

/// Outcome of an operation, carried in every reply message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum OperationStatus {
    /// The operation succeeded and the reply's other fields are valid.
    Success = 0,
    /// A request field was out of range or otherwise unusable.
    InvalidParameter = 1,
    /// The request named a handle the session does not hold, or held with
    /// insufficient access bits.
    InvalidHandle = 2,
    /// The request named an information class the operation does not
    /// implement.
    InvalidInfoClass = 3,
    /// The target process, thread, file, or module does not exist.
    NotFound = 4,
    /// The system refused the operation for the daemon's own credentials.
    AccessDenied = 5,
    /// The target exists but is in a state that prevents the operation.
    Unavailable = 6,
    /// The operation did not finish within the session's request timeout.
    TimedOut = 7,
    /// The requested transfer exceeds the per-operation size limit.
    BufferTooLarge = 8,
    /// An unexpected broker-side failure. Details are logged, not returned.
    Internal = 9,
}

impl OperationStatus {
    /// Whether the reply's payload fields should be trusted.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }

    /// Stable lower-case name used in logs and CLI output.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::InvalidParameter => "invalid-parameter",
            Self::InvalidHandle => "invalid-handle",
            Self::InvalidInfoClass => "invalid-info-class",
            Self::NotFound => "not-found",
            Self::AccessDenied => "access-denied",
            Self::Unavailable => "unavailable",
            Self::TimedOut => "timed-out",
            Self::BufferTooLarge => "buffer-too-large",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
