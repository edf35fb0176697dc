//! Operator subcommands.
//!
//! Every command is a synchronous entry point: it builds its own
//! current-thread runtime, connects to the broker, runs one short exchange,
//! and prints a human-readable result. Transport failures surface through
//! [`crate::client::ClientError`]; an operation that dispatched but reported
//! a non-success status is turned into an error here, with the status name
//! in the message.

pub mod broker;
pub mod process;
pub mod token;

use anyhow::{Result, anyhow, bail};

use procwarden_core::{OperationStatus, TrustTier};

/// Bails with the reply's status name unless it reports success.
pub(crate) fn ensure_success(op: &str, raw_status: i32) -> Result<()> {
    let status = OperationStatus::try_from(raw_status)
        .map_err(|_| anyhow!("{op} returned unknown status code {raw_status}"))?;
    if status.is_success() {
        return Ok(());
    }
    bail!("{op} failed: {status}");
}

/// Status name for display, tolerating values this build does not know.
pub(crate) fn status_label(raw_status: i32) -> String {
    OperationStatus::try_from(raw_status).map_or_else(
        |_| format!("unknown status {raw_status}"),
        |status| status.name().to_string(),
    )
}

/// Tier name for a wire repr, tolerating values this build does not know.
pub(crate) fn tier_label(raw_tier: u32) -> String {
    u8::try_from(raw_tier)
        .ok()
        .and_then(TrustTier::from_repr)
        .map_or_else(
            || format!("unknown tier {raw_tier}"),
            |tier| tier.name().to_string(),
        )
}
