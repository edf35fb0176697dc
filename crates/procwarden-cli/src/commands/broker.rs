//! Broker-level commands: status, informer settings, session timeouts.

use std::path::Path;

use anyhow::{Context, Result};

use procwarden_daemon::protocol::messages::{
    INFORMER_DENIAL_NOTICES, INFORMER_PROCESS_LIFECYCLE, INFORMER_SESSION_LIFECYCLE,
};

use crate::client::BrokerClient;

use super::ensure_success;

/// Show broker identity, clock, and connection facts.
pub fn status(socket_path: &Path) -> Result<()> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    rt.block_on(async {
        let mut client = BrokerClient::connect(socket_path)
            .await
            .context("failed to connect to broker")?;

        let clock = client
            .query_clock()
            .await
            .context("failed to query broker clock")?;
        ensure_success("query clock", clock.status)?;

        let clients = client
            .get_connected_client_count()
            .await
            .context("failed to query client count")?;
        ensure_success("query client count", clients.status)?;

        let timeouts = client
            .get_message_timeouts()
            .await
            .context("failed to query message timeouts")?;
        ensure_success("query message timeouts", timeouts.status)?;

        println!("Server:     {}", client.server_info());
        println!("Session:    {}", client.session_id());
        if !client.capabilities().is_empty() {
            println!("Supports:   {}", client.capabilities().join(", "));
        }
        println!("Clients:    {} connected", clients.count);
        println!("Monotonic:  {} since boot", format_monotonic(clock.monotonic_ns));
        println!("Realtime:   unix {}", realtime_secs(clock.realtime_unix_ns));
        println!("Boot id:    {}", clock.boot_id);
        println!("Timeout:    {} ms per request", timeouts.request_timeout_ms);
        Ok(())
    })
}

/// Show the session's informer flags.
pub fn settings_get(socket_path: &Path) -> Result<()> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    rt.block_on(async {
        let mut client = BrokerClient::connect(socket_path)
            .await
            .context("failed to connect to broker")?;

        let reply = client
            .get_informer_settings()
            .await
            .context("failed to query informer settings")?;
        ensure_success("query informer settings", reply.status)?;

        print_flags(reply.flags);
        Ok(())
    })
}

/// Replace the session's informer flags.
///
/// `raw` overrides the named flags when given; the broker rejects bits it
/// does not define, so a bad raw value comes back as `invalid-parameter`.
pub fn settings_set(
    socket_path: &Path,
    lifecycle: bool,
    denials: bool,
    sessions: bool,
    raw: Option<u64>,
) -> Result<()> {
    let flags = raw.unwrap_or_else(|| {
        let mut flags = 0;
        if lifecycle {
            flags |= INFORMER_PROCESS_LIFECYCLE;
        }
        if denials {
            flags |= INFORMER_DENIAL_NOTICES;
        }
        if sessions {
            flags |= INFORMER_SESSION_LIFECYCLE;
        }
        flags
    });

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    rt.block_on(async {
        let mut client = BrokerClient::connect(socket_path)
            .await
            .context("failed to connect to broker")?;

        let reply = client
            .set_informer_settings(flags)
            .await
            .context("failed to set informer settings")?;
        ensure_success("set informer settings", reply.status)?;

        print_flags(flags);
        Ok(())
    })
}

/// Show the session's per-request timeout.
pub fn timeouts_get(socket_path: &Path) -> Result<()> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    rt.block_on(async {
        let mut client = BrokerClient::connect(socket_path)
            .await
            .context("failed to connect to broker")?;

        let reply = client
            .get_message_timeouts()
            .await
            .context("failed to query message timeouts")?;
        ensure_success("query message timeouts", reply.status)?;

        println!("Request timeout: {} ms", reply.request_timeout_ms);
        Ok(())
    })
}

/// Change the session's per-request timeout.
pub fn timeouts_set(socket_path: &Path, timeout_ms: u64) -> Result<()> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    rt.block_on(async {
        let mut client = BrokerClient::connect(socket_path)
            .await
            .context("failed to connect to broker")?;

        let reply = client
            .set_message_timeouts(timeout_ms)
            .await
            .context("failed to set message timeouts")?;
        ensure_success("set message timeouts", reply.status)?;

        println!("Request timeout set to {timeout_ms} ms");
        Ok(())
    })
}

fn print_flags(flags: u64) {
    println!("Informer flags: {flags:#x}");
    println!(
        "  process-lifecycle: {}",
        on_off(flags & INFORMER_PROCESS_LIFECYCLE != 0)
    );
    println!(
        "  denial-notices:    {}",
        on_off(flags & INFORMER_DENIAL_NOTICES != 0)
    );
    println!(
        "  session-lifecycle: {}",
        on_off(flags & INFORMER_SESSION_LIFECYCLE != 0)
    );
}

const fn on_off(set: bool) -> &'static str {
    if set { "on" } else { "off" }
}

/// Formats a monotonic nanosecond reading as seconds with millisecond
/// precision.
fn format_monotonic(ns: u64) -> String {
    format!("{}.{:03}s", ns / 1_000_000_000, (ns % 1_000_000_000) / 1_000_000)
}

/// Whole unix seconds from a realtime nanosecond reading.
fn realtime_secs(ns: i64) -> i64 {
    ns.div_euclid(1_000_000_000)
}
