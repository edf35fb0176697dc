//! Process inspection and control commands.
//!
//! Each command opens the target with exactly the access bits it needs, so
//! the broker prices the request at the lowest tier that covers it: plain
//! inspection dispatches at medium, while terminate and memory reads require
//! the maximum tier.

use std::path::Path;

use anyhow::{Context, Result};

use procwarden_core::access::{
    PROCESS_QUERY_HANDLES, PROCESS_QUERY_INFORMATION, PROCESS_TERMINATE, PROCESS_VM_READ,
};
use procwarden_daemon::protocol::messages::{PROCESS_INFO_BASIC, PROCESS_INFO_CREDENTIALS};

use crate::client::BrokerClient;

use super::ensure_success;

/// Inspect a process: identity, owner, memory figures, and optionally its
/// descriptors, mappings, and credentials.
pub fn inspect(
    socket_path: &Path,
    pid: u32,
    show_handles: bool,
    show_mappings: bool,
    show_credentials: bool,
) -> Result<()> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    rt.block_on(async {
        let mut client = BrokerClient::connect(socket_path)
            .await
            .context("failed to connect to broker")?;

        let mut access = PROCESS_QUERY_INFORMATION;
        if show_handles {
            access |= PROCESS_QUERY_HANDLES;
        }
        let opened = client
            .open_process(pid, access)
            .await
            .context("failed to open process")?;
        ensure_success("open process", opened.status)?;
        let handle = opened.handle;

        let info = client
            .query_information_process(handle, PROCESS_INFO_BASIC)
            .await
            .context("failed to query process information")?;
        ensure_success("query process information", info.status)?;
        let basic = info
            .basic
            .context("broker returned no basic information")?;

        println!("Process:  {} (pid {})", basic.name, basic.process_id);
        println!("Parent:   {}", basic.parent_process_id);
        println!("State:    {}", basic.state);
        println!("Owner:    uid {} gid {}", basic.uid, basic.gid);
        println!("Threads:  {}", basic.thread_count);
        println!(
            "Memory:   {} virtual, {} resident",
            format_bytes(basic.virtual_size),
            format_bytes(basic.resident_size)
        );
        println!("Started:  {} ticks after boot", basic.start_time);

        if show_credentials {
            let reply = client
                .query_information_process(handle, PROCESS_INFO_CREDENTIALS)
                .await
                .context("failed to query process credentials")?;
            ensure_success("query process credentials", reply.status)?;
            let creds = reply
                .credentials
                .context("broker returned no credentials")?;

            println!("Credentials:");
            println!("  uid {} euid {}", creds.uid, creds.euid);
            println!("  gid {} egid {}", creds.gid, creds.egid);
            println!("  groups: {}", join_groups(&creds.groups));
            println!("  cap_effective: {:#018x}", creds.cap_effective);
        }

        if show_handles {
            let reply = client
                .enumerate_process_handles(handle)
                .await
                .context("failed to enumerate descriptors")?;
            ensure_success("enumerate descriptors", reply.status)?;

            println!();
            println!("{:<6} {:<10} {:>12}  TARGET", "FD", "FLAGS", "OFFSET");
            for entry in &reply.handles {
                println!(
                    "{:<6} {:<#10x} {:>12}  {}",
                    entry.fd, entry.flags, entry.offset, entry.target
                );
            }
        }

        if show_mappings {
            let reply = client
                .query_memory_mappings(handle, 0)
                .await
                .context("failed to query memory mappings")?;
            ensure_success("query memory mappings", reply.status)?;

            println!();
            println!("{:<18} {:<18} {:<5} PATH", "START", "END", "PERMS");
            for mapping in &reply.mappings {
                let path = if mapping.path.is_empty() {
                    "[anon]"
                } else {
                    mapping.path.as_str()
                };
                println!(
                    "{:<#18x} {:<#18x} {:<5} {}",
                    mapping.start, mapping.end, mapping.permissions, path
                );
            }
        }

        Ok(())
    })
}

/// Send a termination signal through a freshly opened terminate handle.
pub fn terminate(socket_path: &Path, pid: u32, signal: i32) -> Result<()> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    rt.block_on(async {
        let mut client = BrokerClient::connect(socket_path)
            .await
            .context("failed to connect to broker")?;

        let opened = client
            .open_process(pid, PROCESS_TERMINATE)
            .await
            .context("failed to open process")?;
        ensure_success("open process", opened.status)?;

        let reply = client
            .terminate_process(opened.handle, signal)
            .await
            .context("failed to terminate process")?;
        ensure_success("terminate process", reply.status)?;

        println!("Sent signal {signal} to pid {pid}");
        Ok(())
    })
}

/// Read a range of the target's memory and print it.
pub fn read_memory(
    socket_path: &Path,
    pid: u32,
    address: u64,
    length: u32,
    plain: bool,
) -> Result<()> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    rt.block_on(async {
        let mut client = BrokerClient::connect(socket_path)
            .await
            .context("failed to connect to broker")?;

        let opened = client
            .open_process(pid, PROCESS_VM_READ)
            .await
            .context("failed to open process")?;
        ensure_success("open process", opened.status)?;

        let reply = client
            .read_process_memory(opened.handle, address, length)
            .await
            .context("failed to read process memory")?;
        ensure_success("read process memory", reply.status)?;

        if reply.data.len() < length as usize {
            eprintln!(
                "short read: {} of {} bytes (range crosses an unmapped page)",
                reply.data.len(),
                length
            );
        }

        if plain {
            println!("{}", hex::encode(&reply.data));
        } else {
            print_hex_dump(address, &reply.data);
        }
        Ok(())
    })
}

fn join_groups(groups: &[u32]) -> String {
    if groups.is_empty() {
        return "-".to_string();
    }
    groups
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Formats bytes to a human-readable string.
fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes < KB {
        format!("{bytes} B")
    } else if bytes < MB {
        format!("{}.{} KB", bytes / KB, (bytes % KB) * 10 / KB)
    } else if bytes < GB {
        format!("{}.{} MB", bytes / MB, (bytes % MB) * 10 / MB)
    } else {
        format!("{}.{} GB", bytes / GB, (bytes % GB) * 10 / GB)
    }
}

/// Classic sixteen-per-row dump with addresses from the requested base.
fn print_hex_dump(base: u64, data: &[u8]) {
    let mut offset = base;
    for chunk in data.chunks(16) {
        let hex_part = chunk
            .iter()
            .map(|byte| format!("{byte:02x}"))
            .collect::<Vec<_>>()
            .join(" ");
        let ascii: String = chunk
            .iter()
            .map(|&byte| {
                if (0x20..0x7f).contains(&byte) {
                    char::from(byte)
                } else {
                    '.'
                }
            })
            .collect();
        println!("{offset:016x}  {hex_part:<47}  |{ascii}|");
        offset = offset.wrapping_add(16);
    }
}
