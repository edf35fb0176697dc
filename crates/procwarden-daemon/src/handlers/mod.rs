//! Per-operation handlers.
//!
//! Every handler has the same shape: destructure the request body, do the
//! work against [`RuntimeContext`], and write a reply with an
//! [`OperationStatus`] in place. Handlers never return errors to the
//! dispatcher; an operation that cannot be performed is still a completed
//! dispatch whose reply says why.
//!
//! Handlers that resolve a process or thread handle re-probe the target's
//! start time first, so a handle from a previous incarnation of a recycled
//! id reports `NotFound` instead of touching the wrong process.
//!
//! # Modules
//!
//! - [`process`]: open, terminate, memory, fd and information operations
//! - [`thread`]: thread open, stack capture and information operations
//! - [`handle`]: session handle-table introspection and manipulation
//! - [`file`]: file open and metadata queries
//! - [`system`]: modules, clock, timeouts, shutdown protection, sysctl
//! - [`informer`]: informer settings and session-token elevation

pub mod file;
pub mod handle;
pub mod informer;
pub mod process;
pub mod system;
pub mod thread;

use procwarden_core::OperationStatus;
use procwarden_core::access::has_all;

use crate::context::RuntimeContext;
use crate::session::{ClientSession, ObjectKey};

use super::protocol::messages::Message;

/// One operation handler. Mutates the message's reply in place; returning
/// without writing a status leaves the seeded `Internal`.
///
/// Handlers may block on the host. The session's request timeout bounds the
/// long-running ones internally; the dispatcher does not enforce it.
pub type HandlerFn = fn(&RuntimeContext, &ClientSession, &mut Message);

/// A process handle resolved against the live system.
#[derive(Debug)]
pub(crate) struct ResolvedProcess {
    pub pid: u32,
    pub start_time: u64,
    pub granted: u32,
}

/// Look up a process handle and confirm the pid still names the same
/// incarnation.
///
/// `required` are the access bits this use of the handle needs; a handle
/// held with fewer reports `InvalidHandle`, same as a handle the session
/// does not hold at all.
pub(crate) fn resolve_process(
    ctx: &RuntimeContext,
    session: &ClientSession,
    handle: u64,
    required: u32,
) -> Result<ResolvedProcess, OperationStatus> {
    let (pid, start_time, granted) = {
        let table = session.handles();
        let entry = table.get(handle).ok_or(OperationStatus::InvalidHandle)?;
        let ObjectKey::Process { pid, start_time } = entry.key else {
            return Err(OperationStatus::InvalidHandle);
        };
        (pid, start_time, entry.granted)
    };

    if !has_all(granted, required) {
        return Err(OperationStatus::InvalidHandle);
    }

    // The stored start time pins the handle to one incarnation of the pid.
    let live = ctx
        .system()
        .process_start_time(pid)
        .map_err(OperationStatus::from)?;
    if live != start_time {
        return Err(OperationStatus::NotFound);
    }

    Ok(ResolvedProcess {
        pid,
        start_time,
        granted,
    })
}

/// A thread handle resolved against the live system.
#[derive(Debug)]
pub(crate) struct ResolvedThread {
    pub tid: u32,
}

pub(crate) fn resolve_thread(
    ctx: &RuntimeContext,
    session: &ClientSession,
    handle: u64,
    required: u32,
) -> Result<ResolvedThread, OperationStatus> {
    let (tid, start_time, granted) = {
        let table = session.handles();
        let entry = table.get(handle).ok_or(OperationStatus::InvalidHandle)?;
        let ObjectKey::Thread { tid, start_time } = entry.key else {
            return Err(OperationStatus::InvalidHandle);
        };
        (tid, start_time, entry.granted)
    };

    if !has_all(granted, required) {
        return Err(OperationStatus::InvalidHandle);
    }

    let live = ctx
        .system()
        .thread_facts(tid)
        .map_err(OperationStatus::from)?;
    if live.start_time != start_time {
        return Err(OperationStatus::NotFound);
    }

    Ok(ResolvedThread { tid })
}

/// A file handle resolved to its path. Liveness is left to the operation;
/// a deleted file surfaces as `NotFound` from the stat it performs.
pub(crate) fn resolve_file(
    session: &ClientSession,
    handle: u64,
    required: u32,
) -> Result<std::path::PathBuf, OperationStatus> {
    let table = session.handles();
    let entry = table.get(handle).ok_or(OperationStatus::InvalidHandle)?;
    let ObjectKey::File { path } = &entry.key else {
        return Err(OperationStatus::InvalidHandle);
    };
    if !has_all(entry.granted, required) {
        return Err(OperationStatus::InvalidHandle);
    }
    Ok(path.clone())
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use uuid::Uuid;

    use procwarden_core::TrustTier;

    use crate::context::RuntimeContext;
    use crate::protocol::credentials::PeerCredentials;
    use crate::protocol::messages::{Message, MessageBody, MessageHeader};
    use crate::session::ClientSession;
    use crate::state::BrokerState;
    use crate::system::InMemorySystem;

    pub(crate) fn runtime(system: &Arc<InMemorySystem>) -> RuntimeContext {
        let system: Arc<dyn crate::system::SystemFacade> = system.clone();
        RuntimeContext::new(system, Arc::new(BrokerState::new()))
    }

    pub(crate) fn session_at(tier: TrustTier) -> ClientSession {
        ClientSession::new(
            Uuid::new_v4(),
            PeerCredentials {
                uid: 1000,
                gid: 1000,
                pid: Some(9999),
            },
            tier,
            30_000,
        )
    }

    /// Wrap a body in a message whose header matches it.
    pub(crate) fn request(body: MessageBody) -> Message {
        Message {
            header: MessageHeader { id: body.id() },
            body,
        }
    }
}
