//! Process operations: open, credentials, cgroup, terminate, memory reads,
//! descriptor enumeration and information classes.

use std::time::Instant;

use tracing::{debug, info};

use procwarden_core::OperationStatus;
use procwarden_core::access::{
    PROCESS_QUERY_HANDLES, PROCESS_QUERY_INFORMATION, PROCESS_SET_INFORMATION, PROCESS_TERMINATE,
    PROCESS_VM_READ,
};

use crate::context::RuntimeContext;
use crate::protocol::messages::{
    HandleSummary, INFORMER_PROCESS_LIFECYCLE, MAX_MEMORY_READ_LEN, MemoryMapping, MessageBody,
    PROCESS_INFO_BASIC, PROCESS_INFO_CREDENTIALS, PROCESS_INFO_TRACKING,
    PROCESS_SET_OOM_SCORE_ADJUST, ProcessBasicInformation, ProcessCredentialsInformation,
    ProcessTrackingInformation,
};
use crate::session::{ClientSession, ObjectKey};

use super::resolve_process;

/// Signal delivered when a terminate request leaves the signal field unset.
const DEFAULT_TERMINATE_SIGNAL: i32 = 9;

/// Memory reads go to the host in chunks this large so the session timeout
/// is checked at a reasonable granularity.
const MEMORY_READ_CHUNK: usize = 64 * 1024;

/// Valid range for `oom_score_adj`.
const OOM_SCORE_ADJ_RANGE: std::ops::RangeInclusive<i64> = -1000..=1000;

pub fn open_process(ctx: &RuntimeContext, session: &ClientSession, message: &mut super::Message) {
    let MessageBody::OpenProcess { req, reply } = &mut message.body else {
        debug_assert!(false, "open_process invoked with mismatched body");
        return;
    };

    let facts = match ctx.system().process_facts(req.process_id) {
        Ok(facts) => facts,
        Err(err) => {
            reply.status = OperationStatus::from(err) as i32;
            return;
        }
    };

    let key = ObjectKey::Process {
        pid: facts.pid,
        start_time: facts.start_time,
    };
    let Some(handle) = session.handles().insert(key, req.desired_access) else {
        reply.status = OperationStatus::Unavailable as i32;
        return;
    };

    debug!(
        session_id = %session.session_id(),
        pid = facts.pid,
        desired_access = format_args!("{:#x}", req.desired_access),
        "process opened"
    );
    reply.handle = handle;
    reply.start_time = facts.start_time;
    reply.status = OperationStatus::Success as i32;
}

pub fn open_process_credentials(
    ctx: &RuntimeContext,
    session: &ClientSession,
    message: &mut super::Message,
) {
    let MessageBody::OpenProcessCredentials { req, reply } = &mut message.body else {
        debug_assert!(false, "open_process_credentials invoked with mismatched body");
        return;
    };

    let resolved = match resolve_process(
        ctx,
        session,
        req.process_handle,
        PROCESS_QUERY_INFORMATION,
    ) {
        Ok(resolved) => resolved,
        Err(status) => {
            reply.status = status as i32;
            return;
        }
    };

    let key = ObjectKey::Credentials {
        pid: resolved.pid,
        start_time: resolved.start_time,
    };
    let Some(handle) = session.handles().insert(key, req.desired_access) else {
        reply.status = OperationStatus::Unavailable as i32;
        return;
    };

    reply.handle = handle;
    reply.status = OperationStatus::Success as i32;
}

pub fn open_process_cgroup(
    ctx: &RuntimeContext,
    session: &ClientSession,
    message: &mut super::Message,
) {
    let MessageBody::OpenProcessCgroup { req, reply } = &mut message.body else {
        debug_assert!(false, "open_process_cgroup invoked with mismatched body");
        return;
    };

    let resolved = match resolve_process(
        ctx,
        session,
        req.process_handle,
        PROCESS_QUERY_INFORMATION,
    ) {
        Ok(resolved) => resolved,
        Err(status) => {
            reply.status = status as i32;
            return;
        }
    };

    let path = match ctx.system().process_cgroup_path(resolved.pid) {
        Ok(path) => path,
        Err(err) => {
            reply.status = OperationStatus::from(err) as i32;
            return;
        }
    };

    let Some(handle) = session
        .handles()
        .insert(ObjectKey::Cgroup { path }, req.desired_access)
    else {
        reply.status = OperationStatus::Unavailable as i32;
        return;
    };

    reply.handle = handle;
    reply.status = OperationStatus::Success as i32;
}

pub fn terminate_process(
    ctx: &RuntimeContext,
    session: &ClientSession,
    message: &mut super::Message,
) {
    let MessageBody::TerminateProcess { req, reply } = &mut message.body else {
        debug_assert!(false, "terminate_process invoked with mismatched body");
        return;
    };

    let resolved = match resolve_process(ctx, session, req.process_handle, PROCESS_TERMINATE) {
        Ok(resolved) => resolved,
        Err(status) => {
            reply.status = status as i32;
            return;
        }
    };

    let signal = if req.signal == 0 {
        DEFAULT_TERMINATE_SIGNAL
    } else {
        req.signal
    };

    if let Err(err) = ctx.system().send_signal(resolved.pid, signal) {
        reply.status = OperationStatus::from(err) as i32;
        return;
    }

    info!(
        session_id = %session.session_id(),
        pid = resolved.pid,
        signal,
        "termination signal delivered"
    );
    if session.informer_enabled(INFORMER_PROCESS_LIFECYCLE) {
        info!(
            target: "procwarden::informer",
            session_id = %session.session_id(),
            pid = resolved.pid,
            signal,
            "process termination signaled"
        );
    }
    reply.status = OperationStatus::Success as i32;
}

/// Reads the target's memory in chunks, honoring the session's request
/// timeout between chunks. May block on the host for up to one chunk past
/// the deadline.
pub fn read_process_memory(
    ctx: &RuntimeContext,
    session: &ClientSession,
    message: &mut super::Message,
) {
    let MessageBody::ReadProcessMemory { req, reply } = &mut message.body else {
        debug_assert!(false, "read_process_memory invoked with mismatched body");
        return;
    };

    if req.length > MAX_MEMORY_READ_LEN {
        reply.status = OperationStatus::BufferTooLarge as i32;
        return;
    }

    let resolved = match resolve_process(ctx, session, req.process_handle, PROCESS_VM_READ) {
        Ok(resolved) => resolved,
        Err(status) => {
            reply.status = status as i32;
            return;
        }
    };

    let deadline = Instant::now() + session.request_timeout();
    let mut data = vec![0_u8; req.length as usize];
    let mut filled = 0;

    while filled < data.len() {
        if Instant::now() >= deadline {
            reply.status = OperationStatus::TimedOut as i32;
            return;
        }

        let end = data.len().min(filled + MEMORY_READ_CHUNK);
        let address = req.address + filled as u64;
        match ctx.system().read_memory(resolved.pid, address, &mut data[filled..end]) {
            // The readable range ended short of the request.
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if filled == 0 => {
                reply.status = OperationStatus::from(err) as i32;
                return;
            }
            Err(_) => break,
        }
    }

    data.truncate(filled);
    reply.data = data;
    reply.status = OperationStatus::Success as i32;
}

pub fn enumerate_process_handles(
    ctx: &RuntimeContext,
    session: &ClientSession,
    message: &mut super::Message,
) {
    let MessageBody::EnumerateProcessHandles { req, reply } = &mut message.body else {
        debug_assert!(false, "enumerate_process_handles invoked with mismatched body");
        return;
    };

    let resolved = match resolve_process(ctx, session, req.process_handle, PROCESS_QUERY_HANDLES) {
        Ok(resolved) => resolved,
        Err(status) => {
            reply.status = status as i32;
            return;
        }
    };

    let fds = match ctx.system().enumerate_fds(resolved.pid) {
        Ok(fds) => fds,
        Err(err) => {
            reply.status = OperationStatus::from(err) as i32;
            return;
        }
    };

    reply.handles = fds
        .into_iter()
        .map(|fd| HandleSummary {
            fd: fd.fd,
            target: fd.target,
            flags: fd.flags,
            offset: fd.offset,
        })
        .collect();
    reply.status = OperationStatus::Success as i32;
}

pub fn query_information_process(
    ctx: &RuntimeContext,
    session: &ClientSession,
    message: &mut super::Message,
) {
    let MessageBody::QueryInformationProcess { req, reply } = &mut message.body else {
        debug_assert!(false, "query_information_process invoked with mismatched body");
        return;
    };

    match req.info_class {
        PROCESS_INFO_BASIC => {
            let resolved = match resolve_process(
                ctx,
                session,
                req.process_handle,
                PROCESS_QUERY_INFORMATION,
            ) {
                Ok(resolved) => resolved,
                Err(status) => {
                    reply.status = status as i32;
                    return;
                }
            };
            let facts = match ctx.system().process_facts(resolved.pid) {
                Ok(facts) => facts,
                Err(err) => {
                    reply.status = OperationStatus::from(err) as i32;
                    return;
                }
            };
            reply.basic = Some(ProcessBasicInformation {
                process_id: facts.pid,
                parent_process_id: facts.parent_pid,
                name: facts.name,
                state: facts.state,
                uid: facts.uid,
                gid: facts.gid,
                thread_count: facts.thread_count,
                start_time: facts.start_time,
                virtual_size: facts.virtual_size,
                resident_size: facts.resident_size,
            });
            reply.status = OperationStatus::Success as i32;
        }
        // Tracking data lives in the session's own table; no access bits
        // are needed beyond holding the handle.
        PROCESS_INFO_TRACKING => {
            let resolved = match resolve_process(ctx, session, req.process_handle, 0) {
                Ok(resolved) => resolved,
                Err(status) => {
                    reply.status = status as i32;
                    return;
                }
            };
            let key = ObjectKey::Process {
                pid: resolved.pid,
                start_time: resolved.start_time,
            };
            reply.tracking = Some(ProcessTrackingInformation {
                granted_access: resolved.granted,
                open_count: session.handles().open_count(&key),
            });
            reply.status = OperationStatus::Success as i32;
        }
        PROCESS_INFO_CREDENTIALS => {
            let resolved = match resolve_process(
                ctx,
                session,
                req.process_handle,
                PROCESS_QUERY_INFORMATION,
            ) {
                Ok(resolved) => resolved,
                Err(status) => {
                    reply.status = status as i32;
                    return;
                }
            };
            let creds = match ctx.system().process_credentials(resolved.pid) {
                Ok(creds) => creds,
                Err(err) => {
                    reply.status = OperationStatus::from(err) as i32;
                    return;
                }
            };
            reply.credentials = Some(ProcessCredentialsInformation {
                uid: creds.uid,
                euid: creds.euid,
                gid: creds.gid,
                egid: creds.egid,
                groups: creds.groups,
                cap_effective: creds.cap_effective,
            });
            reply.status = OperationStatus::Success as i32;
        }
        _ => {
            reply.status = OperationStatus::InvalidInfoClass as i32;
        }
    }
}

pub fn set_information_process(
    ctx: &RuntimeContext,
    session: &ClientSession,
    message: &mut super::Message,
) {
    let MessageBody::SetInformationProcess { req, reply } = &mut message.body else {
        debug_assert!(false, "set_information_process invoked with mismatched body");
        return;
    };

    if req.info_class != PROCESS_SET_OOM_SCORE_ADJUST {
        reply.status = OperationStatus::InvalidInfoClass as i32;
        return;
    }
    if !OOM_SCORE_ADJ_RANGE.contains(&req.value) {
        reply.status = OperationStatus::InvalidParameter as i32;
        return;
    }

    let resolved = match resolve_process(ctx, session, req.process_handle, PROCESS_SET_INFORMATION)
    {
        Ok(resolved) => resolved,
        Err(status) => {
            reply.status = status as i32;
            return;
        }
    };

    if let Err(err) = ctx.system().set_oom_score_adjust(resolved.pid, req.value) {
        reply.status = OperationStatus::from(err) as i32;
        return;
    }

    info!(
        session_id = %session.session_id(),
        pid = resolved.pid,
        oom_score_adj = req.value,
        "process oom score adjusted"
    );
    reply.status = OperationStatus::Success as i32;
}

pub fn query_memory_mappings(
    ctx: &RuntimeContext,
    session: &ClientSession,
    message: &mut super::Message,
) {
    let MessageBody::QueryMemoryMappings { req, reply } = &mut message.body else {
        debug_assert!(false, "query_memory_mappings invoked with mismatched body");
        return;
    };

    let resolved = match resolve_process(
        ctx,
        session,
        req.process_handle,
        PROCESS_QUERY_INFORMATION,
    ) {
        Ok(resolved) => resolved,
        Err(status) => {
            reply.status = status as i32;
            return;
        }
    };

    let mut mappings = match ctx.system().memory_mappings(resolved.pid) {
        Ok(mappings) => mappings,
        Err(err) => {
            reply.status = OperationStatus::from(err) as i32;
            return;
        }
    };
    if req.max_entries > 0 {
        mappings.truncate(req.max_entries as usize);
    }

    reply.mappings = mappings
        .into_iter()
        .map(|m| MemoryMapping {
            start: m.start,
            end: m.end,
            permissions: m.permissions,
            offset: m.offset,
            path: m.path,
        })
        .collect();
    reply.status = OperationStatus::Success as i32;
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use procwarden_core::TrustTier;
    use procwarden_core::access::{PROCESS_ALL_ACCESS, PROCESS_READ_ACCESS};

    use super::super::testing::{request, runtime, session_at};
    use super::*;
    use crate::protocol::messages::{
        OpenProcessCgroupRequest, OpenProcessRequest, QueryInformationProcessRequest,
        QueryMemoryMappingsRequest, ReadProcessMemoryRequest, SetInformationProcessRequest,
        TerminateProcessRequest,
    };
    use crate::system::{InMemorySystem, MappingEntry, ProcessCreds, ProcessFacts};

    fn seeded() -> (Arc<InMemorySystem>, RuntimeContext, ClientSession) {
        let system = Arc::new(InMemorySystem::new());
        system.insert_process(ProcessFacts {
            pid: 100,
            parent_pid: 1,
            name: "target".to_string(),
            state: "S".to_string(),
            uid: 1000,
            gid: 1000,
            thread_count: 2,
            start_time: 5000,
            virtual_size: 4096,
            resident_size: 2048,
        });
        let ctx = runtime(&system);
        (system, ctx, session_at(TrustTier::Maximum))
    }

    fn open(session: &ClientSession, granted: u32) -> u64 {
        session
            .handles()
            .insert(
                ObjectKey::Process {
                    pid: 100,
                    start_time: 5000,
                },
                granted,
            )
            .unwrap()
    }

    #[test]
    fn open_process_returns_handle_and_start_time() {
        let (_system, ctx, session) = seeded();
        let mut message = request(MessageBody::OpenProcess {
            req: OpenProcessRequest {
                process_id: 100,
                desired_access: PROCESS_READ_ACCESS,
            },
            reply: Default::default(),
        });

        open_process(&ctx, &session, &mut message);

        let MessageBody::OpenProcess { reply, .. } = &message.body else {
            panic!("body changed shape");
        };
        assert_eq!(reply.status(), OperationStatus::Success);
        assert_ne!(reply.handle, 0);
        assert_eq!(reply.start_time, 5000);
        assert_eq!(session.handles().len(), 1);
    }

    #[test]
    fn open_process_for_dead_pid_is_not_found() {
        let (_system, ctx, session) = seeded();
        let mut message = request(MessageBody::OpenProcess {
            req: OpenProcessRequest {
                process_id: 404,
                desired_access: 0,
            },
            reply: Default::default(),
        });

        open_process(&ctx, &session, &mut message);

        let MessageBody::OpenProcess { reply, .. } = &message.body else {
            panic!("body changed shape");
        };
        assert_eq!(reply.status(), OperationStatus::NotFound);
        assert!(session.handles().is_empty());
    }

    #[test]
    fn terminate_maps_signal_zero_to_sigkill() {
        let (system, ctx, session) = seeded();
        let handle = open(&session, PROCESS_ALL_ACCESS);
        let mut message = request(MessageBody::TerminateProcess {
            req: TerminateProcessRequest {
                process_handle: handle,
                signal: 0,
            },
            reply: Default::default(),
        });

        terminate_process(&ctx, &session, &mut message);

        let MessageBody::TerminateProcess { reply, .. } = &message.body else {
            panic!("body changed shape");
        };
        assert_eq!(reply.status(), OperationStatus::Success);
        assert_eq!(system.sent_signals(), vec![(100, 9)]);
    }

    #[test]
    fn terminate_requires_the_terminate_bit() {
        let (system, ctx, session) = seeded();
        let handle = open(&session, PROCESS_READ_ACCESS);
        let mut message = request(MessageBody::TerminateProcess {
            req: TerminateProcessRequest {
                process_handle: handle,
                signal: 15,
            },
            reply: Default::default(),
        });

        terminate_process(&ctx, &session, &mut message);

        let MessageBody::TerminateProcess { reply, .. } = &message.body else {
            panic!("body changed shape");
        };
        assert_eq!(reply.status(), OperationStatus::InvalidHandle);
        assert!(system.sent_signals().is_empty());
    }

    #[test]
    fn memory_read_returns_seeded_bytes() {
        let (system, ctx, session) = seeded();
        system.add_memory_region(100, 0x1000, vec![7; 32]);
        let handle = open(&session, PROCESS_VM_READ);
        let mut message = request(MessageBody::ReadProcessMemory {
            req: ReadProcessMemoryRequest {
                process_handle: handle,
                address: 0x1000,
                length: 16,
            },
            reply: Default::default(),
        });

        read_process_memory(&ctx, &session, &mut message);

        let MessageBody::ReadProcessMemory { reply, .. } = &message.body else {
            panic!("body changed shape");
        };
        assert_eq!(reply.status(), OperationStatus::Success);
        assert_eq!(reply.data, vec![7; 16]);
    }

    #[test]
    fn memory_read_truncates_at_region_end() {
        let (system, ctx, session) = seeded();
        system.add_memory_region(100, 0x1000, vec![9; 8]);
        let handle = open(&session, PROCESS_VM_READ);
        let mut message = request(MessageBody::ReadProcessMemory {
            req: ReadProcessMemoryRequest {
                process_handle: handle,
                address: 0x1000,
                length: 64,
            },
            reply: Default::default(),
        });

        read_process_memory(&ctx, &session, &mut message);

        let MessageBody::ReadProcessMemory { reply, .. } = &message.body else {
            panic!("body changed shape");
        };
        assert_eq!(reply.status(), OperationStatus::Success);
        assert_eq!(reply.data, vec![9; 8]);
    }

    #[test]
    fn memory_read_refuses_oversized_requests() {
        let (_system, ctx, session) = seeded();
        let handle = open(&session, PROCESS_VM_READ);
        let mut message = request(MessageBody::ReadProcessMemory {
            req: ReadProcessMemoryRequest {
                process_handle: handle,
                address: 0,
                length: MAX_MEMORY_READ_LEN + 1,
            },
            reply: Default::default(),
        });

        read_process_memory(&ctx, &session, &mut message);

        let MessageBody::ReadProcessMemory { reply, .. } = &message.body else {
            panic!("body changed shape");
        };
        assert_eq!(reply.status(), OperationStatus::BufferTooLarge);
    }

    #[test]
    fn unreadable_address_is_unavailable() {
        let (_system, ctx, session) = seeded();
        let handle = open(&session, PROCESS_VM_READ);
        let mut message = request(MessageBody::ReadProcessMemory {
            req: ReadProcessMemoryRequest {
                process_handle: handle,
                address: 0xdead_0000,
                length: 8,
            },
            reply: Default::default(),
        });

        read_process_memory(&ctx, &session, &mut message);

        let MessageBody::ReadProcessMemory { reply, .. } = &message.body else {
            panic!("body changed shape");
        };
        assert_eq!(reply.status(), OperationStatus::Unavailable);
        assert!(reply.data.is_empty());
    }

    #[test]
    fn query_basic_information_fills_facts() {
        let (_system, ctx, session) = seeded();
        let handle = open(&session, PROCESS_QUERY_INFORMATION);
        let mut message = request(MessageBody::QueryInformationProcess {
            req: QueryInformationProcessRequest {
                process_handle: handle,
                info_class: PROCESS_INFO_BASIC,
            },
            reply: Default::default(),
        });

        query_information_process(&ctx, &session, &mut message);

        let MessageBody::QueryInformationProcess { reply, .. } = &message.body else {
            panic!("body changed shape");
        };
        assert_eq!(reply.status(), OperationStatus::Success);
        let basic = reply.basic.as_ref().unwrap();
        assert_eq!(basic.process_id, 100);
        assert_eq!(basic.parent_process_id, 1);
        assert_eq!(basic.name, "target");
        assert_eq!(basic.thread_count, 2);
        assert!(reply.tracking.is_none());
        assert!(reply.credentials.is_none());
    }

    #[test]
    fn query_tracking_reports_grant_and_open_count() {
        let (_system, ctx, session) = seeded();
        let first = open(&session, PROCESS_READ_ACCESS);
        let _second = open(&session, PROCESS_ALL_ACCESS);
        let mut message = request(MessageBody::QueryInformationProcess {
            req: QueryInformationProcessRequest {
                process_handle: first,
                info_class: PROCESS_INFO_TRACKING,
            },
            reply: Default::default(),
        });

        query_information_process(&ctx, &session, &mut message);

        let MessageBody::QueryInformationProcess { reply, .. } = &message.body else {
            panic!("body changed shape");
        };
        assert_eq!(reply.status(), OperationStatus::Success);
        let tracking = reply.tracking.as_ref().unwrap();
        assert_eq!(tracking.granted_access, PROCESS_READ_ACCESS);
        assert_eq!(tracking.open_count, 2);
    }

    #[test]
    fn query_credentials_fills_ids_and_caps() {
        let (system, ctx, session) = seeded();
        system.set_credentials(
            100,
            ProcessCreds {
                uid: 1000,
                euid: 1001,
                gid: 1000,
                egid: 1000,
                groups: vec![4, 27],
                cap_effective: 0x1ff,
            },
        );
        let handle = open(&session, PROCESS_QUERY_INFORMATION);
        let mut message = request(MessageBody::QueryInformationProcess {
            req: QueryInformationProcessRequest {
                process_handle: handle,
                info_class: PROCESS_INFO_CREDENTIALS,
            },
            reply: Default::default(),
        });

        query_information_process(&ctx, &session, &mut message);

        let MessageBody::QueryInformationProcess { reply, .. } = &message.body else {
            panic!("body changed shape");
        };
        assert_eq!(reply.status(), OperationStatus::Success);
        let creds = reply.credentials.as_ref().unwrap();
        assert_eq!(creds.euid, 1001);
        assert_eq!(creds.groups, vec![4, 27]);
        assert_eq!(creds.cap_effective, 0x1ff);
    }

    #[test]
    fn unknown_info_class_is_rejected() {
        let (_system, ctx, session) = seeded();
        let handle = open(&session, PROCESS_ALL_ACCESS);
        let mut message = request(MessageBody::QueryInformationProcess {
            req: QueryInformationProcessRequest {
                process_handle: handle,
                info_class: 999,
            },
            reply: Default::default(),
        });

        query_information_process(&ctx, &session, &mut message);

        let MessageBody::QueryInformationProcess { reply, .. } = &message.body else {
            panic!("body changed shape");
        };
        assert_eq!(reply.status(), OperationStatus::InvalidInfoClass);
    }

    #[test]
    fn oom_adjustment_validates_range_then_records() {
        let (system, ctx, session) = seeded();
        let handle = open(&session, PROCESS_ALL_ACCESS);

        let mut out_of_range = request(MessageBody::SetInformationProcess {
            req: SetInformationProcessRequest {
                process_handle: handle,
                info_class: PROCESS_SET_OOM_SCORE_ADJUST,
                value: 2000,
            },
            reply: Default::default(),
        });
        set_information_process(&ctx, &session, &mut out_of_range);
        let MessageBody::SetInformationProcess { reply, .. } = &out_of_range.body else {
            panic!("body changed shape");
        };
        assert_eq!(reply.status(), OperationStatus::InvalidParameter);
        assert!(system.oom_adjusts().is_empty());

        let mut ok = request(MessageBody::SetInformationProcess {
            req: SetInformationProcessRequest {
                process_handle: handle,
                info_class: PROCESS_SET_OOM_SCORE_ADJUST,
                value: -500,
            },
            reply: Default::default(),
        });
        set_information_process(&ctx, &session, &mut ok);
        let MessageBody::SetInformationProcess { reply, .. } = &ok.body else {
            panic!("body changed shape");
        };
        assert_eq!(reply.status(), OperationStatus::Success);
        assert_eq!(system.oom_adjusts(), vec![(100, -500)]);
    }

    #[test]
    fn mappings_respect_the_entry_cap() {
        let (system, ctx, session) = seeded();
        for i in 0..4_u64 {
            system.add_mapping(
                100,
                MappingEntry {
                    start: i * 0x1000,
                    end: (i + 1) * 0x1000,
                    permissions: "r--p".to_string(),
                    offset: 0,
                    path: String::new(),
                },
            );
        }
        let handle = open(&session, PROCESS_QUERY_INFORMATION);
        let mut message = request(MessageBody::QueryMemoryMappings {
            req: QueryMemoryMappingsRequest {
                process_handle: handle,
                max_entries: 2,
            },
            reply: Default::default(),
        });

        query_memory_mappings(&ctx, &session, &mut message);

        let MessageBody::QueryMemoryMappings { reply, .. } = &message.body else {
            panic!("body changed shape");
        };
        assert_eq!(reply.status(), OperationStatus::Success);
        assert_eq!(reply.mappings.len(), 2);
        assert_eq!(reply.mappings[1].start, 0x1000);
    }

    #[test]
    fn cgroup_open_stores_the_resolved_path() {
        let (system, ctx, session) = seeded();
        system.set_cgroup(100, "/system.slice/demo.service");
        let process_handle = open(&session, PROCESS_QUERY_INFORMATION);
        let mut message = request(MessageBody::OpenProcessCgroup {
            req: OpenProcessCgroupRequest {
                process_handle,
                desired_access: 0,
            },
            reply: Default::default(),
        });

        open_process_cgroup(&ctx, &session, &mut message);

        let MessageBody::OpenProcessCgroup { reply, .. } = &message.body else {
            panic!("body changed shape");
        };
        assert_eq!(reply.status(), OperationStatus::Success);
        let table = session.handles();
        let entry = table.get(reply.handle).unwrap();
        assert_eq!(
            entry.key,
            ObjectKey::Cgroup {
                path: "/system.slice/demo.service".to_string()
            }
        );
    }
}
