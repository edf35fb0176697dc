//! Thread operations: open, owning-process open, kernel stack capture and
//! information classes.

use procwarden_core::OperationStatus;
use procwarden_core::access::{
    THREAD_CAPTURE_STACK, THREAD_QUERY_INFORMATION, THREAD_SET_INFORMATION,
};

use crate::context::RuntimeContext;
use crate::protocol::messages::{
    MessageBody, THREAD_INFO_BASIC, THREAD_INFO_KERNEL_STACK, THREAD_SET_PRIORITY,
    ThreadBasicInformation, ThreadKernelStackInformation,
};
use crate::session::{ClientSession, ObjectKey};

use super::resolve_thread;

/// Frames captured when a request leaves `max_frames` unset.
const DEFAULT_MAX_STACK_FRAMES: usize = 64;

/// Upper bound a request may ask for.
const MAX_STACK_FRAMES: u32 = 256;

/// Range of valid nice values.
const NICE_RANGE: std::ops::RangeInclusive<i64> = -20..=19;

pub fn open_thread(ctx: &RuntimeContext, session: &ClientSession, message: &mut super::Message) {
    let MessageBody::OpenThread { req, reply } = &mut message.body else {
        debug_assert!(false, "open_thread invoked with mismatched body");
        return;
    };

    let facts = match ctx.system().thread_facts(req.thread_id) {
        Ok(facts) => facts,
        Err(err) => {
            reply.status = OperationStatus::from(err) as i32;
            return;
        }
    };

    let key = ObjectKey::Thread {
        tid: facts.tid,
        start_time: facts.start_time,
    };
    let Some(handle) = session.handles().insert(key, req.desired_access) else {
        reply.status = OperationStatus::Unavailable as i32;
        return;
    };

    reply.handle = handle;
    reply.status = OperationStatus::Success as i32;
}

/// Opens a process handle to the process owning the thread. The process
/// handle carries the request's own desired access; the tier evaluator has
/// already priced those bits.
pub fn open_thread_process(
    ctx: &RuntimeContext,
    session: &ClientSession,
    message: &mut super::Message,
) {
    let MessageBody::OpenThreadProcess { req, reply } = &mut message.body else {
        debug_assert!(false, "open_thread_process invoked with mismatched body");
        return;
    };

    let resolved = match resolve_thread(ctx, session, req.thread_handle, THREAD_QUERY_INFORMATION)
    {
        Ok(resolved) => resolved,
        Err(status) => {
            reply.status = status as i32;
            return;
        }
    };

    let thread = match ctx.system().thread_facts(resolved.tid) {
        Ok(thread) => thread,
        Err(err) => {
            reply.status = OperationStatus::from(err) as i32;
            return;
        }
    };
    let process = match ctx.system().process_facts(thread.pid) {
        Ok(process) => process,
        Err(err) => {
            reply.status = OperationStatus::from(err) as i32;
            return;
        }
    };

    let key = ObjectKey::Process {
        pid: process.pid,
        start_time: process.start_time,
    };
    let Some(handle) = session.handles().insert(key, req.desired_access) else {
        reply.status = OperationStatus::Unavailable as i32;
        return;
    };

    reply.handle = handle;
    reply.status = OperationStatus::Success as i32;
}

/// Walks the thread's kernel stack. May block while the host resolves it.
pub fn capture_thread_stack(
    ctx: &RuntimeContext,
    session: &ClientSession,
    message: &mut super::Message,
) {
    let MessageBody::CaptureThreadStack { req, reply } = &mut message.body else {
        debug_assert!(false, "capture_thread_stack invoked with mismatched body");
        return;
    };

    if req.max_frames > MAX_STACK_FRAMES {
        reply.status = OperationStatus::InvalidParameter as i32;
        return;
    }
    let max_frames = if req.max_frames == 0 {
        DEFAULT_MAX_STACK_FRAMES
    } else {
        req.max_frames as usize
    };

    let resolved = match resolve_thread(ctx, session, req.thread_handle, THREAD_CAPTURE_STACK) {
        Ok(resolved) => resolved,
        Err(status) => {
            reply.status = status as i32;
            return;
        }
    };

    let frames = match ctx.system().thread_kernel_stack(resolved.tid, max_frames) {
        Ok(frames) => frames,
        Err(err) => {
            reply.status = OperationStatus::from(err) as i32;
            return;
        }
    };

    reply.frames = frames;
    reply.status = OperationStatus::Success as i32;
}

pub fn query_information_thread(
    ctx: &RuntimeContext,
    session: &ClientSession,
    message: &mut super::Message,
) {
    let MessageBody::QueryInformationThread { req, reply } = &mut message.body else {
        debug_assert!(false, "query_information_thread invoked with mismatched body");
        return;
    };

    match req.info_class {
        THREAD_INFO_BASIC => {
            let resolved =
                match resolve_thread(ctx, session, req.thread_handle, THREAD_QUERY_INFORMATION) {
                    Ok(resolved) => resolved,
                    Err(status) => {
                        reply.status = status as i32;
                        return;
                    }
                };
            let facts = match ctx.system().thread_facts(resolved.tid) {
                Ok(facts) => facts,
                Err(err) => {
                    reply.status = OperationStatus::from(err) as i32;
                    return;
                }
            };
            reply.basic = Some(ThreadBasicInformation {
                thread_id: facts.tid,
                process_id: facts.pid,
                name: facts.name,
                state: facts.state,
                wait_channel: facts.wait_channel,
            });
            reply.status = OperationStatus::Success as i32;
        }
        // The stack class needs the capture bit, same as the dedicated
        // capture operation.
        THREAD_INFO_KERNEL_STACK => {
            let resolved =
                match resolve_thread(ctx, session, req.thread_handle, THREAD_CAPTURE_STACK) {
                    Ok(resolved) => resolved,
                    Err(status) => {
                        reply.status = status as i32;
                        return;
                    }
                };
            let frames = match ctx
                .system()
                .thread_kernel_stack(resolved.tid, DEFAULT_MAX_STACK_FRAMES)
            {
                Ok(frames) => frames,
                Err(err) => {
                    reply.status = OperationStatus::from(err) as i32;
                    return;
                }
            };
            reply.kernel_stack = Some(ThreadKernelStackInformation { frames });
            reply.status = OperationStatus::Success as i32;
        }
        _ => {
            reply.status = OperationStatus::InvalidInfoClass as i32;
        }
    }
}

pub fn set_information_thread(
    ctx: &RuntimeContext,
    session: &ClientSession,
    message: &mut super::Message,
) {
    let MessageBody::SetInformationThread { req, reply } = &mut message.body else {
        debug_assert!(false, "set_information_thread invoked with mismatched body");
        return;
    };

    if req.info_class != THREAD_SET_PRIORITY {
        reply.status = OperationStatus::InvalidInfoClass as i32;
        return;
    }
    if !NICE_RANGE.contains(&req.value) {
        reply.status = OperationStatus::InvalidParameter as i32;
        return;
    }

    let resolved = match resolve_thread(ctx, session, req.thread_handle, THREAD_SET_INFORMATION) {
        Ok(resolved) => resolved,
        Err(status) => {
            reply.status = status as i32;
            return;
        }
    };

    if let Err(err) = ctx.system().set_thread_priority(resolved.tid, req.value) {
        reply.status = OperationStatus::from(err) as i32;
        return;
    }

    reply.status = OperationStatus::Success as i32;
}
