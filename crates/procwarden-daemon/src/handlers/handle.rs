//! Handle-table operations. These act on the session's own bookkeeping and
//! never touch the host.

use procwarden_core::OperationStatus;
use procwarden_core::access::is_subset;

use crate::context::RuntimeContext;
use crate::protocol::messages::{HANDLE_SET_REDUCE_ACCESS, HandleObjectInfo, MessageBody};
use crate::session::ClientSession;

pub fn query_information_handle(
    _ctx: &RuntimeContext,
    session: &ClientSession,
    message: &mut super::Message,
) {
    let MessageBody::QueryInformationHandle { req, reply } = &mut message.body else {
        debug_assert!(false, "query_information_handle invoked with mismatched body");
        return;
    };

    let table = session.handles();
    let Some(entry) = table.get(req.handle) else {
        reply.status = OperationStatus::InvalidHandle as i32;
        return;
    };

    reply.info = Some(HandleObjectInfo {
        kind: entry.key.kind().to_string(),
        granted_access: entry.granted,
        description: entry.key.describe(),
    });
    reply.status = OperationStatus::Success as i32;
}

/// Narrows a handle's granted access in place. The only supported class is
/// [`HANDLE_SET_REDUCE_ACCESS`]; a mask that would widen the grant is
/// refused.
pub fn set_information_handle(
    _ctx: &RuntimeContext,
    session: &ClientSession,
    message: &mut super::Message,
) {
    let MessageBody::SetInformationHandle { req, reply } = &mut message.body else {
        debug_assert!(false, "set_information_handle invoked with mismatched body");
        return;
    };

    if req.info_class != HANDLE_SET_REDUCE_ACCESS {
        reply.status = OperationStatus::InvalidInfoClass as i32;
        return;
    }
    if req.value > u64::from(u32::MAX) {
        reply.status = OperationStatus::InvalidParameter as i32;
        return;
    }
    let new_mask = req.value as u32;

    let mut table = session.handles();
    let Some(entry) = table.get_mut(req.handle) else {
        reply.status = OperationStatus::InvalidHandle as i32;
        return;
    };
    if !is_subset(new_mask, entry.granted) {
        reply.status = OperationStatus::AccessDenied as i32;
        return;
    }

    entry.granted = new_mask;
    reply.status = OperationStatus::Success as i32;
}

/// Duplicates a handle under a new id, optionally narrowing its access.
/// Zero desired access copies the source mask.
pub fn duplicate_handle(
    _ctx: &RuntimeContext,
    session: &ClientSession,
    message: &mut super::Message,
) {
    let MessageBody::DuplicateHandle { req, reply } = &mut message.body else {
        debug_assert!(false, "duplicate_handle invoked with mismatched body");
        return;
    };

    let mut table = session.handles();
    let (key, granted) = {
        let Some(entry) = table.get(req.source_handle) else {
            reply.status = OperationStatus::InvalidHandle as i32;
            return;
        };
        (entry.key.clone(), entry.granted)
    };

    let desired = if req.desired_access == 0 {
        granted
    } else {
        req.desired_access
    };
    if !is_subset(desired, granted) {
        reply.status = OperationStatus::AccessDenied as i32;
        return;
    }

    let Some(handle) = table.insert(key, desired) else {
        reply.status = OperationStatus::Unavailable as i32;
        return;
    };

    reply.handle = handle;
    reply.status = OperationStatus::Success as i32;
}

pub fn compare_handles(
    _ctx: &RuntimeContext,
    session: &ClientSession,
    message: &mut super::Message,
) {
    let MessageBody::CompareHandles { req, reply } = &mut message.body else {
        debug_assert!(false, "compare_handles invoked with mismatched body");
        return;
    };

    let table = session.handles();
    let Some(first) = table.get(req.first_handle) else {
        reply.status = OperationStatus::InvalidHandle as i32;
        return;
    };
    let Some(second) = table.get(req.second_handle) else {
        reply.status = OperationStatus::InvalidHandle as i32;
        return;
    };

    reply.same_object = first.key == second.key;
    reply.status = OperationStatus::Success as i32;
}
