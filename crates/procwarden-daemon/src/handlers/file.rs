//! File operations: path opens and metadata queries through file handles.

use std::path::{Path, PathBuf};

use tracing::debug;

use procwarden_core::OperationStatus;
use procwarden_core::access::{
    FILE_APPEND_DATA, FILE_READ_ATTRIBUTES, FILE_WRITE_DATA, FileDisposition,
};

use crate::context::RuntimeContext;
use crate::protocol::messages::{FileInformation, FileSystemInformation, MessageBody};
use crate::session::{ClientSession, ObjectKey};

use super::resolve_file;

pub fn query_information_file(
    ctx: &RuntimeContext,
    session: &ClientSession,
    message: &mut super::Message,
) {
    let MessageBody::QueryInformationFile { req, reply } = &mut message.body else {
        debug_assert!(false, "query_information_file invoked with mismatched body");
        return;
    };

    let path = match resolve_file(session, req.file_handle, FILE_READ_ATTRIBUTES) {
        Ok(path) => path,
        Err(status) => {
            reply.status = status as i32;
            return;
        }
    };

    let facts = match ctx.system().file_facts(&path) {
        Ok(facts) => facts,
        Err(err) => {
            reply.status = OperationStatus::from(err) as i32;
            return;
        }
    };

    reply.info = Some(FileInformation {
        path: facts.path,
        size: facts.size,
        mode: facts.mode,
        uid: facts.uid,
        gid: facts.gid,
        modified_unix: facts.modified_unix,
        inode: facts.inode,
    });
    reply.status = OperationStatus::Success as i32;
}

pub fn query_file_system_information(
    ctx: &RuntimeContext,
    session: &ClientSession,
    message: &mut super::Message,
) {
    let MessageBody::QueryFileSystemInformation { req, reply } = &mut message.body else {
        debug_assert!(
            false,
            "query_file_system_information invoked with mismatched body"
        );
        return;
    };

    let path = match resolve_file(session, req.file_handle, FILE_READ_ATTRIBUTES) {
        Ok(path) => path,
        Err(status) => {
            reply.status = status as i32;
            return;
        }
    };

    let facts = match ctx.system().filesystem_facts(&path) {
        Ok(facts) => facts,
        Err(err) => {
            reply.status = OperationStatus::from(err) as i32;
            return;
        }
    };

    reply.info = Some(FileSystemInformation {
        magic: facts.magic,
        block_size: facts.block_size,
        total_bytes: facts.total_bytes,
        free_bytes: facts.free_bytes,
        available_bytes: facts.available_bytes,
    });
    reply.status = OperationStatus::Success as i32;
}

/// Opens a path into the handle table after the host confirms the
/// disposition can be satisfied.
pub fn open_file(ctx: &RuntimeContext, session: &ClientSession, message: &mut super::Message) {
    let MessageBody::OpenFile { req, reply } = &mut message.body else {
        debug_assert!(false, "open_file invoked with mismatched body");
        return;
    };

    let Ok(disposition) = FileDisposition::try_from(req.disposition) else {
        reply.status = OperationStatus::InvalidParameter as i32;
        return;
    };
    if req.path.is_empty() {
        reply.status = OperationStatus::InvalidParameter as i32;
        return;
    }

    let write = req.desired_access & (FILE_WRITE_DATA | FILE_APPEND_DATA) != 0;
    if let Err(err) = ctx
        .system()
        .open_file(Path::new(&req.path), write, disposition)
    {
        reply.status = OperationStatus::from(err) as i32;
        return;
    }

    let key = ObjectKey::File {
        path: PathBuf::from(&req.path),
    };
    let Some(handle) = session.handles().insert(key, req.desired_access) else {
        reply.status = OperationStatus::Unavailable as i32;
        return;
    };

    debug!(
        session_id = %session.session_id(),
        path = %req.path,
        disposition = disposition.name(),
        write,
        "file opened"
    );
    reply.handle = handle;
    reply.status = OperationStatus::Success as i32;
}
