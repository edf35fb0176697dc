//! Required-tier evaluators.
//!
//! Each catalog entry may carry one of these functions; the dispatcher calls
//! it on every request, before authorization, with no caching between calls.
//! Three constant evaluators cover operations whose price ignores the
//! payload. The content-sensitive ones inspect request fields and follow one
//! rule throughout: any payload shape they do not explicitly recognize is
//! priced at [`TrustTier::Maximum`], never below.

use procwarden_core::TrustTier;
use procwarden_core::access::{
    self, CGROUP_READ_ACCESS, CREDENTIALS_READ_ACCESS, FILE_READ_ACCESS, FileDisposition,
    PROCESS_READ_ACCESS, THREAD_READ_ACCESS,
};

use super::messages::{
    Message, MessageBody, PROCESS_INFO_BASIC, PROCESS_INFO_TRACKING, THREAD_INFO_BASIC,
    THREAD_INFO_KERNEL_STACK,
};

/// Computes the minimum tier a request requires from its contents.
///
/// Evaluators never fail; an unreadable or mismatched payload prices as
/// [`TrustTier::Maximum`].
pub type RequiredTierFn = fn(&Message) -> TrustTier;

// ============================================================================
// Constant evaluators
// ============================================================================

pub fn require_low(_message: &Message) -> TrustTier {
    TrustTier::Low
}

pub fn require_medium(_message: &Message) -> TrustTier {
    TrustTier::Medium
}

pub fn require_maximum(_message: &Message) -> TrustTier {
    TrustTier::Maximum
}

// ============================================================================
// Content-sensitive evaluators
// ============================================================================

/// Medium iff `desired` stays inside the class's read-only mask.
const fn price_open(desired: u32, read_mask: u32) -> TrustTier {
    if access::is_subset(desired, read_mask) {
        TrustTier::Medium
    } else {
        TrustTier::Maximum
    }
}

pub fn open_process(message: &Message) -> TrustTier {
    let MessageBody::OpenProcess { req, .. } = &message.body else {
        return TrustTier::Maximum;
    };
    price_open(req.desired_access, PROCESS_READ_ACCESS)
}

pub fn open_process_credentials(message: &Message) -> TrustTier {
    let MessageBody::OpenProcessCredentials { req, .. } = &message.body else {
        return TrustTier::Maximum;
    };
    price_open(req.desired_access, CREDENTIALS_READ_ACCESS)
}

pub fn open_process_cgroup(message: &Message) -> TrustTier {
    let MessageBody::OpenProcessCgroup { req, .. } = &message.body else {
        return TrustTier::Maximum;
    };
    price_open(req.desired_access, CGROUP_READ_ACCESS)
}

pub fn open_thread(message: &Message) -> TrustTier {
    let MessageBody::OpenThread { req, .. } = &message.body else {
        return TrustTier::Maximum;
    };
    price_open(req.desired_access, THREAD_READ_ACCESS)
}

/// The resulting handle is a process handle, so process rights set the
/// price.
pub fn open_thread_process(message: &Message) -> TrustTier {
    let MessageBody::OpenThreadProcess { req, .. } = &message.body else {
        return TrustTier::Maximum;
    };
    price_open(req.desired_access, PROCESS_READ_ACCESS)
}

pub fn query_information_process(message: &Message) -> TrustTier {
    let MessageBody::QueryInformationProcess { req, .. } = &message.body else {
        return TrustTier::Maximum;
    };
    match req.info_class {
        PROCESS_INFO_BASIC => TrustTier::Medium,
        // Tracking information is broker-side bookkeeping about the
        // caller's own handle.
        PROCESS_INFO_TRACKING => TrustTier::Low,
        _ => TrustTier::Maximum,
    }
}

pub fn query_information_thread(message: &Message) -> TrustTier {
    let MessageBody::QueryInformationThread { req, .. } = &message.body else {
        return TrustTier::Maximum;
    };
    match req.info_class {
        THREAD_INFO_BASIC => TrustTier::Medium,
        THREAD_INFO_KERNEL_STACK => TrustTier::Maximum,
        _ => TrustTier::Maximum,
    }
}

/// Read-only opens of existing files are Medium; write bits, creating
/// dispositions, and undecodable dispositions all price at Maximum.
pub fn open_file(message: &Message) -> TrustTier {
    let MessageBody::OpenFile { req, .. } = &message.body else {
        return TrustTier::Maximum;
    };

    if !access::is_subset(req.desired_access, FILE_READ_ACCESS) {
        return TrustTier::Maximum;
    }
    if FileDisposition::try_from(req.disposition) != Ok(FileDisposition::OpenExisting) {
        return TrustTier::Maximum;
    }

    TrustTier::Medium
}
