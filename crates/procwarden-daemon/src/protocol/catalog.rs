//! The dispatch catalog: one entry per operation, indexed by wire tag.
//!
//! Each slot pairs the handler with the evaluator that prices the operation.
//! Most evaluators are constant; the open and query operations that accept
//! an access mask or info class price the request's content instead. A slot
//! with no evaluator authorizes at the lowest tier, which is how token
//! elevation stays reachable from an unelevated session.

use thiserror::Error;

use crate::handlers::{self, HandlerFn};
use crate::protocol::messages::MessageId;
use crate::protocol::trust::{self, RequiredTierFn};

/// One catalog slot.
pub struct CatalogEntry {
    pub id: MessageId,
    /// `None` only for the reserved sentinel; such requests complete as
    /// unsupported.
    pub handler: Option<HandlerFn>,
    /// `None` skips the trust check entirely.
    pub required_tier: Option<RequiredTierFn>,
}

const CATALOG_INIT: [CatalogEntry; MessageId::COUNT] = [
    CatalogEntry {
        id: MessageId::Invalid,
        handler: None,
        required_tier: None,
    },
    CatalogEntry {
        id: MessageId::GetInformerSettings,
        handler: Some(handlers::informer::get_informer_settings),
        required_tier: Some(trust::require_low),
    },
    CatalogEntry {
        id: MessageId::SetInformerSettings,
        handler: Some(handlers::informer::set_informer_settings),
        required_tier: Some(trust::require_low),
    },
    CatalogEntry {
        id: MessageId::OpenProcess,
        handler: Some(handlers::process::open_process),
        required_tier: Some(trust::open_process),
    },
    CatalogEntry {
        id: MessageId::OpenProcessCredentials,
        handler: Some(handlers::process::open_process_credentials),
        required_tier: Some(trust::open_process_credentials),
    },
    CatalogEntry {
        id: MessageId::OpenProcessCgroup,
        handler: Some(handlers::process::open_process_cgroup),
        required_tier: Some(trust::open_process_cgroup),
    },
    CatalogEntry {
        id: MessageId::TerminateProcess,
        handler: Some(handlers::process::terminate_process),
        required_tier: Some(trust::require_maximum),
    },
    CatalogEntry {
        id: MessageId::ReadProcessMemory,
        handler: Some(handlers::process::read_process_memory),
        required_tier: Some(trust::require_maximum),
    },
    CatalogEntry {
        id: MessageId::OpenThread,
        handler: Some(handlers::thread::open_thread),
        required_tier: Some(trust::open_thread),
    },
    CatalogEntry {
        id: MessageId::OpenThreadProcess,
        handler: Some(handlers::thread::open_thread_process),
        required_tier: Some(trust::open_thread_process),
    },
    CatalogEntry {
        id: MessageId::CaptureThreadStack,
        handler: Some(handlers::thread::capture_thread_stack),
        required_tier: Some(trust::require_medium),
    },
    CatalogEntry {
        id: MessageId::EnumerateProcessHandles,
        handler: Some(handlers::process::enumerate_process_handles),
        required_tier: Some(trust::require_medium),
    },
    CatalogEntry {
        id: MessageId::QueryInformationHandle,
        handler: Some(handlers::handle::query_information_handle),
        required_tier: Some(trust::require_medium),
    },
    CatalogEntry {
        id: MessageId::SetInformationHandle,
        handler: Some(handlers::handle::set_information_handle),
        required_tier: Some(trust::require_maximum),
    },
    CatalogEntry {
        id: MessageId::OpenModule,
        handler: Some(handlers::system::open_module),
        required_tier: Some(trust::require_maximum),
    },
    CatalogEntry {
        id: MessageId::QueryInformationModule,
        handler: Some(handlers::system::query_information_module),
        required_tier: Some(trust::require_maximum),
    },
    CatalogEntry {
        id: MessageId::QueryInformationProcess,
        handler: Some(handlers::process::query_information_process),
        required_tier: Some(trust::query_information_process),
    },
    CatalogEntry {
        id: MessageId::SetInformationProcess,
        handler: Some(handlers::process::set_information_process),
        required_tier: Some(trust::require_maximum),
    },
    CatalogEntry {
        id: MessageId::QueryInformationThread,
        handler: Some(handlers::thread::query_information_thread),
        required_tier: Some(trust::query_information_thread),
    },
    CatalogEntry {
        id: MessageId::SetInformationThread,
        handler: Some(handlers::thread::set_information_thread),
        required_tier: Some(trust::require_maximum),
    },
    CatalogEntry {
        id: MessageId::QueryInformationFile,
        handler: Some(handlers::file::query_information_file),
        required_tier: Some(trust::require_medium),
    },
    CatalogEntry {
        id: MessageId::QueryFileSystemInformation,
        handler: Some(handlers::file::query_file_system_information),
        required_tier: Some(trust::require_medium),
    },
    CatalogEntry {
        id: MessageId::OpenFile,
        handler: Some(handlers::file::open_file),
        required_tier: Some(trust::open_file),
    },
    CatalogEntry {
        id: MessageId::DuplicateHandle,
        handler: Some(handlers::handle::duplicate_handle),
        required_tier: Some(trust::require_maximum),
    },
    CatalogEntry {
        id: MessageId::QueryClock,
        handler: Some(handlers::system::query_clock),
        required_tier: Some(trust::require_low),
    },
    CatalogEntry {
        id: MessageId::QueryMemoryMappings,
        handler: Some(handlers::process::query_memory_mappings),
        required_tier: Some(trust::require_medium),
    },
    CatalogEntry {
        id: MessageId::CompareHandles,
        handler: Some(handlers::handle::compare_handles),
        required_tier: Some(trust::require_medium),
    },
    CatalogEntry {
        id: MessageId::GetMessageTimeouts,
        handler: Some(handlers::system::get_message_timeouts),
        required_tier: Some(trust::require_low),
    },
    CatalogEntry {
        id: MessageId::SetMessageTimeouts,
        handler: Some(handlers::system::set_message_timeouts),
        required_tier: Some(trust::require_low),
    },
    CatalogEntry {
        id: MessageId::AcquireShutdownProtection,
        handler: Some(handlers::system::acquire_shutdown_protection),
        required_tier: Some(trust::require_maximum),
    },
    CatalogEntry {
        id: MessageId::ReleaseShutdownProtection,
        handler: Some(handlers::system::release_shutdown_protection),
        required_tier: Some(trust::require_maximum),
    },
    CatalogEntry {
        id: MessageId::GetConnectedClientCount,
        handler: Some(handlers::system::get_connected_client_count),
        required_tier: Some(trust::require_low),
    },
    CatalogEntry {
        id: MessageId::AssignSessionToken,
        handler: Some(handlers::informer::assign_session_token),
        required_tier: None,
    },
    CatalogEntry {
        id: MessageId::SystemControl,
        handler: Some(handlers::system::system_control),
        required_tier: Some(trust::require_maximum),
    },
];

/// The full dispatch table. Index equals wire tag.
pub static CATALOG: [CatalogEntry; MessageId::COUNT] = CATALOG_INIT;

// Slot order must match the wire tags or the dispatcher would run the wrong
// handler for a request.
const _: () = {
    let mut i = 0;
    while i < CATALOG_INIT.len() {
        assert!(CATALOG_INIT[i].id as usize == i, "catalog slot out of order");
        i += 1;
    }
};

/// Catalog slot for an id.
#[must_use]
pub fn entry(id: MessageId) -> &'static CatalogEntry {
    &CATALOG[id as usize]
}

/// A structural defect in the dispatch table.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    /// A slot's id does not equal its index.
    #[error("catalog slot {index} holds {found}")]
    SlotOutOfOrder { index: usize, found: MessageId },

    /// Handler presence differs from the rule that only the sentinel goes
    /// without one.
    #[error("{id} violates the handler rule")]
    HandlerRule { id: MessageId },

    /// Evaluator presence differs from the rule that only the sentinel and
    /// token assignment go without one.
    #[error("{id} violates the evaluator rule")]
    EvaluatorRule { id: MessageId },
}

/// Re-runs the structural checks at runtime.
///
/// The const assertion above proves slot order when the table is built from
/// `CATALOG_INIT`; the daemon calls this once at startup so it refuses to
/// serve from a table that somehow drifted from the rules the dispatcher
/// relies on.
///
/// # Errors
///
/// Returns the first [`CatalogError`] found, scanning in tag order.
pub fn verify() -> Result<(), CatalogError> {
    for (index, slot) in CATALOG.iter().enumerate() {
        if slot.id as usize != index {
            return Err(CatalogError::SlotOutOfOrder { index, found: slot.id });
        }
        let wants_handler = slot.id != MessageId::Invalid;
        if slot.handler.is_some() != wants_handler {
            return Err(CatalogError::HandlerRule { id: slot.id });
        }
        let wants_evaluator =
            !matches!(slot.id, MessageId::Invalid | MessageId::AssignSessionToken);
        if slot.required_tier.is_some() != wants_evaluator {
            return Err(CatalogError::EvaluatorRule { id: slot.id });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_slot_matches_its_tag() {
        for (i, slot) in CATALOG.iter().enumerate() {
            assert_eq!(slot.id as usize, i, "slot {i} holds {}", slot.id);
        }
    }

    #[test]
    fn only_the_sentinel_lacks_a_handler() {
        for slot in &CATALOG {
            match slot.id {
                MessageId::Invalid => assert!(slot.handler.is_none()),
                _ => assert!(slot.handler.is_some(), "{} has no handler", slot.id),
            }
        }
    }

    #[test]
    fn trust_checks_are_skipped_only_where_intended() {
        for slot in &CATALOG {
            match slot.id {
                MessageId::Invalid | MessageId::AssignSessionToken => {
                    assert!(slot.required_tier.is_none());
                }
                _ => assert!(slot.required_tier.is_some(), "{} has no evaluator", slot.id),
            }
        }
    }

    #[test]
    fn entry_lookup_is_direct_indexing() {
        assert_eq!(entry(MessageId::OpenProcess).id, MessageId::OpenProcess);
        assert_eq!(entry(MessageId::SystemControl).id, MessageId::SystemControl);
        // Repeated lookups hand back the same static slot.
        assert!(std::ptr::eq(
            entry(MessageId::OpenProcess),
            entry(MessageId::OpenProcess)
        ));
    }

    #[test]
    fn verify_accepts_the_shipped_table() {
        assert_eq!(verify(), Ok(()));
    }
}
