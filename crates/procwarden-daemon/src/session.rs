//! Per-connection session state.
//!
//! A [`ClientSession`] is created when a connection completes its handshake
//! and dropped when the connection closes. Everything mutable on it is
//! either atomic or behind its own lock, because the informer path reads
//! session flags while a request is being dispatched on the same session.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU8, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use uuid::Uuid;

use procwarden_core::TrustTier;

use crate::protocol::credentials::PeerCredentials;

/// Upper bound on handles a single session may hold open.
pub const MAX_HANDLES: usize = 1024;

/// Identity of the object a handle refers to.
///
/// Process-backed keys carry the start time observed at open; lookups
/// re-probe the live start time so a recycled pid can never satisfy a stale
/// handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectKey {
    Process { pid: u32, start_time: u64 },
    Thread { tid: u32, start_time: u64 },
    Credentials { pid: u32, start_time: u64 },
    Cgroup { path: String },
    File { path: std::path::PathBuf },
    Module { name: String },
}

impl ObjectKey {
    /// Object class name used in replies and logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Process { .. } => "process",
            Self::Thread { .. } => "thread",
            Self::Credentials { .. } => "credentials",
            Self::Cgroup { .. } => "cgroup",
            Self::File { .. } => "file",
            Self::Module { .. } => "module",
        }
    }

    /// Human-readable object description for handle queries.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Process { pid, .. } => format!("pid {pid}"),
            Self::Thread { tid, .. } => format!("tid {tid}"),
            Self::Credentials { pid, .. } => format!("credentials of pid {pid}"),
            Self::Cgroup { path } => format!("cgroup {path}"),
            Self::File { path } => path.display().to_string(),
            Self::Module { name } => format!("module {name}"),
        }
    }
}

/// A handle as stored in the session's table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleEntry {
    pub key: ObjectKey,
    /// Access bits granted at open time. Handlers re-check these when the
    /// handle is used.
    pub granted: u32,
}

/// Session-local handle table. Handle ids are meaningless outside their
/// session and are never reused within one.
#[derive(Debug, Default)]
pub struct HandleTable {
    next_id: u64,
    entries: HashMap<u64, HandleEntry>,
}

impl HandleTable {
    /// Store a handle, returning its id, or `None` when the session is at
    /// [`MAX_HANDLES`].
    pub fn insert(&mut self, key: ObjectKey, granted: u32) -> Option<u64> {
        if self.entries.len() >= MAX_HANDLES {
            return None;
        }
        // Id 0 is reserved as the invalid handle.
        self.next_id += 1;
        let id = self.next_id;
        self.entries.insert(id, HandleEntry { key, granted });
        Some(id)
    }

    #[must_use]
    pub fn get(&self, id: u64) -> Option<&HandleEntry> {
        self.entries.get(&id)
    }

    pub fn get_mut(&mut self, id: u64) -> Option<&mut HandleEntry> {
        self.entries.get_mut(&id)
    }

    pub fn remove(&mut self, id: u64) -> Option<HandleEntry> {
        self.entries.remove(&id)
    }

    /// How many handles in this table refer to the same object.
    #[must_use]
    pub fn open_count(&self, key: &ObjectKey) -> u32 {
        self.entries.values().filter(|e| &e.key == key).count() as u32
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// State attached to one authenticated connection.
#[derive(Debug)]
pub struct ClientSession {
    session_id: Uuid,
    peer: PeerCredentials,
    /// Current tier as [`TrustTier::as_repr`]. Only ever raised.
    tier: AtomicU8,
    informer_flags: AtomicU64,
    request_timeout_ms: AtomicU64,
    handles: Mutex<HandleTable>,
    shutdown_protection_held: AtomicU32,
}

impl ClientSession {
    #[must_use]
    pub fn new(
        session_id: Uuid,
        peer: PeerCredentials,
        baseline: TrustTier,
        request_timeout_ms: u64,
    ) -> Self {
        Self {
            session_id,
            peer,
            tier: AtomicU8::new(baseline.as_repr()),
            informer_flags: AtomicU64::new(0),
            request_timeout_ms: AtomicU64::new(request_timeout_ms),
            handles: Mutex::new(HandleTable::default()),
            shutdown_protection_held: AtomicU32::new(0),
        }
    }

    #[must_use]
    pub const fn session_id(&self) -> Uuid {
        self.session_id
    }

    #[must_use]
    pub const fn peer(&self) -> PeerCredentials {
        self.peer
    }

    /// Current tier. An out-of-range cell value reads as [`TrustTier::Low`].
    #[must_use]
    pub fn tier(&self) -> TrustTier {
        TrustTier::from_repr(self.tier.load(Ordering::Acquire)).unwrap_or(TrustTier::Low)
    }

    /// Raise the session to at least `tier`, returning the effective tier
    /// afterwards. Elevation is monotonic; a lower `tier` leaves the session
    /// unchanged.
    pub fn elevate_to(&self, tier: TrustTier) -> TrustTier {
        let previous = self.tier.fetch_max(tier.as_repr(), Ordering::AcqRel);
        TrustTier::from_repr(previous.max(tier.as_repr())).unwrap_or(TrustTier::Low)
    }

    /// Force the tier cell, bypassing monotonicity. Test hook for denial
    /// paths.
    #[cfg(test)]
    pub(crate) fn override_tier(&self, tier: TrustTier) {
        self.tier.store(tier.as_repr(), Ordering::Release);
    }

    #[must_use]
    pub fn informer_flags(&self) -> u64 {
        self.informer_flags.load(Ordering::Acquire)
    }

    pub fn set_informer_flags(&self, flags: u64) {
        self.informer_flags.store(flags, Ordering::Release);
    }

    /// Whether every bit of `flag` is enabled for this session.
    #[must_use]
    pub fn informer_enabled(&self, flag: u64) -> bool {
        self.informer_flags() & flag == flag
    }

    #[must_use]
    pub fn request_timeout_ms(&self) -> u64 {
        self.request_timeout_ms.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms())
    }

    pub fn set_request_timeout_ms(&self, timeout_ms: u64) {
        self.request_timeout_ms.store(timeout_ms, Ordering::Release);
    }

    /// Lock the handle table. The lock is held only for table operations,
    /// never across facade calls.
    pub fn handles(&self) -> std::sync::MutexGuard<'_, HandleTable> {
        self.handles.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record one more shutdown-protection acquisition, returning the
    /// session's new count.
    pub fn acquire_shutdown_protection(&self) -> u32 {
        self.shutdown_protection_held.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Release one acquisition. `None` when the session holds none.
    pub fn try_release_shutdown_protection(&self) -> Option<u32> {
        self.shutdown_protection_held
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |held| {
                held.checked_sub(1)
            })
            .ok()
            .map(|previous| previous - 1)
    }

    /// Drop every acquisition this session holds, returning how many there
    /// were. Called on disconnect so abandoned sessions cannot pin the
    /// broker open.
    pub fn take_shutdown_protection(&self) -> u32 {
        self.shutdown_protection_held.swap(0, Ordering::AcqRel)
    }

    #[must_use]
    pub fn shutdown_protection_held(&self) -> u32 {
        self.shutdown_protection_held.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(baseline: TrustTier) -> ClientSession {
        ClientSession::new(
            Uuid::new_v4(),
            PeerCredentials {
                uid: 1000,
                gid: 1000,
                pid: Some(4321),
            },
            baseline,
            30_000,
        )
    }

    #[test]
    fn handle_ids_start_at_one_and_never_repeat() {
        let mut table = HandleTable::default();
        let key = ObjectKey::Module {
            name: "ext4".to_string(),
        };

        let first = table.insert(key.clone(), 0x1).unwrap();
        assert_eq!(first, 1);
        assert!(table.remove(first).is_some());

        let second = table.insert(key, 0x1).unwrap();
        assert_ne!(second, first);
        assert!(table.get(first).is_none());
        assert!(table.get(second).is_some());
    }

    #[test]
    fn handle_table_refuses_inserts_at_capacity() {
        let mut table = HandleTable::default();
        for _ in 0..MAX_HANDLES {
            assert!(table
                .insert(
                    ObjectKey::Cgroup {
                        path: "/x".to_string()
                    },
                    0
                )
                .is_some());
        }
        assert!(table
            .insert(
                ObjectKey::Cgroup {
                    path: "/x".to_string()
                },
                0
            )
            .is_none());
        assert_eq!(table.len(), MAX_HANDLES);
    }

    #[test]
    fn open_count_groups_by_object_identity() {
        let mut table = HandleTable::default();
        let live = ObjectKey::Process {
            pid: 42,
            start_time: 100,
        };
        let recycled = ObjectKey::Process {
            pid: 42,
            start_time: 999,
        };

        table.insert(live.clone(), 0x1).unwrap();
        table.insert(live.clone(), 0x3).unwrap();
        table.insert(recycled.clone(), 0x1).unwrap();

        assert_eq!(table.open_count(&live), 2);
        assert_eq!(table.open_count(&recycled), 1);
    }

    #[test]
    fn tier_starts_at_baseline_and_only_rises() {
        let session = session(TrustTier::Low);
        assert_eq!(session.tier(), TrustTier::Low);

        assert_eq!(session.elevate_to(TrustTier::Medium), TrustTier::Medium);
        assert_eq!(session.tier(), TrustTier::Medium);

        // Elevation never lowers.
        assert_eq!(session.elevate_to(TrustTier::Low), TrustTier::Medium);
        assert_eq!(session.tier(), TrustTier::Medium);

        assert_eq!(session.elevate_to(TrustTier::Maximum), TrustTier::Maximum);
        assert_eq!(session.tier(), TrustTier::Maximum);
    }

    #[test]
    fn corrupted_tier_cell_reads_as_low() {
        let session = session(TrustTier::Maximum);
        session.tier.store(200, Ordering::Release);
        assert_eq!(session.tier(), TrustTier::Low);
    }

    #[test]
    fn informer_flags_match_exactly() {
        let session = session(TrustTier::Low);
        session.set_informer_flags(0b101);

        assert!(session.informer_enabled(0b001));
        assert!(session.informer_enabled(0b100));
        assert!(session.informer_enabled(0b101));
        assert!(!session.informer_enabled(0b010));
        assert!(!session.informer_enabled(0b011));
    }

    #[test]
    fn shutdown_protection_counts_and_floors_at_zero() {
        let session = session(TrustTier::Maximum);
        assert_eq!(session.try_release_shutdown_protection(), None);

        assert_eq!(session.acquire_shutdown_protection(), 1);
        assert_eq!(session.acquire_shutdown_protection(), 2);
        assert_eq!(session.try_release_shutdown_protection(), Some(1));
        assert_eq!(session.shutdown_protection_held(), 1);

        assert_eq!(session.take_shutdown_protection(), 1);
        assert_eq!(session.shutdown_protection_held(), 0);
        assert_eq!(session.try_release_shutdown_protection(), None);
    }

    #[test]
    fn request_timeout_is_session_local() {
        let session = session(TrustTier::Low);
        assert_eq!(session.request_timeout_ms(), 30_000);

        session.set_request_timeout_ms(500);
        assert_eq!(session.request_timeout(), Duration::from_millis(500));
    }
}
