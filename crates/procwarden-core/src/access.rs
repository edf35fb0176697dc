//! Access-mask bits per object class.
//!
//! Open-style requests carry a `u32` access mask naming what the caller
//! intends to do with the resulting handle. The trust evaluator inspects the
//! mask when pricing the open (a mask confined to the class's read-only
//! subset is cheaper than one that is not), and handlers re-check individual
//! bits when a handle is used, so a handle opened for querying can never be
//! spent on modification.
//!
//! Bit values are wire-visible and must stay stable.

/// Query a process's identity and basic state.
pub const PROCESS_QUERY_INFORMATION: u32 = 0x0001;
/// Enumerate a process's open file descriptors.
pub const PROCESS_QUERY_HANDLES: u32 = 0x0002;
/// Read a process's address space.
pub const PROCESS_VM_READ: u32 = 0x0004;
/// Modify a process's tunable state.
pub const PROCESS_SET_INFORMATION: u32 = 0x0008;
/// Deliver a fatal signal to a process.
pub const PROCESS_TERMINATE: u32 = 0x0010;

/// Read-only subset of process rights.
pub const PROCESS_READ_ACCESS: u32 =
    PROCESS_QUERY_INFORMATION | PROCESS_QUERY_HANDLES | PROCESS_VM_READ;
/// Every defined process right.
pub const PROCESS_ALL_ACCESS: u32 =
    PROCESS_READ_ACCESS | PROCESS_SET_INFORMATION | PROCESS_TERMINATE;

/// Query a thread's identity and scheduling state.
pub const THREAD_QUERY_INFORMATION: u32 = 0x0001;
/// Capture a thread's kernel stack trace.
pub const THREAD_CAPTURE_STACK: u32 = 0x0002;
/// Modify a thread's tunable state.
pub const THREAD_SET_INFORMATION: u32 = 0x0004;

/// Read-only subset of thread rights.
pub const THREAD_READ_ACCESS: u32 = THREAD_QUERY_INFORMATION | THREAD_CAPTURE_STACK;
/// Every defined thread right.
pub const THREAD_ALL_ACCESS: u32 = THREAD_READ_ACCESS | THREAD_SET_INFORMATION;

/// Query a process's credential ids.
pub const CREDENTIALS_QUERY: u32 = 0x0001;
/// Query a process's supplementary groups and capability sets.
pub const CREDENTIALS_QUERY_GROUPS: u32 = 0x0002;

/// Read-only subset of credential rights. Credentials expose no
/// modification rights through this interface.
pub const CREDENTIALS_READ_ACCESS: u32 = CREDENTIALS_QUERY | CREDENTIALS_QUERY_GROUPS;
/// Every defined credential right.
pub const CREDENTIALS_ALL_ACCESS: u32 = CREDENTIALS_READ_ACCESS;

/// Query a process's control-group membership and accounting.
pub const CGROUP_QUERY: u32 = 0x0001;

/// Read-only subset of control-group rights.
pub const CGROUP_READ_ACCESS: u32 = CGROUP_QUERY;
/// Every defined control-group right.
pub const CGROUP_ALL_ACCESS: u32 = CGROUP_QUERY;

/// Read a file's contents.
pub const FILE_READ_DATA: u32 = 0x0001;
/// Read a file's metadata.
pub const FILE_READ_ATTRIBUTES: u32 = 0x0002;
/// Overwrite a file's contents.
pub const FILE_WRITE_DATA: u32 = 0x0004;
/// Append to a file.
pub const FILE_APPEND_DATA: u32 = 0x0008;

/// Read-only subset of file rights.
pub const FILE_READ_ACCESS: u32 = FILE_READ_DATA | FILE_READ_ATTRIBUTES;
/// Every defined file right.
pub const FILE_ALL_ACCESS: u32 = FILE_READ_ACCESS | FILE_WRITE_DATA | FILE_APPEND_DATA;

/// Query a loaded module's layout and backing file.
pub const MODULE_QUERY: u32 = 0x0001;

/// Read-only subset of module rights.
pub const MODULE_READ_ACCESS: u32 = MODULE_QUERY;
/// Every defined module right.
pub const MODULE_ALL_ACCESS: u32 = MODULE_QUERY;

/// Whether `mask` requests nothing outside `allowed`.
///
/// The trust evaluator calls this with a class's read-only subset: any bit
/// outside it, including bits no class defines, makes the open a
/// maximum-tier operation.
#[must_use]
pub const fn is_subset(mask: u32, allowed: u32) -> bool {
    mask & !allowed == 0
}

/// Whether `granted` includes every bit of `required`.
///
/// Handlers call this when a handle is used, with the mask the handle was
/// opened with.
#[must_use]
pub const fn has_all(granted: u32, required: u32) -> bool {
    granted & required == required
}

/// How an open-file request treats the file's existence.
///
/// Only [`FileDisposition::OpenExisting`] combined with a read-only access
/// mask qualifies as a medium-tier open; any disposition that can create a
/// file is priced at maximum tier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum FileDisposition {
    /// Open the file only if it already exists.
    OpenExisting = 0,
    /// Create the file, failing if it already exists.
    CreateNew = 1,
    /// Open the file, creating it if it does not exist.
    OpenAlways = 2,
}

impl FileDisposition {
    /// Lower-case name used in CLI arguments and logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::OpenExisting => "open-existing",
            Self::CreateNew => "create-new",
            Self::OpenAlways => "open-always",
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn read_subsets_are_subsets_of_all_access() {
        assert!(is_subset(PROCESS_READ_ACCESS, PROCESS_ALL_ACCESS));
        assert!(is_subset(THREAD_READ_ACCESS, THREAD_ALL_ACCESS));
        assert!(is_subset(CREDENTIALS_READ_ACCESS, CREDENTIALS_ALL_ACCESS));
        assert!(is_subset(CGROUP_READ_ACCESS, CGROUP_ALL_ACCESS));
        assert!(is_subset(FILE_READ_ACCESS, FILE_ALL_ACCESS));
        assert!(is_subset(MODULE_READ_ACCESS, MODULE_ALL_ACCESS));
    }

    #[test]
    fn read_subsets_exclude_modification_bits() {
        assert!(!is_subset(PROCESS_SET_INFORMATION, PROCESS_READ_ACCESS));
        assert!(!is_subset(PROCESS_TERMINATE, PROCESS_READ_ACCESS));
        assert!(!is_subset(THREAD_SET_INFORMATION, THREAD_READ_ACCESS));
        assert!(!is_subset(FILE_WRITE_DATA, FILE_READ_ACCESS));
        assert!(!is_subset(FILE_APPEND_DATA, FILE_READ_ACCESS));
    }

    #[test]
    fn undefined_bits_are_never_read_only() {
        let undefined = 0x8000_0000;
        assert!(!is_subset(PROCESS_QUERY_INFORMATION | undefined, PROCESS_READ_ACCESS));
        assert!(!is_subset(undefined, FILE_READ_ACCESS));
    }

    #[test]
    fn empty_mask_is_a_subset_of_everything() {
        assert!(is_subset(0, 0));
        assert!(is_subset(0, PROCESS_READ_ACCESS));
    }

    #[test]
    fn has_all_requires_every_bit() {
        let granted = PROCESS_QUERY_INFORMATION | PROCESS_VM_READ;
        assert!(has_all(granted, PROCESS_QUERY_INFORMATION));
        assert!(has_all(granted, granted));
        assert!(!has_all(granted, PROCESS_QUERY_HANDLES));
        assert!(!has_all(granted, PROCESS_VM_READ | PROCESS_TERMINATE));
    }

    #[test]
    fn process_bits_are_disjoint() {
        let bits = [
            PROCESS_QUERY_INFORMATION,
            PROCESS_QUERY_HANDLES,
            PROCESS_VM_READ,
            PROCESS_SET_INFORMATION,
            PROCESS_TERMINATE,
        ];
        for (i, a) in bits.iter().enumerate() {
            for b in &bits[i + 1..] {
                assert_eq!(a & b, 0, "bits {a:#x} and {b:#x} overlap");
            }
        }
    }

    #[test]
    fn file_disposition_round_trips_through_i32() {
        for disposition in [
            FileDisposition::OpenExisting,
            FileDisposition::CreateNew,
            FileDisposition::OpenAlways,
        ] {
            let raw = disposition as i32;
            assert_eq!(FileDisposition::try_from(raw).ok(), Some(disposition));
        }
        assert!(FileDisposition::try_from(99).is_err());
    }

    proptest! {
        #[test]
        fn intersecting_with_the_allowed_set_always_qualifies(
            mask in any::<u32>(),
            allowed in any::<u32>(),
        ) {
            prop_assert!(is_subset(mask & allowed, allowed));
        }

        /// `has_all` and `is_subset` are the same relation viewed from the
        /// two sides a handle check needs.
        #[test]
        fn grant_check_is_subset_check_reversed(
            granted in any::<u32>(),
            required in any::<u32>(),
        ) {
            prop_assert_eq!(has_all(granted, required), is_subset(required, granted));
        }
    }
}
