//! Host introspection facade.
//!
//! Handlers never touch `/proc` or issue syscalls directly; they go through
//! [`SystemFacade`]. The production implementation is [`ProcfsSystem`];
//! [`InMemorySystem`] is a scriptable double for tests. Every method may
//! block on host I/O, so callers hold no locks across facade calls.

mod memory;
mod procfs;

use std::io;
use std::path::Path;

use thiserror::Error;

use procwarden_core::OperationStatus;
use procwarden_core::access::FileDisposition;

pub use memory::InMemorySystem;
pub use procfs::ProcfsSystem;

/// Why a host query failed.
///
/// Converts into the [`OperationStatus`] a handler reports, so business
/// failures stay inside the reply rather than tearing down dispatch.
#[derive(Debug, Error)]
pub enum SystemError {
    /// The pid, tid, path, or module does not exist (any more).
    #[error("not found")]
    NotFound,

    /// The host refused the operation.
    #[error("access denied by host")]
    AccessDenied,

    /// The target exists but the data cannot be produced right now.
    #[error("unavailable")]
    Unavailable,

    /// The request asked for something nonsensical.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The requested address range is not readable.
    #[error("memory range not readable")]
    UnreadableMemory,

    /// Unclassified host I/O failure.
    #[error("host I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<SystemError> for OperationStatus {
    fn from(err: SystemError) -> Self {
        match err {
            SystemError::NotFound => Self::NotFound,
            SystemError::AccessDenied => Self::AccessDenied,
            SystemError::Unavailable | SystemError::UnreadableMemory => Self::Unavailable,
            SystemError::InvalidArgument(_) => Self::InvalidParameter,
            SystemError::Io(e) => match e.kind() {
                io::ErrorKind::NotFound => Self::NotFound,
                io::ErrorKind::PermissionDenied => Self::AccessDenied,
                io::ErrorKind::TimedOut => Self::TimedOut,
                _ => Self::Internal,
            },
        }
    }
}

/// Identity and accounting facts for one process.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProcessFacts {
    pub pid: u32,
    pub parent_pid: u32,
    pub name: String,
    /// Single-letter scheduler state.
    pub state: String,
    pub uid: u32,
    pub gid: u32,
    pub thread_count: u32,
    /// Clock ticks since boot at process start. Distinguishes incarnations
    /// of a reused pid.
    pub start_time: u64,
    pub virtual_size: u64,
    pub resident_size: u64,
}

/// Credential set of a process.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProcessCreds {
    pub uid: u32,
    pub euid: u32,
    pub gid: u32,
    pub egid: u32,
    pub groups: Vec<u32>,
    pub cap_effective: u64,
}

/// Identity facts for one thread.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ThreadFacts {
    pub tid: u32,
    /// Thread group id, i.e. the owning process.
    pub pid: u32,
    pub name: String,
    /// Single-letter scheduler state.
    pub state: String,
    /// Symbol the thread is blocked in, empty when runnable.
    pub wait_channel: String,
    /// Clock ticks since boot at thread start.
    pub start_time: u64,
}

/// One open file descriptor of an inspected process.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FdEntry {
    pub fd: u32,
    pub target: String,
    pub flags: u32,
    pub offset: i64,
}

/// One mapped region of an inspected process.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MappingEntry {
    pub start: u64,
    pub end: u64,
    pub permissions: String,
    pub offset: u64,
    pub path: String,
}

/// Stat facts for a file path.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileFacts {
    pub path: String,
    pub size: u64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub modified_unix: i64,
    pub inode: u64,
}

/// Facts about the filesystem backing a path.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FsFacts {
    pub magic: u64,
    pub block_size: u64,
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub available_bytes: u64,
}

/// Facts about one loaded kernel module.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ModuleFacts {
    pub name: String,
    pub size: u64,
    /// `-1` when the host does not report a count.
    pub reference_count: i64,
    pub state: String,
}

/// Host clock readings.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClockFacts {
    pub monotonic_ns: u64,
    pub realtime_unix_ns: i64,
    pub boot_id: String,
}

/// Host introspection operations the broker relies on.
///
/// Implementations are synchronous; methods that read another process may
/// block on host I/O.
pub trait SystemFacade: Send + Sync {
    /// Facts for a live process.
    fn process_facts(&self, pid: u32) -> Result<ProcessFacts, SystemError>;

    /// Credentials of a live process.
    fn process_credentials(&self, pid: u32) -> Result<ProcessCreds, SystemError>;

    /// Cgroup path of a live process.
    fn process_cgroup_path(&self, pid: u32) -> Result<String, SystemError>;

    /// Open file descriptors of a live process.
    fn enumerate_fds(&self, pid: u32) -> Result<Vec<FdEntry>, SystemError>;

    /// Read from another process's address space into `buf`, starting at
    /// `address`. Returns the number of bytes read, which may be short when
    /// the range crosses into unreadable memory.
    fn read_memory(&self, pid: u32, address: u64, buf: &mut [u8]) -> Result<usize, SystemError>;

    /// Mapped regions of a live process.
    fn memory_mappings(&self, pid: u32) -> Result<Vec<MappingEntry>, SystemError>;

    /// Deliver `signal` to a process.
    fn send_signal(&self, pid: u32, signal: i32) -> Result<(), SystemError>;

    /// Write a process's OOM score adjustment.
    fn set_oom_score_adjust(&self, pid: u32, value: i64) -> Result<(), SystemError>;

    /// Facts for a live thread.
    fn thread_facts(&self, tid: u32) -> Result<ThreadFacts, SystemError>;

    /// Kernel stack frames of a thread, innermost first, at most
    /// `max_frames` entries.
    fn thread_kernel_stack(&self, tid: u32, max_frames: usize) -> Result<Vec<String>, SystemError>;

    /// Set a thread's scheduling priority (nice value).
    fn set_thread_priority(&self, tid: u32, nice: i64) -> Result<(), SystemError>;

    /// Stat facts for a path.
    fn file_facts(&self, path: &Path) -> Result<FileFacts, SystemError>;

    /// Filesystem facts for the filesystem containing `path`.
    fn filesystem_facts(&self, path: &Path) -> Result<FsFacts, SystemError>;

    /// Validate that `path` can be opened under `disposition`, creating the
    /// file when the disposition asks for it.
    fn open_file(
        &self,
        path: &Path,
        write: bool,
        disposition: FileDisposition,
    ) -> Result<(), SystemError>;

    /// Facts for a loaded kernel module.
    fn module_facts(&self, name: &str) -> Result<ModuleFacts, SystemError>;

    /// Current host clocks.
    fn clock_facts(&self) -> Result<ClockFacts, SystemError>;

    /// Write a sysctl value. `name` uses `/` separators, e.g.
    /// `kernel/task_delayacct`.
    fn write_sysctl(&self, name: &str, value: &str) -> Result<(), SystemError>;

    /// Start time of a live process, used to re-validate stored handles
    /// against pid reuse.
    fn process_start_time(&self, pid: u32) -> Result<u64, SystemError> {
        Ok(self.process_facts(pid)?.start_time)
    }
}

/// Sysctl names are joined onto the proc root, so reject anything that could
/// escape it or alias another path.
pub(crate) fn validate_sysctl_name(name: &str) -> Result<(), SystemError> {
    let well_formed = !name.is_empty()
        && !name.starts_with('/')
        && !name.ends_with('/')
        && !name.contains("//")
        && !name.split('/').any(|seg| seg == "." || seg == "..")
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "_-./".contains(c));

    if well_formed {
        Ok(())
    } else {
        Err(SystemError::InvalidArgument(format!(
            "sysctl name {name:?}"
        )))
    }
}
