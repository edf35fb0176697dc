//! In-memory [`SystemFacade`] used by dispatcher and handler tests.
//!
//! State is seeded up front and mutating operations are recorded instead of
//! touching the host, so tests can assert on exactly what a handler asked
//! the system to do.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use procwarden_core::access::FileDisposition;

use super::{
    ClockFacts, FdEntry, FileFacts, FsFacts, MappingEntry, ModuleFacts, ProcessCreds,
    ProcessFacts, SystemError, SystemFacade, ThreadFacts, validate_sysctl_name,
};

#[derive(Debug, Default)]
struct FakeProcess {
    facts: ProcessFacts,
    creds: Option<ProcessCreds>,
    cgroup: String,
    fds: Vec<FdEntry>,
    mappings: Vec<MappingEntry>,
    memory: Vec<(u64, Vec<u8>)>,
}

#[derive(Debug, Default)]
struct FakeThread {
    facts: ThreadFacts,
    stack: Vec<String>,
}

#[derive(Debug, Default)]
struct State {
    processes: HashMap<u32, FakeProcess>,
    threads: HashMap<u32, FakeThread>,
    files: HashMap<PathBuf, FileFacts>,
    filesystem: FsFacts,
    modules: HashMap<String, ModuleFacts>,
    clock: ClockFacts,
    sent_signals: Vec<(u32, i32)>,
    sysctl_writes: Vec<(String, String)>,
    priority_sets: Vec<(u32, i64)>,
    oom_adjusts: Vec<(u32, i64)>,
}

/// Scriptable facade backed by plain maps.
#[derive(Debug, Default)]
pub struct InMemorySystem {
    state: Mutex<State>,
}

impl InMemorySystem {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ========================================================================
    // Seeding
    // ========================================================================

    pub fn insert_process(&self, facts: ProcessFacts) {
        let pid = facts.pid;
        self.state().processes.insert(
            pid,
            FakeProcess {
                facts,
                ..FakeProcess::default()
            },
        );
    }

    /// Drop a seeded process, simulating it exiting between requests.
    pub fn remove_process(&self, pid: u32) {
        self.state().processes.remove(&pid);
    }

    pub fn set_credentials(&self, pid: u32, creds: ProcessCreds) {
        if let Some(p) = self.state().processes.get_mut(&pid) {
            p.creds = Some(creds);
        }
    }

    pub fn set_cgroup(&self, pid: u32, path: impl Into<String>) {
        if let Some(p) = self.state().processes.get_mut(&pid) {
            p.cgroup = path.into();
        }
    }

    pub fn push_fd(&self, pid: u32, entry: FdEntry) {
        if let Some(p) = self.state().processes.get_mut(&pid) {
            p.fds.push(entry);
        }
    }

    pub fn add_mapping(&self, pid: u32, mapping: MappingEntry) {
        if let Some(p) = self.state().processes.get_mut(&pid) {
            p.mappings.push(mapping);
        }
    }

    pub fn add_memory_region(&self, pid: u32, base: u64, bytes: Vec<u8>) {
        if let Some(p) = self.state().processes.get_mut(&pid) {
            p.memory.push((base, bytes));
        }
    }

    pub fn insert_thread(&self, facts: ThreadFacts) {
        let tid = facts.tid;
        self.state().threads.insert(
            tid,
            FakeThread {
                facts,
                stack: Vec::new(),
            },
        );
    }

    pub fn set_kernel_stack(&self, tid: u32, frames: Vec<String>) {
        if let Some(t) = self.state().threads.get_mut(&tid) {
            t.stack = frames;
        }
    }

    /// Drop a seeded thread, simulating it exiting between requests.
    pub fn remove_thread(&self, tid: u32) {
        self.state().threads.remove(&tid);
    }

    pub fn insert_file(&self, facts: FileFacts) {
        let path = PathBuf::from(&facts.path);
        self.state().files.insert(path, facts);
    }

    pub fn set_filesystem(&self, facts: FsFacts) {
        self.state().filesystem = facts;
    }

    pub fn insert_module(&self, facts: ModuleFacts) {
        let name = facts.name.clone();
        self.state().modules.insert(name, facts);
    }

    pub fn set_clock(&self, clock: ClockFacts) {
        self.state().clock = clock;
    }

    // ========================================================================
    // Recorded effects
    // ========================================================================

    #[must_use]
    pub fn sent_signals(&self) -> Vec<(u32, i32)> {
        self.state().sent_signals.clone()
    }

    #[must_use]
    pub fn sysctl_writes(&self) -> Vec<(String, String)> {
        self.state().sysctl_writes.clone()
    }

    #[must_use]
    pub fn priority_sets(&self) -> Vec<(u32, i64)> {
        self.state().priority_sets.clone()
    }

    #[must_use]
    pub fn oom_adjusts(&self) -> Vec<(u32, i64)> {
        self.state().oom_adjusts.clone()
    }
}

impl SystemFacade for InMemorySystem {
    fn process_facts(&self, pid: u32) -> Result<ProcessFacts, SystemError> {
        self.state()
            .processes
            .get(&pid)
            .map(|p| p.facts.clone())
            .ok_or(SystemError::NotFound)
    }

    fn process_credentials(&self, pid: u32) -> Result<ProcessCreds, SystemError> {
        let state = self.state();
        let process = state.processes.get(&pid).ok_or(SystemError::NotFound)?;
        process.creds.clone().ok_or(SystemError::Unavailable)
    }

    fn process_cgroup_path(&self, pid: u32) -> Result<String, SystemError> {
        self.state()
            .processes
            .get(&pid)
            .map(|p| p.cgroup.clone())
            .ok_or(SystemError::NotFound)
    }

    fn enumerate_fds(&self, pid: u32) -> Result<Vec<FdEntry>, SystemError> {
        self.state()
            .processes
            .get(&pid)
            .map(|p| p.fds.clone())
            .ok_or(SystemError::NotFound)
    }

    fn read_memory(&self, pid: u32, address: u64, buf: &mut [u8]) -> Result<usize, SystemError> {
        let state = self.state();
        let process = state.processes.get(&pid).ok_or(SystemError::NotFound)?;

        let region = process
            .memory
            .iter()
            .find(|(base, bytes)| address >= *base && address < base + bytes.len() as u64)
            .ok_or(SystemError::UnreadableMemory)?;

        let offset = (address - region.0) as usize;
        let available = &region.1[offset..];
        let n = buf.len().min(available.len());
        buf[..n].copy_from_slice(&available[..n]);
        Ok(n)
    }

    fn memory_mappings(&self, pid: u32) -> Result<Vec<MappingEntry>, SystemError> {
        self.state()
            .processes
            .get(&pid)
            .map(|p| p.mappings.clone())
            .ok_or(SystemError::NotFound)
    }

    fn send_signal(&self, pid: u32, signal: i32) -> Result<(), SystemError> {
        if !(1..=64).contains(&signal) {
            return Err(SystemError::InvalidArgument(format!("signal {signal}")));
        }
        let mut state = self.state();
        if !state.processes.contains_key(&pid) {
            return Err(SystemError::NotFound);
        }
        state.sent_signals.push((pid, signal));
        Ok(())
    }

    fn set_oom_score_adjust(&self, pid: u32, value: i64) -> Result<(), SystemError> {
        let mut state = self.state();
        if !state.processes.contains_key(&pid) {
            return Err(SystemError::NotFound);
        }
        state.oom_adjusts.push((pid, value));
        Ok(())
    }

    fn thread_facts(&self, tid: u32) -> Result<ThreadFacts, SystemError> {
        self.state()
            .threads
            .get(&tid)
            .map(|t| t.facts.clone())
            .ok_or(SystemError::NotFound)
    }

    fn thread_kernel_stack(&self, tid: u32, max_frames: usize) -> Result<Vec<String>, SystemError> {
        let state = self.state();
        let thread = state.threads.get(&tid).ok_or(SystemError::NotFound)?;
        Ok(thread.stack.iter().take(max_frames).cloned().collect())
    }

    fn set_thread_priority(&self, tid: u32, nice: i64) -> Result<(), SystemError> {
        let mut state = self.state();
        if !state.threads.contains_key(&tid) {
            return Err(SystemError::NotFound);
        }
        state.priority_sets.push((tid, nice));
        Ok(())
    }

    fn file_facts(&self, path: &Path) -> Result<FileFacts, SystemError> {
        self.state()
            .files
            .get(path)
            .cloned()
            .ok_or(SystemError::NotFound)
    }

    fn filesystem_facts(&self, _path: &Path) -> Result<FsFacts, SystemError> {
        Ok(self.state().filesystem.clone())
    }

    fn open_file(
        &self,
        path: &Path,
        _write: bool,
        disposition: FileDisposition,
    ) -> Result<(), SystemError> {
        let mut state = self.state();
        let exists = state.files.contains_key(path);

        match disposition {
            FileDisposition::OpenExisting if !exists => Err(SystemError::NotFound),
            FileDisposition::CreateNew if exists => Err(SystemError::InvalidArgument(format!(
                "{} already exists",
                path.display()
            ))),
            FileDisposition::CreateNew | FileDisposition::OpenAlways if !exists => {
                state.files.insert(
                    path.to_path_buf(),
                    FileFacts {
                        path: path.to_string_lossy().into_owned(),
                        ..FileFacts::default()
                    },
                );
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn module_facts(&self, name: &str) -> Result<ModuleFacts, SystemError> {
        self.state()
            .modules
            .get(name)
            .cloned()
            .ok_or(SystemError::NotFound)
    }

    fn clock_facts(&self) -> Result<ClockFacts, SystemError> {
        Ok(self.state().clock.clone())
    }

    fn write_sysctl(&self, name: &str, value: &str) -> Result<(), SystemError> {
        validate_sysctl_name(name)?;
        self.state()
            .sysctl_writes
            .push((name.to_string(), value.to_string()));
        Ok(())
    }
}
