//! procfs-backed [`SystemFacade`] implementation.
//!
//! All process and thread facts come from `/proc`; memory reads go through
//! `/proc/<pid>/mem`, so the kernel's ptrace access checks apply to every
//! read. The proc root is configurable for tests.

use std::fs;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::libc;
use nix::sys::signal::{Signal, kill};
use nix::sys::statfs::statfs;
use nix::unistd::Pid;

use procwarden_core::access::FileDisposition;

use super::{
    ClockFacts, FdEntry, FileFacts, FsFacts, MappingEntry, ModuleFacts, ProcessCreds,
    ProcessFacts, SystemError, SystemFacade, ThreadFacts, validate_sysctl_name,
};

/// Production facade reading the live `/proc` filesystem.
#[derive(Debug, Clone)]
pub struct ProcfsSystem {
    proc_root: PathBuf,
}

impl ProcfsSystem {
    /// Facade over `/proc`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            proc_root: PathBuf::from("/proc"),
        }
    }

    /// Facade over an alternate proc root. Used by tests with fixture trees.
    #[must_use]
    pub fn with_proc_root(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
        }
    }

    fn task_dir(&self, id: u32) -> PathBuf {
        self.proc_root.join(id.to_string())
    }

    fn read_task_file(&self, id: u32, name: &str) -> Result<String, SystemError> {
        Ok(fs::read_to_string(self.task_dir(id).join(name))?)
    }
}

impl Default for ProcfsSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemFacade for ProcfsSystem {
    fn process_facts(&self, pid: u32) -> Result<ProcessFacts, SystemError> {
        let status = self.read_task_file(pid, "status")?;
        let stat = parse_stat(&self.read_task_file(pid, "stat")?)?;

        Ok(ProcessFacts {
            pid,
            parent_pid: status_field(&status, "PPid")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            name: status_field(&status, "Name").unwrap_or_default().to_string(),
            state: stat.state,
            uid: first_id(&status, "Uid")?,
            gid: first_id(&status, "Gid")?,
            thread_count: status_field(&status, "Threads")
                .and_then(|v| v.parse().ok())
                .unwrap_or(1),
            start_time: stat.start_time,
            virtual_size: kb_field(&status, "VmSize"),
            resident_size: kb_field(&status, "VmRSS"),
        })
    }

    fn process_credentials(&self, pid: u32) -> Result<ProcessCreds, SystemError> {
        let status = self.read_task_file(pid, "status")?;

        let uid_line = id_columns(&status, "Uid")?;
        let gid_line = id_columns(&status, "Gid")?;
        let groups = status_field(&status, "Groups")
            .map(|v| v.split_whitespace().filter_map(|g| g.parse().ok()).collect())
            .unwrap_or_default();
        let cap_effective = status_field(&status, "CapEff")
            .and_then(|v| u64::from_str_radix(v.trim(), 16).ok())
            .ok_or(SystemError::Unavailable)?;

        Ok(ProcessCreds {
            uid: uid_line.0,
            euid: uid_line.1,
            gid: gid_line.0,
            egid: gid_line.1,
            groups,
            cap_effective,
        })
    }

    fn process_cgroup_path(&self, pid: u32) -> Result<String, SystemError> {
        let content = self.read_task_file(pid, "cgroup")?;

        // Prefer the v2 unified hierarchy entry; fall back to the first line
        // on hybrid hosts.
        let line = content
            .lines()
            .find(|l| l.starts_with("0::"))
            .or_else(|| content.lines().next())
            .ok_or(SystemError::Unavailable)?;
        let path = line
            .splitn(3, ':')
            .nth(2)
            .ok_or(SystemError::Unavailable)?;
        Ok(path.to_string())
    }

    fn enumerate_fds(&self, pid: u32) -> Result<Vec<FdEntry>, SystemError> {
        let fd_dir = self.task_dir(pid).join("fd");
        let mut entries = Vec::new();

        for dirent in fs::read_dir(&fd_dir)? {
            let dirent = dirent?;
            let Some(fd) = dirent.file_name().to_str().and_then(|n| n.parse::<u32>().ok()) else {
                continue;
            };
            // Descriptors can close while we iterate; skip the ones that
            // vanish underneath us.
            let Ok(target) = fs::read_link(dirent.path()) else {
                continue;
            };
            let fdinfo = fs::read_to_string(
                self.task_dir(pid).join("fdinfo").join(fd.to_string()),
            )
            .unwrap_or_default();

            entries.push(FdEntry {
                fd,
                target: target.to_string_lossy().into_owned(),
                flags: status_field(&fdinfo, "flags")
                    .and_then(|v| u32::from_str_radix(v.trim(), 8).ok())
                    .unwrap_or(0),
                offset: status_field(&fdinfo, "pos")
                    .and_then(|v| v.trim().parse().ok())
                    .unwrap_or(0),
            });
        }

        entries.sort_by_key(|e| e.fd);
        Ok(entries)
    }

    fn read_memory(&self, pid: u32, address: u64, buf: &mut [u8]) -> Result<usize, SystemError> {
        let mut mem = fs::File::open(self.task_dir(pid).join("mem"))?;
        mem.seek(SeekFrom::Start(address)).map_err(map_mem_error)?;

        let mut total = 0;
        while total < buf.len() {
            match mem.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                // The range ran into unreadable memory; report the readable
                // prefix.
                Err(_) if total > 0 => break,
                Err(e) => return Err(map_mem_error(e)),
            }
        }
        Ok(total)
    }

    fn memory_mappings(&self, pid: u32) -> Result<Vec<MappingEntry>, SystemError> {
        let maps = self.read_task_file(pid, "maps")?;
        Ok(maps.lines().filter_map(parse_maps_line).collect())
    }

    fn send_signal(&self, pid: u32, signal: i32) -> Result<(), SystemError> {
        let signal = Signal::try_from(signal)
            .map_err(|_| SystemError::InvalidArgument(format!("signal {signal}")))?;
        kill(Pid::from_raw(pid as i32), signal).map_err(map_errno)
    }

    fn set_oom_score_adjust(&self, pid: u32, value: i64) -> Result<(), SystemError> {
        fs::write(
            self.task_dir(pid).join("oom_score_adj"),
            value.to_string(),
        )?;
        Ok(())
    }

    fn thread_facts(&self, tid: u32) -> Result<ThreadFacts, SystemError> {
        let status = self.read_task_file(tid, "status")?;
        let stat = parse_stat(&self.read_task_file(tid, "stat")?)?;

        // wchan is informational; not all kernels expose it.
        let wait_channel = self
            .read_task_file(tid, "wchan")
            .map(|w| {
                let w = w.trim();
                if w == "0" { String::new() } else { w.to_string() }
            })
            .unwrap_or_default();

        Ok(ThreadFacts {
            tid,
            pid: status_field(&status, "Tgid")
                .and_then(|v| v.parse().ok())
                .unwrap_or(tid),
            name: status_field(&status, "Name").unwrap_or_default().to_string(),
            state: stat.state,
            wait_channel,
            start_time: stat.start_time,
        })
    }

    fn thread_kernel_stack(&self, tid: u32, max_frames: usize) -> Result<Vec<String>, SystemError> {
        let stack = self.read_task_file(tid, "stack")?;
        Ok(stack
            .lines()
            .filter_map(parse_stack_frame)
            .take(max_frames)
            .collect())
    }

    fn set_thread_priority(&self, tid: u32, nice: i64) -> Result<(), SystemError> {
        // SAFETY: setpriority only takes ids and an integer; no pointers.
        let rc = unsafe {
            libc::setpriority(libc::PRIO_PROCESS as _, tid as libc::id_t, nice as libc::c_int)
        };
        if rc == -1 {
            let err = io::Error::last_os_error();
            return Err(match err.raw_os_error() {
                Some(libc::ESRCH) => SystemError::NotFound,
                Some(libc::EACCES | libc::EPERM) => SystemError::AccessDenied,
                _ => SystemError::Io(err),
            });
        }
        Ok(())
    }

    fn file_facts(&self, path: &Path) -> Result<FileFacts, SystemError> {
        use std::os::unix::fs::MetadataExt;

        let meta = fs::metadata(path)?;
        Ok(FileFacts {
            path: path.to_string_lossy().into_owned(),
            size: meta.size(),
            mode: meta.mode(),
            uid: meta.uid(),
            gid: meta.gid(),
            modified_unix: meta.mtime(),
            inode: meta.ino(),
        })
    }

    fn filesystem_facts(&self, path: &Path) -> Result<FsFacts, SystemError> {
        let stats = statfs(path).map_err(map_errno)?;
        let block_size = stats.block_size() as u64;
        Ok(FsFacts {
            magic: stats.filesystem_type().0 as u64,
            block_size,
            total_bytes: stats.blocks() as u64 * block_size,
            free_bytes: stats.blocks_free() as u64 * block_size,
            available_bytes: stats.blocks_available() as u64 * block_size,
        })
    }

    fn open_file(
        &self,
        path: &Path,
        write: bool,
        disposition: FileDisposition,
    ) -> Result<(), SystemError> {
        let mut opts = fs::OpenOptions::new();
        match disposition {
            FileDisposition::OpenExisting => {
                opts.read(true).write(write);
            }
            // Creation implies write access on the host regardless of the
            // requested mask.
            FileDisposition::CreateNew => {
                opts.read(true).write(true).create_new(true);
            }
            FileDisposition::OpenAlways => {
                opts.read(true).write(true).create(true);
            }
        }

        // The broker keys file handles by path and re-stats on use; the
        // descriptor itself is only probed, then dropped.
        match opts.open(path) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(
                SystemError::InvalidArgument(format!("{} already exists", path.display())),
            ),
            Err(e) => Err(e.into()),
        }
    }

    fn module_facts(&self, name: &str) -> Result<ModuleFacts, SystemError> {
        let modules = fs::read_to_string(self.proc_root.join("modules"))?;
        modules
            .lines()
            .filter_map(parse_modules_line)
            .find(|m| m.name == name)
            .ok_or(SystemError::NotFound)
    }

    fn clock_facts(&self) -> Result<ClockFacts, SystemError> {
        let uptime = fs::read_to_string(self.proc_root.join("uptime"))?;
        let uptime_secs: f64 = uptime
            .split_whitespace()
            .next()
            .and_then(|v| v.parse().ok())
            .ok_or(SystemError::Unavailable)?;

        let realtime_unix_ns = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_err(|_| SystemError::Unavailable)?
            .as_nanos() as i64;

        let boot_id = fs::read_to_string(self.proc_root.join("sys/kernel/random/boot_id"))
            .map(|s| s.trim().to_string())
            .unwrap_or_default();

        Ok(ClockFacts {
            monotonic_ns: (uptime_secs * 1e9) as u64,
            realtime_unix_ns,
            boot_id,
        })
    }

    fn write_sysctl(&self, name: &str, value: &str) -> Result<(), SystemError> {
        validate_sysctl_name(name)?;
        fs::write(self.proc_root.join("sys").join(name), value)?;
        Ok(())
    }
}

/// Fields extracted from `/proc/<id>/stat`.
struct StatFields {
    state: String,
    start_time: u64,
}

/// Parse `/proc/<id>/stat`. The comm field may contain spaces and
/// parentheses, so fields are counted from the final `)`.
fn parse_stat(content: &str) -> Result<StatFields, SystemError> {
    let after_comm = content
        .rfind(')')
        .map(|i| &content[i + 1..])
        .ok_or(SystemError::Unavailable)?;
    let fields: Vec<&str> = after_comm.split_whitespace().collect();

    // Field 3 of the file (state) is index 0 here; starttime is field 22.
    let state = fields.first().ok_or(SystemError::Unavailable)?;
    let start_time = fields
        .get(19)
        .and_then(|v| v.parse().ok())
        .ok_or(SystemError::Unavailable)?;

    Ok(StatFields {
        state: (*state).to_string(),
        start_time,
    })
}

/// Look up a `Key:\tvalue` line in a status-style file.
fn status_field<'a>(content: &'a str, key: &str) -> Option<&'a str> {
    content.lines().find_map(|line| {
        let rest = line.strip_prefix(key)?;
        let rest = rest.strip_prefix(':')?;
        Some(rest.trim())
    })
}

/// Real and effective ids from a `Uid:`/`Gid:` status line.
fn id_columns(content: &str, key: &str) -> Result<(u32, u32), SystemError> {
    let line = status_field(content, key).ok_or(SystemError::Unavailable)?;
    let mut cols = line.split_whitespace().filter_map(|v| v.parse().ok());
    let real = cols.next().ok_or(SystemError::Unavailable)?;
    let effective = cols.next().unwrap_or(real);
    Ok((real, effective))
}

fn first_id(content: &str, key: &str) -> Result<u32, SystemError> {
    Ok(id_columns(content, key)?.0)
}

/// A `VmSize:`-style kilobyte field, in bytes. Zero when absent (kernel
/// threads have no VM fields).
fn kb_field(content: &str, key: &str) -> u64 {
    status_field(content, key)
        .and_then(|v| v.split_whitespace().next())
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(0, |kb| kb * 1024)
}

fn parse_maps_line(line: &str) -> Option<MappingEntry> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let (range, perms, offset) = (parts.first()?, parts.get(1)?, parts.get(2)?);

    let (start, end) = range.split_once('-')?;
    Some(MappingEntry {
        start: u64::from_str_radix(start, 16).ok()?,
        end: u64::from_str_radix(end, 16).ok()?,
        permissions: (*perms).to_string(),
        offset: u64::from_str_radix(offset, 16).ok()?,
        path: parts.get(5..).map_or_else(String::new, |p| p.join(" ")),
    })
}

/// Strip the `[<address>] ` prefix from a `/proc/<tid>/stack` line.
fn parse_stack_frame(line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let frame = line
        .strip_prefix("[<")
        .and_then(|rest| rest.split_once(">] "))
        .map_or(line, |(_, frame)| frame);
    Some(frame.to_string())
}

fn parse_modules_line(line: &str) -> Option<ModuleFacts> {
    let mut fields = line.split_whitespace();
    let name = fields.next()?;
    let size = fields.next()?.parse().ok()?;
    let reference_count = fields.next()?.parse().unwrap_or(-1);
    let _deps = fields.next();
    let state = fields.next().unwrap_or("Live");

    Some(ModuleFacts {
        name: name.to_string(),
        size,
        reference_count,
        state: state.to_string(),
    })
}

fn map_errno(errno: Errno) -> SystemError {
    match errno {
        Errno::ESRCH | Errno::ENOENT => SystemError::NotFound,
        Errno::EPERM | Errno::EACCES => SystemError::AccessDenied,
        Errno::EINVAL => SystemError::InvalidArgument("rejected by host".to_string()),
        e => SystemError::Io(e.into()),
    }
}

fn map_mem_error(e: io::Error) -> SystemError {
    match e.raw_os_error() {
        Some(libc::EIO | libc::EFAULT) => SystemError::UnreadableMemory,
        Some(libc::ESRCH) => SystemError::NotFound,
        _ => SystemError::Io(e),
    }
}
