use crate::metrics::SystemInfo;
use crate::process::{ProcessSnapshot, ProcessStatus};
use anyhow::Result;
use std::collections::HashMap;
use std::path::Path;
use sysinfo::{Pid, Process, ProcessRefreshKind, ProcessesToUpdate, System, ThreadKind, UpdateKind};
use thiserror::Error;
use tracing::{debug, trace};

/// Linux truncates the kernel's process name (`comm`) to this many bytes.
const COMM_LEN: usize = 15;

/// Process table refresh used by every lookup: cpu, memory, and the
/// executable path and argv needed by [`full_name`].
pub(crate) fn refresh_kind() -> ProcessRefreshKind {
    ProcessRefreshKind::new()
        .with_cpu()
        .with_memory()
        .with_exe(UpdateKind::OnlyIfNotSet)
        .with_cmd(UpdateKind::OnlyIfNotSet)
}

/// The untruncated process name. A name at the `comm` limit is replaced by
/// the executable or argv[0] basename it is a prefix of.
pub(crate) fn full_name(process: &Process) -> String {
    let short = process.name().to_string_lossy().to_string();
    if short.len() < COMM_LEN {
        return short;
    }

    let exe = process.exe().and_then(Path::file_name);
    let argv0 = process.cmd().first().and_then(|arg| Path::new(arg).file_name());
    exe.into_iter()
        .chain(argv0)
        .map(|candidate| candidate.to_string_lossy().to_string())
        .find(|candidate| candidate.len() > short.len() && candidate.starts_with(&short))
        .unwrap_or(short)
}

/// Why a single process could not be read during enumeration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProbeError {
    #[error("process {0} exited during the scan")]
    Vanished(u32),

    #[error("access denied reading process {0}")]
    AccessDenied(u32),

    #[error("process {0} is a zombie")]
    Zombie(u32),
}

/// Host-wide CPU and memory load at the last refresh.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SystemLoad {
    pub cpu_percent: f32,
    pub ram_used: u64,
    pub ram_total: u64,
}

impl SystemLoad {
    pub fn ram_percent(&self) -> f32 {
        if self.ram_total == 0 {
            return 0.0;
        }
        (self.ram_used as f64 / self.ram_total as f64 * 100.0) as f32
    }
}

/// OS process enumeration capability.
///
/// `processes` reports failures per entry so one unreadable process never
/// hides the rest of the table.
pub trait ProcessSource: Send {
    fn refresh(&mut self) -> Result<()>;
    fn processes(&self) -> Vec<Result<ProcessSnapshot, ProbeError>>;
    fn load(&self) -> SystemLoad;
    fn system_info(&self) -> SystemInfo;
}

/// [`ProcessSource`] backed by `sysinfo`.
pub struct SysinfoSource {
    system: System,
}

impl SysinfoSource {
    pub fn new() -> Self {
        let mut system = System::new();
        // cpu usage is a delta between refreshes, so prime the counters once
        system.refresh_cpu_usage();
        system.refresh_memory();
        Self { system }
    }

    fn probe(pid: Pid, process: &Process) -> Result<ProcessSnapshot, ProbeError> {
        let pid = pid.as_u32();
        let status = convert_process_status(process.status());
        match status {
            ProcessStatus::Zombie => return Err(ProbeError::Zombie(pid)),
            ProcessStatus::Dead => return Err(ProbeError::Vanished(pid)),
            _ => {}
        }

        let name = full_name(process);
        if name.is_empty() {
            // /proc entry disappeared between listing and reading its stat
            return Err(ProbeError::Vanished(pid));
        }

        Ok(ProcessSnapshot::new(pid, name, process.cpu_usage(), process.memory()).with_status(status))
    }
}

impl ProcessSource for SysinfoSource {
    fn refresh(&mut self) -> Result<()> {
        self.system
            .refresh_processes_specifics(ProcessesToUpdate::All, true, refresh_kind());
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();
        Ok(())
    }

    fn processes(&self) -> Vec<Result<ProcessSnapshot, ProbeError>> {
        self.system
            .processes()
            .iter()
            // Linux tasks show up alongside their process; they are not processes
            .filter(|(_, process)| !matches!(process.thread_kind(), Some(ThreadKind::Userland)))
            .map(|(pid, process)| Self::probe(*pid, process))
            .collect()
    }

    fn load(&self) -> SystemLoad {
        SystemLoad {
            cpu_percent: self.system.global_cpu_usage(),
            ram_used: self.system.used_memory(),
            ram_total: self.system.total_memory(),
        }
    }

    fn system_info(&self) -> SystemInfo {
        SystemInfo {
            os_name: System::name().unwrap_or_else(|| "unknown".to_string()),
            os_version: System::os_version().unwrap_or_else(|| "unknown".to_string()),
            logical_cpus: self.system.cpus().len(),
            total_memory: self.system.total_memory(),
            available_memory: self.system.available_memory(),
            boot_time: System::boot_time(),
        }
    }
}

impl Default for SysinfoSource {
    fn default() -> Self {
        Self::new()
    }
}

fn convert_process_status(status: sysinfo::ProcessStatus) -> ProcessStatus {
    match status {
        sysinfo::ProcessStatus::Run => ProcessStatus::Running,
        sysinfo::ProcessStatus::Sleep => ProcessStatus::Sleeping,
        sysinfo::ProcessStatus::UninterruptibleDiskSleep => ProcessStatus::DiskSleep,
        sysinfo::ProcessStatus::Idle => ProcessStatus::Idle,
        sysinfo::ProcessStatus::Stop | sysinfo::ProcessStatus::Tracing => ProcessStatus::Stopped,
        sysinfo::ProcessStatus::Zombie => ProcessStatus::Zombie,
        sysinfo::ProcessStatus::Dead => ProcessStatus::Dead,
        _ => ProcessStatus::Unknown,
    }
}

/// Turns a [`ProcessSource`] into one pid-keyed table per cycle.
pub struct ProcessSampler {
    source: Box<dyn ProcessSource>,
}

impl ProcessSampler {
    pub fn new(source: impl ProcessSource + 'static) -> Self {
        Self {
            source: Box::new(source),
        }
    }

    /// Re-enumerates every process. Entries that fail to probe are dropped;
    /// only a failure of the refresh itself is an error.
    pub fn sample(&mut self) -> Result<HashMap<u32, ProcessSnapshot>> {
        self.source.refresh()?;

        let mut processes = HashMap::new();
        let mut skipped = 0usize;
        for entry in self.source.processes() {
            match entry {
                Ok(snapshot) => {
                    processes.insert(snapshot.pid, snapshot);
                }
                Err(error) => {
                    trace!(%error, "omitting process from sample");
                    skipped += 1;
                }
            }
        }

        debug!(count = processes.len(), skipped, "sampled process table");
        Ok(processes)
    }

    pub fn load(&self) -> SystemLoad {
        self.source.load()
    }

    pub fn system_info(&self) -> SystemInfo {
        self.source.system_info()
    }
}
