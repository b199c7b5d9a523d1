use serde::{Deserialize, Serialize};
use std::fmt;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    Running,
    Sleeping,
    DiskSleep,
    Idle,
    Stopped,
    Zombie,
    Dead,
    Unknown,
}

impl ProcessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessStatus::Running => "running",
            ProcessStatus::Sleeping => "sleeping",
            ProcessStatus::DiskSleep => "disk_sleep",
            ProcessStatus::Idle => "idle",
            ProcessStatus::Stopped => "stopped",
            ProcessStatus::Zombie => "zombie",
            ProcessStatus::Dead => "dead",
            ProcessStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One process as seen during a single sampling cycle.
///
/// The pid is only unique within the cycle that produced the snapshot; the OS
/// reuses pids over time, so history is keyed by name instead.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessSnapshot {
    pub pid: u32,
    pub name: String,
    pub cpu_percent: f32,
    pub memory_bytes: u64,
    pub status: ProcessStatus,
}

impl ProcessSnapshot {
    pub fn new(pid: u32, name: impl Into<String>, cpu_percent: f32, memory_bytes: u64) -> Self {
        Self {
            pid,
            name: name.into(),
            cpu_percent,
            memory_bytes,
            status: ProcessStatus::Running,
        }
    }

    pub fn with_status(mut self, status: ProcessStatus) -> Self {
        self.status = status;
        self
    }

    /// Resident memory in megabytes, the unit every detection threshold uses.
    pub fn memory_mb(&self) -> f64 {
        self.memory_bytes as f64 / BYTES_PER_MB
    }
}

/// Builds a snapshot whose resident memory is given in megabytes.
#[cfg(test)]
pub(crate) fn snapshot_mb(pid: u32, name: &str, cpu_percent: f32, memory_mb: f64) -> ProcessSnapshot {
    ProcessSnapshot::new(pid, name, cpu_percent, (memory_mb * BYTES_PER_MB) as u64)
}
