use crate::process::ProcessSnapshot;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

const TIMING_WINDOW: usize = 30;

/// System-wide view published once per monitor cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateStats {
    pub cpu_percent: f32,
    pub ram_percent: f32,
    pub ram_used: u64,
    pub ram_total: u64,
    pub process_count: usize,
    pub processes: Vec<ProcessSnapshot>,
}

impl Default for AggregateStats {
    fn default() -> Self {
        Self {
            cpu_percent: 0.0,
            ram_percent: 0.0,
            ram_used: 0,
            ram_total: 0,
            process_count: 0,
            processes: Vec::new(),
        }
    }
}

/// Host-level figures read once, typically for a header or an about box.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInfo {
    pub os_name: String,
    pub os_version: String,
    pub logical_cpus: usize,
    pub total_memory: u64,
    pub available_memory: u64,
    /// Seconds since the unix epoch.
    pub boot_time: u64,
}

impl Default for SystemInfo {
    fn default() -> Self {
        Self {
            os_name: "unknown".to_string(),
            os_version: "unknown".to_string(),
            logical_cpus: 0,
            total_memory: 0,
            available_memory: 0,
            boot_time: 0,
        }
    }
}

/// Rolling record of how long each monitor cycle took.
#[derive(Debug, Clone)]
pub struct CycleTimings {
    samples: VecDeque<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimingSummary {
    pub samples: usize,
    pub avg: Duration,
    pub min: Duration,
    pub max: Duration,
}

impl CycleTimings {
    pub fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(TIMING_WINDOW),
        }
    }

    pub fn record(&mut self, elapsed: Duration) {
        if self.samples.len() == TIMING_WINDOW {
            self.samples.pop_front();
        }
        self.samples.push_back(elapsed);
    }

    pub fn summary(&self) -> Option<TimingSummary> {
        let min = *self.samples.iter().min()?;
        let max = *self.samples.iter().max()?;
        let total: Duration = self.samples.iter().sum();
        Some(TimingSummary {
            samples: self.samples.len(),
            avg: total / self.samples.len() as u32,
            min,
            max,
        })
    }
}

impl Default for CycleTimings {
    fn default() -> Self {
        Self::new()
    }
}

/// Human readable byte count using 1024 steps, e.g. `1.5 GB`.
pub fn format_bytes(bytes: u64) -> String {
    let mut value = bytes as f64;
    for unit in ["B", "KB", "MB", "GB", "TB"] {
        if value < 1024.0 {
            return format!("{:.1} {}", value, unit);
        }
        value /= 1024.0;
    }
    format!("{:.1} PB", value)
}

/// Compact uptime such as `3d 4h 12m`; leading zero units are dropped.
pub fn format_uptime(uptime_secs: u64) -> String {
    let days = uptime_secs / 86_400;
    let hours = (uptime_secs % 86_400) / 3_600;
    let minutes = (uptime_secs % 3_600) / 60;

    if days > 0 {
        format!("{}d {}h {}m", days, hours, minutes)
    } else if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else {
        format!("{}m", minutes)
    }
}
