//! Analysis facade: one owner for the baseline tracker, the anomaly detector
//! and the insight generator.

use crate::baseline::BaselineTracker;
use crate::config::DetectionConfig;
use crate::detector::{Anomaly, AnomalyDetector};
use crate::insights::{Insight, InsightGenerator};
use crate::metrics::AggregateStats;
use crate::process::ProcessSnapshot;
use serde::{Deserialize, Serialize};

pub const DEFAULT_HOG_LIMIT: usize = 3;

const SYSTEM_PROCESSES: &[&str] = &[
    "System Idle Process",
    "System",
    "svchost.exe",
    "csrss.exe",
    "smss.exe",
    "wininit.exe",
    "services.exe",
    "lsass.exe",
];

const BROWSERS: &[&str] = &["chrome", "firefox", "edge"];

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResourceHogs {
    pub cpu: Vec<ProcessSnapshot>,
    pub memory: Vec<ProcessSnapshot>,
}

/// What one pass over a stats snapshot produced.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CycleReport {
    pub anomalies: Vec<Anomaly>,
    pub insights: Vec<Insight>,
}

/// Not synchronized; feed it from a single consumer.
pub struct Assistant {
    tracker: BaselineTracker,
    detector: AnomalyDetector,
    insights: InsightGenerator,
}

impl Assistant {
    pub fn new(config: DetectionConfig) -> Self {
        Self {
            tracker: BaselineTracker::new(config.history_size),
            insights: InsightGenerator::new(config.insights_cooldown()),
            detector: AnomalyDetector::new(config),
        }
    }

    pub fn update_process_data(&mut self, batch: &[ProcessSnapshot]) {
        self.tracker.update(batch);
    }

    pub fn detect_anomalies(&mut self, batch: &[ProcessSnapshot]) -> Vec<Anomaly> {
        self.detector.detect(&mut self.tracker, batch)
    }

    pub fn generate_insights(&mut self, cpu_percent: f32, ram_percent: f32, process_count: usize) -> Vec<Insight> {
        self.insights.generate(cpu_percent, ram_percent, process_count)
    }

    /// Ingest, detect and advise for one monitor cycle.
    pub fn analyze(&mut self, stats: &AggregateStats) -> CycleReport {
        self.update_process_data(&stats.processes);
        CycleReport {
            anomalies: self.detect_anomalies(&stats.processes),
            insights: self.generate_insights(stats.cpu_percent, stats.ram_percent, stats.process_count),
        }
    }

    pub fn tracker(&self) -> &BaselineTracker {
        &self.tracker
    }

    /// Anomalies from the most recent detection.
    pub fn current_anomalies(&self) -> &[Anomaly] {
        self.detector.current()
    }

    pub fn top_resource_hogs(&self, batch: &[ProcessSnapshot], limit: usize) -> ResourceHogs {
        top_resource_hogs(batch, limit)
    }

    pub fn recommendation_for(&self, process: &ProcessSnapshot) -> String {
        recommendation_for(process)
    }
}

impl Default for Assistant {
    fn default() -> Self {
        Self::new(DetectionConfig::default())
    }
}

/// Heaviest processes by CPU and by memory, highest first. Ties keep input order.
pub fn top_resource_hogs(batch: &[ProcessSnapshot], limit: usize) -> ResourceHogs {
    let mut cpu = batch.to_vec();
    cpu.sort_by(|a, b| b.cpu_percent.total_cmp(&a.cpu_percent));
    cpu.truncate(limit);

    let mut memory = batch.to_vec();
    memory.sort_by(|a, b| b.memory_bytes.cmp(&a.memory_bytes));
    memory.truncate(limit);

    ResourceHogs { cpu, memory }
}

pub fn recommendation_for(process: &ProcessSnapshot) -> String {
    let name = &process.name;
    let memory_mb = process.memory_mb();

    if SYSTEM_PROCESSES.contains(&name.as_str()) {
        return format!("'{}' is a critical system process and should not be closed.", name);
    }

    let lower = name.to_lowercase();
    if BROWSERS.iter().any(|browser| lower.contains(browser)) && memory_mb > 500.0 {
        return format!("'{}' is using a lot of RAM. Close unneeded tabs or extensions.", name);
    }

    if process.cpu_percent > 50.0 {
        return format!("'{}' is using a lot of CPU. Check whether it is doing important work.", name);
    }

    if memory_mb > 1000.0 {
        return format!(
            "'{}' is using {:.0} MB of RAM. Consider restarting it if it is not essential.",
            name, memory_mb
        );
    }

    format!("'{}' is running normally.", name)
}
