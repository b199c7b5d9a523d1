use crate::baseline::{Baseline, BaselineTracker, ProcessHistory};
use crate::config::DetectionConfig;
use crate::process::ProcessSnapshot;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

const CPU_CRITICAL_PERCENT: f64 = 80.0;
const MEMORY_CRITICAL_MB: f64 = 2000.0;
const LEAK_WINDOW: usize = 5;
const LEAK_MIN_INCREASES: usize = 4;
const SPIKE_FLOOR_PERCENT: f64 = 30.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Position in a ranked list; critical comes first.
    pub fn rank(&self) -> u8 {
        match self {
            Severity::Critical => 0,
            Severity::High => 1,
            Severity::Medium => 2,
            Severity::Low => 3,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    HighCpu,
    HighMemory,
    MemoryLeak,
    SuddenSpike,
}

impl AnomalyKind {
    /// Evaluation order within one process.
    pub const ALL: [AnomalyKind; 4] = [
        AnomalyKind::HighCpu,
        AnomalyKind::HighMemory,
        AnomalyKind::MemoryLeak,
        AnomalyKind::SuddenSpike,
    ];
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Anomaly {
    pub process_name: String,
    pub pid: u32,
    pub kind: AnomalyKind,
    pub severity: Severity,
    pub current_value: f64,
    pub baseline_value: f64,
    pub message: String,
}

/// Everything a rule may look at for one process.
struct Observation<'a> {
    process: &'a ProcessSnapshot,
    baseline: &'a Baseline,
    history: &'a ProcessHistory,
}

impl Observation<'_> {
    fn cpu(&self) -> f64 {
        self.process.cpu_percent as f64
    }

    fn memory_mb(&self) -> f64 {
        self.process.memory_mb()
    }
}

struct Finding {
    severity: Severity,
    current_value: f64,
    baseline_value: f64,
    message: String,
}

/// Compares each process against its own baseline and history.
///
/// Results replace the previous ones on every call; there is no suppression
/// of anomalies repeated across cycles.
pub struct AnomalyDetector {
    config: DetectionConfig,
    current: Vec<Anomaly>,
}

impl AnomalyDetector {
    pub fn new(config: DetectionConfig) -> Self {
        Self {
            config,
            current: Vec::new(),
        }
    }

    /// Runs every rule for every process in `batch` that has a baseline.
    ///
    /// `batch` is expected to already be ingested by `tracker`, so the
    /// newest history sample is the current one.
    pub fn detect(&mut self, tracker: &mut BaselineTracker, batch: &[ProcessSnapshot]) -> Vec<Anomaly> {
        tracker.recompute_baselines();

        let mut anomalies = Vec::new();
        for process in batch {
            let (Some(baseline), Some(history)) =
                (tracker.baseline(&process.name), tracker.history(&process.name))
            else {
                continue;
            };
            let observation = Observation {
                process,
                baseline,
                history,
            };

            for kind in AnomalyKind::ALL {
                if let Some(finding) = self.check_rule(kind, &observation) {
                    anomalies.push(Anomaly {
                        process_name: process.name.clone(),
                        pid: process.pid,
                        kind,
                        severity: finding.severity,
                        current_value: finding.current_value,
                        baseline_value: finding.baseline_value,
                        message: finding.message,
                    });
                }
            }
        }

        anomalies.sort_by_key(|a| a.severity.rank());
        debug!(count = anomalies.len(), "anomaly detection finished");
        self.current = anomalies.clone();
        anomalies
    }

    /// Result of the last [`detect`](Self::detect) call.
    pub fn current(&self) -> &[Anomaly] {
        &self.current
    }

    fn check_rule(&self, kind: AnomalyKind, obs: &Observation<'_>) -> Option<Finding> {
        let name = &obs.process.name;
        match kind {
            AnomalyKind::HighCpu => {
                let cpu = obs.cpu();
                let mean = obs.baseline.cpu_mean;
                if cpu > self.config.cpu_high_threshold && cpu > mean * self.config.anomaly_multiplier {
                    let severity = if cpu > CPU_CRITICAL_PERCENT {
                        Severity::Critical
                    } else {
                        Severity::High
                    };
                    return Some(Finding {
                        severity,
                        current_value: cpu,
                        baseline_value: mean,
                        message: format!(
                            "'{}' is using {:.1}% CPU (normal: {:.1}%). Consider closing it if it is not essential.",
                            name, cpu, mean
                        ),
                    });
                }
                None
            }
            AnomalyKind::HighMemory => {
                let memory = obs.memory_mb();
                let mean = obs.baseline.memory_mean;
                if memory > self.config.memory_high_threshold
                    && memory > mean * self.config.anomaly_multiplier
                {
                    let severity = if memory > MEMORY_CRITICAL_MB {
                        Severity::Critical
                    } else {
                        Severity::High
                    };
                    return Some(Finding {
                        severity,
                        current_value: memory,
                        baseline_value: mean,
                        message: format!(
                            "'{}' is using {:.0} MB (normal: {:.0} MB). Possible memory leak.",
                            name, memory, mean
                        ),
                    });
                }
                None
            }
            AnomalyKind::MemoryLeak => {
                if !self.is_leaking(obs.history) {
                    return None;
                }
                Some(Finding {
                    severity: Severity::High,
                    current_value: obs.memory_mb(),
                    baseline_value: obs.baseline.memory_mean,
                    message: format!(
                        "'{}' keeps growing in memory, a leak is likely. Restart the process.",
                        name
                    ),
                })
            }
            AnomalyKind::SuddenSpike => {
                let samples = obs.history.cpu();
                if samples.len() < 2 {
                    return None;
                }
                let previous = samples[samples.len() - 2];
                let cpu = obs.cpu();
                if cpu > previous * self.config.spike_multiplier && cpu > SPIKE_FLOOR_PERCENT {
                    return Some(Finding {
                        severity: Severity::Medium,
                        current_value: cpu,
                        baseline_value: previous,
                        message: format!(
                            "'{}' had a sudden CPU spike: {:.1}% -> {:.1}%",
                            name, previous, cpu
                        ),
                    });
                }
                None
            }
        }
    }

    /// At least four rising steps across the last five memory samples, and an
    /// average growth above the configured slope.
    fn is_leaking(&self, history: &ProcessHistory) -> bool {
        let memory = history.memory_mb();
        if memory.len() < LEAK_WINDOW {
            return false;
        }

        let window: Vec<f64> = memory.iter().skip(memory.len() - LEAK_WINDOW).copied().collect();
        let increases = window.windows(2).filter(|pair| pair[1] > pair[0]).count();
        if increases < LEAK_MIN_INCREASES {
            return false;
        }

        let slope = (window[LEAK_WINDOW - 1] - window[0]) / LEAK_WINDOW as f64;
        slope > self.config.memory_leak_slope
    }
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self::new(DetectionConfig::default())
    }
}
