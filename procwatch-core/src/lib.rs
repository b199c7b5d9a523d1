pub mod assistant;
pub mod baseline;
pub mod config;
pub mod controller;
pub mod detector;
pub mod insights;
pub mod metrics;
pub mod monitor;
pub mod process;
pub mod sampler;

pub use assistant::{Assistant, CycleReport, ResourceHogs};
pub use baseline::{Baseline, BaselineTracker, ProcessHistory};
pub use config::{Config, ConfigError};
pub use controller::{is_critical, parse_pid, KillError, KillOutcome, ProcessController, Signaller, UnixSignaller};
pub use detector::{Anomaly, AnomalyDetector, AnomalyKind, Severity};
pub use insights::{Insight, InsightGenerator, InsightLevel};
pub use metrics::*;
pub use monitor::{MonitorLoop, ProcessQuery, SortKey, StatsCache};
pub use process::{ProcessSnapshot, ProcessStatus};
pub use sampler::{ProbeError, ProcessSampler, ProcessSource, SysinfoSource, SystemLoad};
