use crate::process::ProcessSnapshot;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::{debug, trace};

/// How long a name may be missing from the input before its history is dropped.
pub const ABSENCE_LIMIT_SECS: i64 = 120;

const MIN_BASELINE_SAMPLES: usize = 3;

/// Bounded, oldest-first history of one process name. The three sequences
/// always have the same length.
#[derive(Debug, Clone)]
pub struct ProcessHistory {
    cpu: VecDeque<f64>,
    memory_mb: VecDeque<f64>,
    timestamps: VecDeque<DateTime<Utc>>,
}

impl ProcessHistory {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            cpu: VecDeque::with_capacity(capacity + 1),
            memory_mb: VecDeque::with_capacity(capacity + 1),
            timestamps: VecDeque::with_capacity(capacity + 1),
        }
    }

    fn push(&mut self, cpu: f64, memory_mb: f64, at: DateTime<Utc>, capacity: usize) {
        self.cpu.push_back(cpu);
        self.memory_mb.push_back(memory_mb);
        self.timestamps.push_back(at);
        while self.cpu.len() > capacity {
            self.cpu.pop_front();
            self.memory_mb.pop_front();
            self.timestamps.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.cpu.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cpu.is_empty()
    }

    pub fn cpu(&self) -> &VecDeque<f64> {
        &self.cpu
    }

    pub fn memory_mb(&self) -> &VecDeque<f64> {
        &self.memory_mb
    }

    pub fn timestamps(&self) -> &VecDeque<DateTime<Utc>> {
        &self.timestamps
    }

    pub fn last_seen(&self) -> Option<DateTime<Utc>> {
        self.timestamps.back().copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub cpu_mean: f64,
    pub cpu_stdev: f64,
    pub memory_mean: f64,
    pub memory_stdev: f64,
}

impl Baseline {
    fn compute(history: &ProcessHistory) -> Option<Self> {
        Some(Self {
            cpu_mean: mean(&history.cpu)?,
            cpu_stdev: sample_stdev(&history.cpu)?,
            memory_mean: mean(&history.memory_mb)?,
            memory_stdev: sample_stdev(&history.memory_mb)?,
        })
    }
}

fn mean(values: &VecDeque<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    mean.is_finite().then_some(mean)
}

fn sample_stdev(values: &VecDeque<f64>) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let mean = mean(values)?;
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    let stdev = variance.sqrt();
    stdev.is_finite().then_some(stdev)
}

/// Rolling per-name history and the baselines derived from it.
///
/// Not synchronized; drive it from a single thread.
#[derive(Debug, Clone)]
pub struct BaselineTracker {
    history_size: usize,
    histories: HashMap<String, ProcessHistory>,
    baselines: HashMap<String, Baseline>,
}

impl BaselineTracker {
    pub fn new(history_size: usize) -> Self {
        Self {
            history_size,
            histories: HashMap::new(),
            baselines: HashMap::new(),
        }
    }

    pub fn update(&mut self, batch: &[ProcessSnapshot]) {
        self.update_at(batch, Utc::now());
    }

    /// Appends one sample per process in `batch`, then forgets names that
    /// are absent from `batch` and were last seen more than two minutes before `now`.
    pub fn update_at(&mut self, batch: &[ProcessSnapshot], now: DateTime<Utc>) {
        for process in batch {
            let history_size = self.history_size;
            self.histories
                .entry(process.name.clone())
                .or_insert_with(|| ProcessHistory::with_capacity(history_size))
                .push(process.cpu_percent as f64, process.memory_mb(), now, history_size);
        }

        let present: HashSet<&str> = batch.iter().map(|p| p.name.as_str()).collect();
        self.purge_absent(&present, now);
    }

    fn purge_absent(&mut self, present: &HashSet<&str>, now: DateTime<Utc>) {
        let cutoff = now - Duration::seconds(ABSENCE_LIMIT_SECS);
        let stale: Vec<String> = self
            .histories
            .iter()
            .filter(|(name, _)| !present.contains(name.as_str()))
            .filter(|(_, history)| history.last_seen().map_or(true, |seen| seen < cutoff))
            .map(|(name, _)| name.clone())
            .collect();

        for name in stale {
            trace!(name = %name, "forgetting process history");
            self.histories.remove(&name);
            self.baselines.remove(&name);
        }
    }

    /// Recomputes every baseline that has enough samples. A name whose
    /// statistics cannot be computed keeps its previous baseline.
    pub fn recompute_baselines(&mut self) {
        let mut skipped = 0usize;
        for (name, history) in &self.histories {
            if history.len() < MIN_BASELINE_SAMPLES {
                continue;
            }
            match Baseline::compute(history) {
                Some(baseline) => {
                    self.baselines.insert(name.clone(), baseline);
                }
                None => skipped += 1,
            }
        }
        if skipped > 0 {
            debug!(skipped, "skipped degenerate baselines");
        }
    }

    pub fn history(&self, name: &str) -> Option<&ProcessHistory> {
        self.histories.get(name)
    }

    pub fn baseline(&self, name: &str) -> Option<&Baseline> {
        self.baselines.get(name)
    }

    pub fn tracked(&self) -> usize {
        self.histories.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::snapshot_mb;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_history_is_bounded() {
        let mut tracker = BaselineTracker::new(20);
        for i in 0..50 {
            tracker.update_at(&[snapshot_mb(1, "worker", i as f32, 100.0)], at(i));
            assert!(tracker.history("worker").unwrap().len() <= 20);
        }

        let history = tracker.history("worker").unwrap();
        assert_eq!(history.len(), 20);
        assert_eq!(history.cpu().front(), Some(&30.0));
        assert_eq!(history.timestamps().len(), 20);
        assert_eq!(history.memory_mb().len(), 20);
    }

    #[test]
    fn test_absent_process_purged_after_two_minutes() {
        let mut tracker = BaselineTracker::new(20);
        for i in 0..3 {
            tracker.update_at(&[snapshot_mb(1, "gone", 5.0, 10.0)], at(i));
        }
        tracker.recompute_baselines();
        assert!(tracker.baseline("gone").is_some());

        let other = [snapshot_mb(2, "other", 1.0, 10.0)];
        // last seen at t=2; exactly 120s later it is still kept
        tracker.update_at(&other, at(122));
        assert!(tracker.history("gone").is_some());

        tracker.update_at(&other, at(123));
        assert!(tracker.history("gone").is_none());
        assert!(tracker.baseline("gone").is_none());
        assert_eq!(tracker.tracked(), 1);
    }

    #[test]
    fn test_present_process_never_purged() {
        let mut tracker = BaselineTracker::new(20);
        tracker.update_at(&[snapshot_mb(1, "steady", 1.0, 10.0)], at(0));
        tracker.update_at(&[snapshot_mb(1, "steady", 1.0, 10.0)], at(10_000));
        assert_eq!(tracker.history("steady").unwrap().len(), 2);
    }

    #[test]
    fn test_baseline_requires_three_samples() {
        let mut tracker = BaselineTracker::new(20);
        tracker.update_at(&[snapshot_mb(1, "app", 10.0, 100.0)], at(0));
        tracker.update_at(&[snapshot_mb(1, "app", 20.0, 200.0)], at(1));
        tracker.recompute_baselines();
        assert!(tracker.baseline("app").is_none());

        tracker.update_at(&[snapshot_mb(1, "app", 30.0, 300.0)], at(2));
        tracker.recompute_baselines();
        let baseline = tracker.baseline("app").unwrap();
        assert!((baseline.cpu_mean - 20.0).abs() < 1e-9);
        assert!((baseline.cpu_stdev - 10.0).abs() < 1e-9);
        assert!((baseline.memory_mean - 200.0).abs() < 1e-9);
        assert!((baseline.memory_stdev - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_degenerate_samples_are_skipped() {
        let mut tracker = BaselineTracker::new(20);
        for i in 0..3 {
            tracker.update_at(&[snapshot_mb(1, "broken", f32::NAN, 1.0)], at(i));
            tracker.update_at(&[snapshot_mb(2, "fine", 1.0, 1.0)], at(i));
        }
        tracker.recompute_baselines();
        assert!(tracker.baseline("broken").is_none());
        assert!(tracker.baseline("fine").is_some());
    }
}
