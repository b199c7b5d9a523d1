use crate::config::MonitorConfig;
use crate::metrics::{AggregateStats, CycleTimings, SystemInfo, TimingSummary};
use crate::process::ProcessSnapshot;
use crate::sampler::{ProcessSampler, ProcessSource};
use anyhow::Result;
use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

pub type StatsCallback = Arc<dyn Fn(&AggregateStats) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    Cpu,
    Memory,
    Name,
    Pid,
}

impl SortKey {
    /// Maps a column name to a sort key. Unknown names sort by cpu.
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "cpu" => SortKey::Cpu,
            "memory" => SortKey::Memory,
            "name" => SortKey::Name,
            "pid" => SortKey::Pid,
            other => {
                debug!(sort_by = other, "unknown sort key, falling back to cpu");
                SortKey::Cpu
            }
        }
    }

    fn compare(&self, a: &ProcessSnapshot, b: &ProcessSnapshot) -> Ordering {
        match self {
            SortKey::Cpu => a.cpu_percent.total_cmp(&b.cpu_percent),
            SortKey::Memory => a.memory_bytes.cmp(&b.memory_bytes),
            SortKey::Name => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
            SortKey::Pid => a.pid.cmp(&b.pid),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessQuery {
    pub sort_by: SortKey,
    /// Descending when true.
    pub reverse: bool,
    pub limit: usize,
    /// Case-insensitive substring of the process name; empty matches all.
    pub filter: String,
}

impl Default for ProcessQuery {
    fn default() -> Self {
        Self {
            sort_by: SortKey::Cpu,
            reverse: true,
            limit: 100,
            filter: String::new(),
        }
    }
}

impl ProcessQuery {
    pub fn apply(&self, mut processes: Vec<ProcessSnapshot>) -> Vec<ProcessSnapshot> {
        if !self.filter.is_empty() {
            let needle = self.filter.to_lowercase();
            processes.retain(|p| p.name.to_lowercase().contains(&needle));
        }

        // sort_by is stable, and reversing the comparator keeps ties in input order
        processes.sort_by(|a, b| {
            let ordering = self.sort_by.compare(a, b);
            if self.reverse {
                ordering.reverse()
            } else {
                ordering
            }
        });
        processes.truncate(self.limit);
        processes
    }
}

/// Latest published [`AggregateStats`]. Readers always get a full copy of one
/// cycle's data; the loop replaces it wholesale.
pub struct StatsCache {
    stats: Mutex<AggregateStats>,
}

impl StatsCache {
    pub fn new() -> Self {
        Self {
            stats: Mutex::new(AggregateStats::default()),
        }
    }

    pub fn replace(&self, stats: AggregateStats) {
        *self.stats.lock() = stats;
    }

    pub fn snapshot(&self) -> AggregateStats {
        self.stats.lock().clone()
    }

    pub fn processes(&self, query: &ProcessQuery) -> Vec<ProcessSnapshot> {
        let processes = self.stats.lock().processes.clone();
        query.apply(processes)
    }
}

impl Default for StatsCache {
    fn default() -> Self {
        Self::new()
    }
}

struct Worker {
    handle: JoinHandle<()>,
    // closed when the thread exits, however it exits
    exited: Receiver<()>,
}

struct LoopState {
    running: bool,
    generation: u64,
    worker: Option<Worker>,
}

struct Shared {
    cache: StatsCache,
    sampler: Mutex<ProcessSampler>,
    callbacks: Mutex<Vec<StatsCallback>>,
    timings: Mutex<CycleTimings>,
    state: Mutex<LoopState>,
    wake: Condvar,
}

impl Shared {
    fn is_current(&self, generation: u64) -> bool {
        let state = self.state.lock();
        state.running && state.generation == generation
    }

    fn collect(&self) -> Result<AggregateStats> {
        let mut sampler = self.sampler.lock();
        let processes = sampler.sample()?;
        let load = sampler.load();

        Ok(AggregateStats {
            cpu_percent: load.cpu_percent,
            ram_percent: load.ram_percent(),
            ram_used: load.ram_used,
            ram_total: load.ram_total,
            process_count: processes.len(),
            processes: processes.into_values().collect(),
        })
    }

    fn cycle(&self) -> Result<()> {
        let stats = self.collect()?;
        self.cache.replace(stats.clone());
        self.notify(&stats);
        Ok(())
    }

    fn notify(&self, stats: &AggregateStats) {
        let callbacks = self.callbacks.lock().clone();
        for (index, callback) in callbacks.iter().enumerate() {
            if panic::catch_unwind(AssertUnwindSafe(|| callback(stats))).is_err() {
                error!(callback = index, "stats callback panicked");
            }
        }
    }

    /// Sleeps up to `timeout`, returning early once this generation is stopped.
    fn sleep(&self, generation: u64, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.running && state.generation == generation {
            if self.wake.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
    }

    fn run(&self, generation: u64, interval: Duration) {
        while self.is_current(generation) {
            let started = Instant::now();

            match panic::catch_unwind(AssertUnwindSafe(|| self.cycle())) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("monitor cycle failed: {:#}", e),
                Err(_) => error!("monitor cycle panicked"),
            }

            let elapsed = started.elapsed();
            self.timings.lock().record(elapsed);
            self.sleep(generation, interval.saturating_sub(elapsed));
        }
        debug!(generation, "monitor thread exiting");
    }
}

/// Background sampling loop.
///
/// One dedicated thread samples the process table every `interval`, replaces
/// the [`StatsCache`] and hands each registered callback the new stats.
/// Callbacks run on that thread, one after another.
pub struct MonitorLoop {
    shared: Arc<Shared>,
    config: MonitorConfig,
}

impl MonitorLoop {
    pub fn new(source: impl ProcessSource + 'static, config: MonitorConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                cache: StatsCache::new(),
                sampler: Mutex::new(ProcessSampler::new(source)),
                callbacks: Mutex::new(Vec::new()),
                timings: Mutex::new(CycleTimings::new()),
                state: Mutex::new(LoopState {
                    running: false,
                    generation: 0,
                    worker: None,
                }),
                wake: Condvar::new(),
            }),
            config,
        }
    }

    /// Starts the sampling thread. Does nothing if already running.
    pub fn start(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        if state.running {
            return Ok(());
        }

        state.running = true;
        state.generation += 1;
        let generation = state.generation;
        let interval = self.config.interval();
        let shared = Arc::clone(&self.shared);
        let (exited_tx, exited) = mpsc::channel::<()>();

        let spawned = thread::Builder::new()
            .name("procwatch-monitor".to_string())
            .spawn(move || {
                let _exited = exited_tx;
                shared.run(generation, interval);
            });

        match spawned {
            Ok(handle) => {
                state.worker = Some(Worker { handle, exited });
                info!(interval_ms = interval.as_millis() as u64, "monitor started");
                Ok(())
            }
            Err(e) => {
                state.running = false;
                Err(e.into())
            }
        }
    }

    /// Stops the sampling thread and waits for it to exit, at most for the
    /// configured join timeout. Does nothing if not running.
    ///
    /// Returns false when the thread was still busy at the timeout and had to
    /// be detached.
    pub fn stop(&self) -> bool {
        let worker = {
            let mut state = self.shared.state.lock();
            if !state.running {
                return true;
            }
            state.running = false;
            state.worker.take()
        };
        self.shared.wake.notify_all();

        let mut joined = true;
        if let Some(worker) = worker {
            match worker.exited.recv_timeout(self.config.join_timeout()) {
                Err(RecvTimeoutError::Timeout) => {
                    warn!(
                        timeout_ms = self.config.join_timeout().as_millis() as u64,
                        "monitor thread did not exit in time, detaching"
                    );
                    joined = false;
                }
                _ => {
                    if worker.handle.join().is_err() {
                        warn!("monitor thread panicked");
                    }
                }
            }
        }
        info!("monitor stopped");
        joined
    }

    pub fn is_running(&self) -> bool {
        self.shared.state.lock().running
    }

    pub fn register_callback<F>(&self, callback: F)
    where
        F: Fn(&AggregateStats) + Send + Sync + 'static,
    {
        self.shared.callbacks.lock().push(Arc::new(callback));
    }

    /// Samples once on the calling thread and updates the cache. Callbacks
    /// are not invoked.
    pub fn refresh_now(&self) -> Result<()> {
        let stats = self.shared.collect()?;
        self.shared.cache.replace(stats);
        Ok(())
    }

    pub fn get_current_stats(&self) -> AggregateStats {
        self.shared.cache.snapshot()
    }

    pub fn get_processes(&self, query: &ProcessQuery) -> Vec<ProcessSnapshot> {
        self.shared.cache.processes(query)
    }

    pub fn cycle_timings(&self) -> Option<TimingSummary> {
        self.shared.timings.lock().summary()
    }

    pub fn system_info(&self) -> SystemInfo {
        self.shared.sampler.lock().system_info()
    }
}

impl Drop for MonitorLoop {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
