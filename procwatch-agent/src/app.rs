use anyhow::Result;
use procwatch_core::{
    assistant::{top_resource_hogs, DEFAULT_HOG_LIMIT},
    format_bytes, format_uptime, AggregateStats, Assistant, Config, CycleReport, InsightLevel,
    MonitorLoop, ProcessController, ProcessQuery, Severity, SysinfoSource,
};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

const CONSUMER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Headless agent: samples in the background and analyzes every cycle on a
/// single consumer task until Ctrl-C.
pub struct App {
    config: Config,
    monitor: MonitorLoop,
}

impl App {
    pub fn new(config: Config) -> Self {
        let monitor = MonitorLoop::new(SysinfoSource::new(), config.monitor.clone());
        Self { config, monitor }
    }

    pub async fn run(self) -> Result<()> {
        self.log_system_info();

        let (tx, rx) = mpsc::unbounded_channel::<AggregateStats>();
        self.monitor.register_callback(move |stats| {
            // receiver gone means we are shutting down
            let _ = tx.send(stats.clone());
        });

        let assistant = Assistant::new(self.config.detection.clone());
        let consumer = tokio::spawn(consume(assistant, rx));

        self.monitor.start()?;
        tokio::signal::ctrl_c().await?;
        info!("interrupt received, shutting down");

        let monitor = self.monitor;
        tokio::task::block_in_place(|| monitor.stop());
        if let Some(timings) = monitor.cycle_timings() {
            info!(
                samples = timings.samples,
                avg_ms = timings.avg.as_millis() as u64,
                min_ms = timings.min.as_millis() as u64,
                max_ms = timings.max.as_millis() as u64,
                "cycle timings"
            );
        }

        let top = monitor.get_processes(&ProcessQuery {
            limit: DEFAULT_HOG_LIMIT,
            ..ProcessQuery::default()
        });
        for process in top {
            debug!(pid = process.pid, name = %process.name, cpu = process.cpu_percent, "top process at exit");
        }

        // dropping the monitor drops the callback and its sender, which ends the consumer
        drop(monitor);
        match tokio::time::timeout(CONSUMER_DRAIN_TIMEOUT, consumer).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("analysis task failed: {}", e),
            Err(_) => warn!("analysis task did not finish draining, abandoning it"),
        }
        Ok(())
    }

    fn log_system_info(&self) {
        let info = self.monitor.system_info();
        let uptime = chrono::Utc::now().timestamp().saturating_sub(info.boot_time as i64).max(0) as u64;
        info!(
            os = %info.os_name,
            version = %info.os_version,
            cpus = info.logical_cpus,
            memory = %format_bytes(info.total_memory),
            available = %format_bytes(info.available_memory),
            uptime = %format_uptime(uptime),
            "host"
        );
    }
}

async fn consume(mut assistant: Assistant, mut rx: mpsc::UnboundedReceiver<AggregateStats>) {
    while let Some(stats) = rx.recv().await {
        let report = assistant.analyze(&stats);
        log_cycle(&stats, &report);

        let hogs = top_resource_hogs(&stats.processes, DEFAULT_HOG_LIMIT);
        for process in &hogs.cpu {
            debug!(
                pid = process.pid,
                name = %process.name,
                advice = %assistant.recommendation_for(process),
                "cpu hog"
            );
        }
    }
    debug!("stats channel closed");
}

fn log_cycle(stats: &AggregateStats, report: &CycleReport) {
    info!(
        cpu = %format!("{:.1}%", stats.cpu_percent),
        ram = %format!("{:.1}%", stats.ram_percent),
        ram_used = %format_bytes(stats.ram_used),
        processes = stats.process_count,
        anomalies = report.anomalies.len(),
        "cycle"
    );

    for anomaly in &report.anomalies {
        match anomaly.severity {
            Severity::Critical => error!(pid = anomaly.pid, kind = ?anomaly.kind, "{}", anomaly.message),
            Severity::High | Severity::Medium => {
                warn!(pid = anomaly.pid, kind = ?anomaly.kind, "{}", anomaly.message)
            }
            Severity::Low => info!(pid = anomaly.pid, kind = ?anomaly.kind, "{}", anomaly.message),
        }
    }

    for insight in &report.insights {
        let action = insight.action.as_deref().unwrap_or("");
        match insight.severity {
            InsightLevel::Critical => error!(title = %insight.title, action, "{}", insight.description),
            InsightLevel::Warning => warn!(title = %insight.title, action, "{}", insight.description),
            InsightLevel::Info => info!(title = %insight.title, action, "{}", insight.description),
        }
    }
}

/// One-shot termination from the command line.
pub fn kill(config: &Config, pid: u32, force: bool) -> Result<()> {
    let controller = ProcessController::system(&config.controller);
    match controller.kill(pid, force) {
        Ok(outcome) => {
            info!(pid = outcome.pid(), "{}", outcome);
            Ok(())
        }
        Err(e) => {
            error!(pid, "{}", e);
            Err(e.into())
        }
    }
}
