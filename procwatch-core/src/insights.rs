use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

const CPU_CRITICAL: f32 = 80.0;
const CPU_WARNING: f32 = 60.0;
const RAM_CRITICAL: f32 = 85.0;
const RAM_WARNING: f32 = 70.0;
const SATURATION_LEVEL: f32 = 70.0;
const BUSY_PROCESS_COUNT: usize = 200;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum InsightLevel {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for InsightLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InsightLevel::Info => write!(f, "info"),
            InsightLevel::Warning => write!(f, "warning"),
            InsightLevel::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Insight {
    pub title: String,
    pub description: String,
    pub severity: InsightLevel,
    pub action: Option<String>,
}

impl Insight {
    fn new(title: &str, description: String, severity: InsightLevel) -> Self {
        Self {
            title: title.to_string(),
            description,
            severity,
            action: None,
        }
    }

    fn with_action(mut self, action: &str) -> Self {
        self.action = Some(action.to_string());
        self
    }
}

/// System-wide advisories, rate limited by a cooldown.
pub struct InsightGenerator {
    cooldown: Duration,
    last_generated: Option<DateTime<Utc>>,
}

impl InsightGenerator {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_generated: None,
        }
    }

    pub fn generate(&mut self, cpu_percent: f32, ram_percent: f32, process_count: usize) -> Vec<Insight> {
        self.generate_at(cpu_percent, ram_percent, process_count, Utc::now())
    }

    /// Returns nothing, without touching the clock, while `now` is inside the
    /// cooldown of the last evaluation. Otherwise evaluates and restarts the cooldown.
    pub fn generate_at(
        &mut self,
        cpu_percent: f32,
        ram_percent: f32,
        process_count: usize,
        now: DateTime<Utc>,
    ) -> Vec<Insight> {
        if let Some(last) = self.last_generated {
            if now - last < self.cooldown {
                return Vec::new();
            }
        }

        let mut insights = Vec::new();

        if cpu_percent > CPU_CRITICAL {
            insights.push(Insight::new(
                "Critical CPU",
                format!("The system is using {:.1}% CPU. Performance is degraded.", cpu_percent),
                InsightLevel::Critical,
            ));
        } else if cpu_percent > CPU_WARNING {
            insights.push(
                Insight::new(
                    "High CPU",
                    format!("CPU usage is at {:.1}%.", cpu_percent),
                    InsightLevel::Warning,
                )
                .with_action("Close applications you do not need"),
            );
        }

        if ram_percent > RAM_CRITICAL {
            insights.push(Insight::new(
                "Critical RAM",
                format!("RAM is at {:.1}%. The system may slow down.", ram_percent),
                InsightLevel::Critical,
            ));
        } else if ram_percent > RAM_WARNING {
            insights.push(
                Insight::new(
                    "High RAM",
                    format!("Memory is at {:.1}%.", ram_percent),
                    InsightLevel::Warning,
                )
                .with_action("Free memory by closing non-essential applications"),
            );
        }

        if cpu_percent > SATURATION_LEVEL && ram_percent > SATURATION_LEVEL {
            insights.push(Insight::new(
                "Saturation likely",
                "CPU and RAM are both high. The system may saturate soon.".to_string(),
                InsightLevel::Warning,
            ));
        }

        if process_count > BUSY_PROCESS_COUNT {
            insights.push(Insight::new(
                "Many active processes",
                format!("{} processes are running, which may affect performance.", process_count),
                InsightLevel::Info,
            ));
        }

        debug!(count = insights.len(), "generated insights");
        self.last_generated = Some(now);
        insights
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn generator() -> InsightGenerator {
        InsightGenerator::new(Duration::seconds(30))
    }

    fn levels(insights: &[Insight]) -> Vec<InsightLevel> {
        insights.iter().map(|i| i.severity).collect()
    }

    #[test]
    fn test_cooldown_blocks_second_call() {
        let mut generator = generator();
        assert_eq!(generator.generate_at(85.0, 90.0, 10, at(0)).len(), 3);
        assert!(generator.generate_at(85.0, 90.0, 10, at(29)).is_empty());
    }

    #[test]
    fn test_blocked_call_keeps_clock() {
        let mut generator = generator();
        generator.generate_at(10.0, 10.0, 10, at(0));
        assert!(generator.generate_at(85.0, 90.0, 10, at(20)).is_empty());
        // measured from t=0, not from the blocked call at t=20
        assert_eq!(generator.generate_at(85.0, 90.0, 10, at(30)).len(), 3);
    }

    #[test]
    fn test_empty_result_still_restarts_cooldown() {
        let mut generator = generator();
        assert!(generator.generate_at(10.0, 10.0, 10, at(0)).is_empty());
        assert!(generator.generate_at(85.0, 90.0, 10, at(10)).is_empty());
    }

    #[test]
    fn test_critical_load_yields_three_insights() {
        let mut generator = generator();
        let insights = generator.generate_at(85.0, 90.0, 150, at(0));
        assert_eq!(
            levels(&insights),
            vec![InsightLevel::Critical, InsightLevel::Critical, InsightLevel::Warning]
        );
        assert_eq!(insights[2].title, "Saturation likely");
    }

    #[test]
    fn test_warning_levels_are_exclusive() {
        let mut generator = generator();
        let insights = generator.generate_at(65.0, 75.0, 10, at(0));
        assert_eq!(levels(&insights), vec![InsightLevel::Warning, InsightLevel::Warning]);
        assert!(insights.iter().all(|i| i.action.is_some()));
    }

    #[test]
    fn test_process_count_info() {
        let mut generator = generator();
        let insights = generator.generate_at(5.0, 5.0, 201, at(0));
        assert_eq!(levels(&insights), vec![InsightLevel::Info]);

        let insights = generator.generate_at(5.0, 5.0, 200, at(60));
        assert!(insights.is_empty());
    }
}
