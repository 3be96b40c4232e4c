use crate::domain::model::{PipelineRunRecord, RunOutcome};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Mutex;

const HISTORY_CAP: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub health: Health,
    pub success_rate: f64,
    pub total_runs: usize,
    pub successful_runs: usize,
    pub failed_runs: usize,
    pub average_duration_seconds: f64,
    pub last_run: Option<DateTime<Utc>>,
    pub recent_errors: Vec<String>,
}

/// In-process run history for the health/alerting surface. The coordinator
/// records each finalized run; readers only ever get copies.
#[derive(Default)]
pub struct PipelineMonitor {
    runs: Mutex<VecDeque<PipelineRunRecord>>,
}

impl PipelineMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, run: &PipelineRunRecord) {
        match run.outcome {
            RunOutcome::Failed => tracing::error!(
                outcome = run.outcome.as_str(),
                error = run.error_summary.as_deref().unwrap_or("unknown"),
                "pipeline run failed"
            ),
            _ => tracing::info!(
                outcome = run.outcome.as_str(),
                loaded = run.loaded,
                rejected = run.rejected,
                duration_s = run.duration_seconds(),
                "pipeline run recorded"
            ),
        }

        let mut runs = self.runs.lock().unwrap();
        runs.push_back(run.clone());
        while runs.len() > HISTORY_CAP {
            runs.pop_front();
        }
    }

    pub fn recent(&self, limit: usize) -> Vec<PipelineRunRecord> {
        let runs = self.runs.lock().unwrap();
        runs.iter().rev().take(limit).cloned().collect()
    }

    pub fn health_status(&self) -> HealthStatus {
        let runs = self.runs.lock().unwrap();
        let total_runs = runs.len();
        let successful_runs = runs.iter().filter(|r| r.succeeded()).count();
        let failed_runs = total_runs - successful_runs;

        let success_rate = if total_runs > 0 {
            (successful_runs as f64 / total_runs as f64 * 100.0 * 100.0).round() / 100.0
        } else {
            100.0
        };

        let average_duration_seconds = if total_runs > 0 {
            runs.iter().map(|r| r.duration_seconds() as f64).sum::<f64>() / total_runs as f64
        } else {
            0.0
        };

        let health = if success_rate >= 95.0 {
            Health::Healthy
        } else if success_rate >= 80.0 {
            Health::Degraded
        } else {
            Health::Unhealthy
        };

        let recent_errors = runs
            .iter()
            .rev()
            .filter_map(|r| r.error_summary.clone())
            .take(5)
            .collect();

        HealthStatus {
            health,
            success_rate,
            total_runs,
            successful_runs,
            failed_runs,
            average_duration_seconds,
            last_run: runs.back().map(|r| r.finished_at),
            recent_errors,
        }
    }
}

#[cfg(feature = "cli")]
pub use system::SystemMonitor;

#[cfg(feature = "cli")]
mod system {
    use std::sync::Mutex;
    use std::time::Instant;
    use sysinfo::{Pid, RefreshKind, System};

    /// Process-level resource stats logged between pipeline stages when
    /// monitoring is enabled.
    pub struct SystemMonitor {
        system: Mutex<System>,
        pid: Option<Pid>,
        start_time: Instant,
        enabled: bool,
    }

    impl SystemMonitor {
        pub fn new(enabled: bool) -> Self {
            let mut system = System::new_with_specifics(RefreshKind::everything());
            system.refresh_all();
            Self {
                system: Mutex::new(system),
                pid: sysinfo::get_current_pid().ok(),
                start_time: Instant::now(),
                enabled,
            }
        }

        pub fn log_stats(&self, phase: &str) {
            if !self.enabled {
                return;
            }
            let Some(pid) = self.pid else { return };
            let Ok(mut system) = self.system.lock() else {
                return;
            };
            system.refresh_all();
            if let Some(process) = system.process(pid) {
                tracing::info!(
                    phase,
                    cpu_percent = process.cpu_usage(),
                    memory_mb = process.memory() / 1024 / 1024,
                    elapsed = ?self.start_time.elapsed(),
                    "system stats"
                );
            }
        }

        pub fn is_enabled(&self) -> bool {
            self.enabled
        }
    }
}
