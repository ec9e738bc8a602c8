//! Cron-driven export scheduler.
//!
//! Runs long-running report exports in the background: a fired job requests
//! the report from the broker adapter, polls its readiness, persists the
//! payload under the export directory, audits the run, and prunes files
//! older than the job's retention. Jobs run on the scheduler's own worker
//! pool and never block request handling.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;

use crate::audit::{AuditLog, EventType};
use crate::broker::BrokerAdapter;
use crate::error::GateError;

const REPORT_POLL_INTERVAL: Duration = Duration::from_secs(2);
const REPORT_MAX_POLLS: u32 = 30;

/// Configuration of one export job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportJobConfig {
    /// Report query id passed to the broker.
    pub id: String,
    /// Human-readable job name.
    pub name: String,
    /// Whether the job may run at all.
    pub enabled: bool,
    /// Whether the job is scheduled automatically on start.
    pub auto_schedule: bool,
    /// Cron expression, 5-field or 6-field.
    pub cron: String,
    /// Files older than this many days are pruned after each run.
    pub retention_days: u32,
}

/// Normalize a cron expression to the 6-field (with seconds) form the
/// scheduler accepts.
///
/// # Errors
///
/// Validation error for anything other than 5 or 6 fields.
pub fn normalize_cron(expr: &str) -> Result<String, GateError> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    match fields.len() {
        5 => Ok(format!("0 {}", fields.join(" "))),
        6 => Ok(fields.join(" ")),
        n => Err(GateError::validation(
            "BAD_CRON",
            format!("cron expression must have 5 or 6 fields, got {n}"),
        )
        .with_context("cron", expr)),
    }
}

/// Background export scheduler.
pub struct ExportScheduler {
    broker: Arc<dyn BrokerAdapter>,
    audit: Arc<AuditLog>,
    export_dir: PathBuf,
    jobs: Vec<ExportJobConfig>,
    scheduler: tokio::sync::Mutex<Option<JobScheduler>>,
    cancel: CancellationToken,
}

impl ExportScheduler {
    /// Create a scheduler for the given jobs.
    #[must_use]
    pub fn new(
        broker: Arc<dyn BrokerAdapter>,
        audit: Arc<AuditLog>,
        export_dir: impl Into<PathBuf>,
        jobs: Vec<ExportJobConfig>,
    ) -> Self {
        Self {
            broker,
            audit,
            export_dir: export_dir.into(),
            jobs,
            scheduler: tokio::sync::Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    /// Start the scheduler, registering every enabled auto-schedule job.
    /// Idempotent.
    ///
    /// # Errors
    ///
    /// Validation errors for bad cron expressions; internal errors when the
    /// scheduler cannot start.
    pub async fn start(&self) -> Result<usize, GateError> {
        let mut guard = self.scheduler.lock().await;
        if guard.is_some() {
            tracing::warn!("export scheduler already running");
            return Ok(0);
        }

        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| GateError::internal(format!("scheduler init failed: {e}")))?;

        let mut scheduled = 0usize;
        for job_config in self.jobs.iter().filter(|j| j.enabled && j.auto_schedule) {
            let cron = normalize_cron(&job_config.cron)?;
            let broker = Arc::clone(&self.broker);
            let audit = Arc::clone(&self.audit);
            let export_dir = self.export_dir.clone();
            let config = job_config.clone();
            let cancel = self.cancel.clone();

            let job = Job::new_async(cron.as_str(), move |_uuid, _lock| {
                let broker = Arc::clone(&broker);
                let audit = Arc::clone(&audit);
                let export_dir = export_dir.clone();
                let config = config.clone();
                let cancel = cancel.clone();
                Box::pin(async move {
                    if let Err(e) = run_export(&*broker, &audit, &export_dir, &config, &cancel).await
                    {
                        tracing::error!(job = %config.name, error = %e, "export job failed");
                    }
                })
            })
            .map_err(|e| {
                GateError::validation("BAD_CRON", format!("cannot schedule {}: {e}", job_config.id))
            })?;

            scheduler
                .add(job)
                .await
                .map_err(|e| GateError::internal(format!("cannot register job: {e}")))?;
            scheduled += 1;
        }

        scheduler
            .start()
            .await
            .map_err(|e| GateError::internal(format!("scheduler start failed: {e}")))?;
        *guard = Some(scheduler);

        tracing::info!(scheduled, "export scheduler started");
        Ok(scheduled)
    }

    /// Stop the scheduler. With `wait`, in-flight jobs are allowed to
    /// observe the cancellation token and finish their final audit write.
    ///
    /// # Errors
    ///
    /// Internal error when shutdown fails.
    pub async fn stop(&self, wait: bool) -> Result<(), GateError> {
        self.cancel.cancel();
        let mut guard = self.scheduler.lock().await;
        if let Some(mut scheduler) = guard.take() {
            if wait {
                // Give observing jobs one poll interval to wind down.
                tokio::time::sleep(REPORT_POLL_INTERVAL).await;
            }
            scheduler
                .shutdown()
                .await
                .map_err(|e| GateError::internal(format!("scheduler shutdown failed: {e}")))?;
        }
        tracing::info!("export scheduler stopped");
        Ok(())
    }

    /// Run one job immediately, outside its schedule.
    ///
    /// # Errors
    ///
    /// Propagates broker, filesystem, and audit failures.
    pub async fn run_now(&self, job_id: &str) -> Result<PathBuf, GateError> {
        let config = self
            .jobs
            .iter()
            .find(|j| j.id == job_id)
            .ok_or_else(|| GateError::not_found("export job", job_id))?;
        run_export(&*self.broker, &self.audit, &self.export_dir, config, &self.cancel).await
    }
}

/// Execute one export: request, poll, persist, prune.
async fn run_export(
    broker: &dyn BrokerAdapter,
    audit: &AuditLog,
    export_dir: &Path,
    config: &ExportJobConfig,
    cancel: &CancellationToken,
) -> Result<PathBuf, GateError> {
    let correlation_id = format!("export-{}-{}", config.id, Utc::now().format("%Y%m%dT%H%M%S"));
    audit.record(
        EventType::ExportJobStarted,
        &correlation_id,
        serde_json::json!({"job_id": config.id, "name": config.name}),
    )?;

    let outcome = fetch_payload(broker, config, cancel).await;
    let payload = match outcome {
        Ok(payload) => payload,
        Err(e) => {
            audit.record(
                EventType::ExportJobFailed,
                &correlation_id,
                serde_json::json!({"job_id": config.id, "reason": e.to_string()}),
            )?;
            return Err(e);
        }
    };

    std::fs::create_dir_all(export_dir)
        .map_err(|e| GateError::internal(format!("cannot create export dir: {e}")))?;
    let path = export_dir.join(format!(
        "{}-{}.csv",
        config.id,
        Utc::now().format("%Y%m%dT%H%M%S")
    ));
    std::fs::write(&path, &payload)
        .map_err(|e| GateError::internal(format!("cannot persist export: {e}")))?;

    prune_old_files(export_dir, config.retention_days);

    audit.record(
        EventType::ExportJobCompleted,
        &correlation_id,
        serde_json::json!({
            "job_id": config.id,
            "path": path.display().to_string(),
            "bytes": payload.len(),
        }),
    )?;
    tracing::info!(job = %config.name, path = %path.display(), "export persisted");
    Ok(path)
}

async fn fetch_payload(
    broker: &dyn BrokerAdapter,
    config: &ExportJobConfig,
    cancel: &CancellationToken,
) -> Result<Vec<u8>, GateError> {
    let ticket = broker.request_report(&config.id).await.map_err(GateError::from)?;

    for _ in 0..REPORT_MAX_POLLS {
        if cancel.is_cancelled() {
            return Err(GateError::resource(
                "EXPORT_CANCELLED",
                "export cancelled during shutdown",
            ));
        }
        if let Some(payload) = broker.fetch_report(&ticket).await.map_err(GateError::from)? {
            return Ok(payload);
        }
        tokio::select! {
            () = cancel.cancelled() => {
                return Err(GateError::resource(
                    "EXPORT_CANCELLED",
                    "export cancelled during shutdown",
                ));
            }
            () = tokio::time::sleep(REPORT_POLL_INTERVAL) => {}
        }
    }
    Err(GateError::resource(
        "EXPORT_TIMEOUT",
        format!("report {} not ready after {REPORT_MAX_POLLS} polls", config.id),
    ))
}

/// Remove export files older than the retention window. Best effort.
fn prune_old_files(export_dir: &Path, retention_days: u32) {
    let Ok(entries) = std::fs::read_dir(export_dir) else {
        return;
    };
    let cutoff = std::time::SystemTime::now()
        - Duration::from_secs(u64::from(retention_days) * 24 * 60 * 60);
    for entry in entries.flatten() {
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        let Ok(modified) = metadata.modified() else {
            continue;
        };
        if metadata.is_file() && modified < cutoff {
            if let Err(e) = std::fs::remove_file(entry.path()) {
                tracing::warn!(path = %entry.path().display(), error = %e, "retention prune failed");
            } else {
                tracing::debug!(path = %entry.path().display(), "pruned expired export");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MockBroker;

    #[test]
    fn cron_five_fields_gains_seconds() {
        assert_eq!(normalize_cron("0 6 * * *").unwrap(), "0 0 6 * * *");
    }

    #[test]
    fn cron_six_fields_pass_through() {
        assert_eq!(normalize_cron("30 0 6 * * 1").unwrap(), "30 0 6 * * 1");
    }

    #[test]
    fn cron_wrong_arity_is_rejected() {
        assert!(normalize_cron("* * *").is_err());
        assert!(normalize_cron("* * * * * * *").is_err());
    }

    fn make_scheduler(dir: &tempfile::TempDir, jobs: Vec<ExportJobConfig>) -> ExportScheduler {
        let audit = Arc::new(AuditLog::open(dir.path().join("audit.jsonl")).unwrap());
        ExportScheduler::new(
            Arc::new(MockBroker::new(42)),
            audit,
            dir.path().join("exports"),
            jobs,
        )
    }

    fn job(id: &str, cron: &str) -> ExportJobConfig {
        ExportJobConfig {
            id: id.to_string(),
            name: format!("{id} export"),
            enabled: true,
            auto_schedule: true,
            cron: cron.to_string(),
            retention_days: 30,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn run_now_persists_and_audits() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = make_scheduler(&dir, vec![job("q-trades", "0 6 * * *")]);

        let path = scheduler.run_now("q-trades").await.unwrap();
        assert!(path.exists());
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("q-trades"));
    }

    #[tokio::test]
    async fn run_now_unknown_job_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = make_scheduler(&dir, vec![]);
        assert!(scheduler.run_now("missing").await.is_err());
    }

    #[tokio::test]
    async fn start_registers_only_auto_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let mut manual = job("q-manual", "0 6 * * *");
        manual.auto_schedule = false;
        let mut disabled = job("q-disabled", "0 6 * * *");
        disabled.enabled = false;

        let scheduler = make_scheduler(
            &dir,
            vec![job("q-auto", "0 6 * * *"), manual, disabled],
        );
        let scheduled = scheduler.start().await.unwrap();
        assert_eq!(scheduled, 1);
        scheduler.stop(false).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn retention_prunes_old_files() {
        let dir = tempfile::tempdir().unwrap();
        let export_dir = dir.path().join("exports");
        std::fs::create_dir_all(&export_dir).unwrap();

        let old_file = export_dir.join("q-trades-ancient.csv");
        std::fs::write(&old_file, "old").unwrap();
        let ancient = std::time::SystemTime::now() - Duration::from_secs(90 * 24 * 60 * 60);
        std::fs::File::options()
            .append(true)
            .open(&old_file)
            .unwrap()
            .set_modified(ancient)
            .unwrap();

        let scheduler = make_scheduler(&dir, vec![job("q-trades", "0 6 * * *")]);
        let fresh = scheduler.run_now("q-trades").await.unwrap();

        assert!(!old_file.exists());
        assert!(fresh.exists());
    }
}
