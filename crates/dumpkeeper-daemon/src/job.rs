use crate::error::BackupError;
use crate::manager::BackupManager;
use crate::notify::{NotificationDispatcher, Outcome};
use chrono::{DateTime, Utc};
use dumpkeeper_lib::redact::Redactor;
use dumpkeeper_lib::schedule::Trigger;
use dumpkeeper_lib::types::{format_bytes, BackupReport, RunStatus};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

/// Consecutive failures after which the logs ask for a human.
const FAILURE_ALERT_THRESHOLD: u64 = 3;

/// Scheduling state of the job. Whether a run is in flight is tracked
/// separately in [`RunStatus::is_running`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Scheduled,
    Stopped,
}

/// Result of one trigger firing.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Another run was still in flight.
    Skipped,
    Completed(BackupReport),
}

/// Primary and status triggers for a job.
#[derive(Debug, Clone)]
pub struct JobSchedule {
    pub backup: Trigger,
    pub status: Trigger,
}

struct Control {
    state: SchedulerState,
    cancel: Option<CancellationToken>,
}

struct JobInner {
    manager: BackupManager,
    dispatcher: NotificationDispatcher,
    redactor: Arc<Redactor>,
    schedule: JobSchedule,
    status: Mutex<RunStatus>,
    control: Mutex<Control>,
    runs: TaskTracker,
}

/// Recurring backup job with an overlap guard and cumulative statistics.
///
/// Cloning is cheap and every clone drives the same job.
#[derive(Clone)]
pub struct BackupJob {
    inner: Arc<JobInner>,
}

/// Exclusive right to perform a run. Dropping it clears `is_running`.
struct RunGuard {
    inner: Arc<JobInner>,
    run_number: u64,
    started_at: DateTime<Utc>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        lock(&self.inner.status).is_running = false;
    }
}

/// Status bookkeeping must survive a panic elsewhere, so poisoning is ignored.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl BackupJob {
    pub fn new(
        manager: BackupManager,
        dispatcher: NotificationDispatcher,
        redactor: Arc<Redactor>,
        schedule: JobSchedule,
    ) -> Self {
        Self {
            inner: Arc::new(JobInner {
                manager,
                dispatcher,
                redactor,
                schedule,
                status: Mutex::new(RunStatus::default()),
                control: Mutex::new(Control {
                    state: SchedulerState::Idle,
                    cancel: None,
                }),
                runs: TaskTracker::new(),
            }),
        }
    }

    /// A copy of the current statistics.
    pub fn status(&self) -> RunStatus {
        lock(&self.inner.status).clone()
    }

    pub fn state(&self) -> SchedulerState {
        lock(&self.inner.control).state
    }

    /// Validates the backup target once and registers both triggers.
    ///
    /// On validation failure nothing is scheduled and the job stays in its
    /// previous state. Calling `start` on a scheduled job is a no-op.
    pub async fn start(&self) -> Result<(), BackupError> {
        if self.state() == SchedulerState::Scheduled {
            warn!("Backup job is already scheduled");
            return Ok(());
        }

        self.validate().await?;

        let token = {
            let mut control = lock(&self.inner.control);
            if control.state == SchedulerState::Scheduled {
                // Lost a race with a concurrent start.
                return Ok(());
            }
            let token = CancellationToken::new();
            control.cancel = Some(token.clone());
            control.state = SchedulerState::Scheduled;
            token
        };

        info!("Scheduling backup job: {}", self.inner.schedule.backup);
        info!(
            "Backups go to {:?}, {} notification channel(s) enabled",
            self.inner.manager.backup_dir(),
            self.inner.dispatcher.enabled_channels()
        );
        tokio::spawn(self.clone().backup_loop(token.clone()));
        tokio::spawn(self.clone().status_loop(token));
        info!("Backup job scheduled successfully");
        Ok(())
    }

    /// Checks that the backup target is reachable, logging the redacted cause
    /// on failure.
    pub async fn validate(&self) -> Result<(), BackupError> {
        info!("Validating backup service...");
        if let Err(e) = self.inner.manager.validate_service().await {
            error!(
                "Backup service validation failed: {}",
                self.inner.redactor.filter(&e.to_string())
            );
            return Err(e);
        }
        info!("Validation successful");
        Ok(())
    }

    /// Cancels both triggers. Safe to call repeatedly or before `start`.
    /// A run already in flight is not interrupted.
    pub fn stop(&self) {
        let mut control = lock(&self.inner.control);
        if let Some(token) = control.cancel.take() {
            token.cancel();
            control.state = SchedulerState::Stopped;
            info!("Backup job stopped");
        }
    }

    /// Waits until every run started so far has finished.
    pub async fn wait_for_runs(&self) {
        self.inner.runs.close();
        self.inner.runs.wait().await;
        self.inner.runs.reopen();
    }

    async fn backup_loop(self, token: CancellationToken) {
        while let Some(delay) = delay_until_next(&self.inner.schedule.backup) {
            tokio::select! {
                biased;
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            // Runs happen off the trigger loop so that a long run cannot keep
            // the next firing from being evaluated (and skipped).
            let job = self.clone();
            self.inner.runs.spawn(async move {
                job.run_now().await;
            });
        }
        warn!(
            "Schedule {} has no future firings, backup trigger exits",
            self.inner.schedule.backup
        );
    }

    async fn status_loop(self, token: CancellationToken) {
        while let Some(delay) = delay_until_next(&self.inner.schedule.status) {
            tokio::select! {
                biased;
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(delay) => self.log_status(),
            }
        }
    }

    /// Claims the run guard, or returns `None` if a run is in flight.
    fn try_begin_run(&self) -> Option<RunGuard> {
        let mut status = lock(&self.inner.status);
        if status.is_running {
            return None;
        }
        let started_at = Utc::now();
        status.is_running = true;
        status.total_runs += 1;
        status.last_run_time = Some(started_at);
        Some(RunGuard {
            inner: self.inner.clone(),
            run_number: status.total_runs,
            started_at,
        })
    }

    /// Handles one trigger firing: performs a run unless one is already in flight.
    pub async fn run_now(&self) -> RunOutcome {
        let Some(guard) = self.try_begin_run() else {
            warn!("Previous backup is still running, skipping this execution");
            return RunOutcome::Skipped;
        };

        let clock = Instant::now();
        let mut report = BackupReport::started(guard.started_at);
        info!("Starting scheduled backup (run #{})", guard.run_number);

        match self.inner.manager.run_backup().await {
            Ok(archive) => {
                {
                    let mut status = lock(&self.inner.status);
                    status.last_success_time = Some(Utc::now());
                    status.successful_runs += 1;
                    status.consecutive_failures = 0;
                    status.last_error = None;
                }

                report.success = true;
                report.duration_seconds = clock.elapsed().as_secs_f64().round() as u64;
                info!(
                    "Backup completed successfully in {}s: {:?}",
                    report.duration_seconds, archive
                );

                match self.inner.manager.get_backup_stats().await {
                    Ok(stats) => {
                        info!(
                            "Backup stats: {} backups, {} total size",
                            stats.total_backups,
                            format_bytes(stats.total_size)
                        );
                        report.stats = Some(stats);
                    }
                    Err(e) => warn!("Could not collect backup stats: {}", e),
                }

                let message = format!("Backup succeeded at {}", report.timestamp);
                self.inner
                    .dispatcher
                    .notify(Outcome::Success, &message, None, &report)
                    .await;
            }
            Err(e) => {
                let description = self.inner.redactor.filter(&e.to_string());
                let consecutive = {
                    let mut status = lock(&self.inner.status);
                    status.last_error_time = Some(Utc::now());
                    status.failed_runs += 1;
                    status.consecutive_failures += 1;
                    status.last_error = Some(description.clone());
                    status.consecutive_failures
                };

                report.duration_seconds = clock.elapsed().as_secs_f64().round() as u64;
                report.error = Some(description.clone());
                error!(
                    "Backup failed after {}s: {}",
                    report.duration_seconds, description
                );

                let message = format!("Backup failed at {}", report.timestamp);
                self.inner
                    .dispatcher
                    .notify(Outcome::Failure, &message, Some(&description), &report)
                    .await;

                if consecutive >= FAILURE_ALERT_THRESHOLD {
                    warn!(
                        "{} consecutive backup failures, manual intervention may be required",
                        consecutive
                    );
                }
            }
        }

        drop(guard);
        RunOutcome::Completed(report)
    }

    /// Logs the cumulative statistics. Read-only.
    pub fn log_status(&self) {
        let status = self.status();
        info!(
            total_runs = status.total_runs,
            successful_runs = status.successful_runs,
            failed_runs = status.failed_runs,
            success_rate = status.success_rate(),
            last_success = %status
                .last_success_time
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "Never".to_string()),
            last_error = status.last_error.as_deref().unwrap_or("None"),
            is_running = status.is_running,
            "Backup job status"
        );
    }
}

fn delay_until_next(trigger: &Trigger) -> Option<std::time::Duration> {
    let now = Utc::now();
    let next = trigger.next_after(now)?;
    Some((next - now).to_std().unwrap_or_default())
}
