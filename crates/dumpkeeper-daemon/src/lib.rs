//! Scheduled database backups with retention and outcome notifications.

pub mod channels;
pub mod engine;
pub mod error;
pub mod job;
pub mod manager;
pub mod notify;
pub mod retention;

#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use dumpkeeper_lib::config::Config;
use engine::{BackupEngine, MongoDumpEngine};
use job::{BackupJob, JobSchedule};
use manager::BackupManager;
use notify::NotificationDispatcher;
use std::sync::Arc;

/// Wires a job for `config` around the given engine.
pub fn build_job_with_engine(config: &Config, engine: Arc<dyn BackupEngine>) -> Result<BackupJob> {
    let redactor = Arc::new(config.redactor().context("Invalid redaction list")?);
    let manager = BackupManager::new(
        engine,
        config.backup_dir(),
        config.backup.max_backups as usize,
    );
    let channels =
        channels::from_config(config).context("Failed to set up notification channels")?;
    let dispatcher =
        NotificationDispatcher::new(channels, redactor.clone(), config.notification_timeout());
    let schedule = JobSchedule {
        backup: config.backup_trigger()?,
        status: config.status_trigger()?,
    };
    Ok(BackupJob::new(manager, dispatcher, redactor, schedule))
}

/// Wires a job that backs up with `mongodump`.
pub fn build_job(config: &Config) -> Result<BackupJob> {
    let redactor = config.redactor().context("Invalid redaction list")?;
    let engine = Arc::new(MongoDumpEngine::new(config, redactor));
    build_job_with_engine(config, engine)
}
