use crate::engine::BackupEngine;
use crate::error::BackupError;
use crate::retention::{self, CleanupSummary, Remover};
use chrono::Utc;
use dumpkeeper_lib::types::{archive_name, BackupStats};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Runs one backup end to end: storage, engine, then retention.
pub struct BackupManager {
    engine: Arc<dyn BackupEngine>,
    backup_dir: PathBuf,
    max_backups: usize,
    remove: Remover,
}

impl BackupManager {
    pub fn new(engine: Arc<dyn BackupEngine>, backup_dir: PathBuf, max_backups: usize) -> Self {
        Self {
            engine,
            backup_dir,
            max_backups,
            remove: retention::remove_archive,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_remover(mut self, remove: Remover) -> Self {
        self.remove = remove;
        self
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Checks that the backup target is reachable.
    pub async fn validate_service(&self) -> Result<(), BackupError> {
        self.engine.validate_connection().await
    }

    /// Creates a new archive and then enforces the retention limit.
    ///
    /// Retention only runs after the engine reported a complete archive. A
    /// retention failure fails the run even though the new archive is kept.
    pub async fn run_backup(&self) -> Result<PathBuf, BackupError> {
        tokio::fs::create_dir_all(&self.backup_dir)
            .await
            .map_err(|e| {
                BackupError::Execution(format!(
                    "cannot create backup directory {:?}: {}",
                    self.backup_dir, e
                ))
            })?;

        let destination = self.backup_dir.join(archive_name(Utc::now()));
        if destination.exists() {
            return Err(BackupError::Execution(format!(
                "archive {:?} already exists",
                destination
            )));
        }

        info!("Starting backup to {:?}", destination);
        if let Err(e) = self.engine.perform_backup(&destination).await {
            discard_partial(&destination).await;
            return Err(e);
        }

        let summary = self.cleanup_old_backups().await?;
        if !summary.deleted.is_empty() {
            info!(
                "Retention removed {} old backup(s), {} kept",
                summary.deleted.len(),
                summary.kept
            );
        }

        Ok(destination)
    }

    async fn cleanup_old_backups(&self) -> Result<CleanupSummary, BackupError> {
        let dir = self.backup_dir.clone();
        let max = self.max_backups;
        let remove = self.remove;
        tokio::task::spawn_blocking(move || retention::cleanup_old_backups(&dir, max, remove))
            .await
            .map_err(|e| BackupError::Execution(format!("retention task failed: {}", e)))?
            .map_err(BackupError::from)
    }

    /// Current archive statistics. An empty or missing directory gives zero stats.
    pub async fn get_backup_stats(&self) -> std::io::Result<BackupStats> {
        let dir = self.backup_dir.clone();
        tokio::task::spawn_blocking(move || retention::collect_stats(&dir))
            .await
            .map_err(std::io::Error::other)?
    }
}

/// Removes whatever a failed engine run left behind so it is never counted as an archive.
async fn discard_partial(destination: &Path) {
    let result = match tokio::fs::metadata(destination).await {
        Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(destination).await,
        Ok(_) => tokio::fs::remove_file(destination).await,
        Err(_) => return,
    };
    match result {
        Ok(()) => info!("Removed partial backup {:?}", destination),
        Err(e) => warn!("Could not remove partial backup {:?}: {}", destination, e),
    }
}
