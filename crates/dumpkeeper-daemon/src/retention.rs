//! Enumeration, statistics and rotation of archives under the backup root.

use crate::error::RetentionError;
use chrono::{DateTime, Utc};
use dumpkeeper_lib::types::{parse_archive_timestamp, BackupStats, ARCHIVE_PREFIX};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// One managed archive found on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveEntry {
    pub path: PathBuf,
    pub created: DateTime<Utc>,
}

/// What a cleanup pass removed.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CleanupSummary {
    pub kept: usize,
    pub deleted: Vec<PathBuf>,
}

/// Lists managed archives, oldest first.
///
/// Creation time comes from the timestamp embedded in the name, falling back to
/// filesystem metadata. The sort is stable, so entries with equal timestamps
/// keep directory-listing order. A missing root yields an empty list.
pub fn list_archives(root: &Path) -> io::Result<Vec<ArchiveEntry>> {
    let reader = match fs::read_dir(root) {
        Ok(reader) => reader,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut entries = Vec::new();
    for entry in reader {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if !name.starts_with(ARCHIVE_PREFIX) {
            continue;
        }

        let created = match parse_archive_timestamp(&name) {
            Some(ts) => ts,
            None => {
                let meta = entry.metadata()?;
                let time = meta.created().or_else(|_| meta.modified())?;
                DateTime::<Utc>::from(time)
            }
        };
        entries.push(ArchiveEntry {
            path: entry.path(),
            created,
        });
    }

    Ok(oldest_first(entries))
}

/// Stable sort by creation time, so ties keep their incoming order.
fn oldest_first(mut entries: Vec<ArchiveEntry>) -> Vec<ArchiveEntry> {
    entries.sort_by_key(|e| e.created);
    entries
}

/// Computes count, size and age range of the managed archives.
pub fn collect_stats(root: &Path) -> io::Result<BackupStats> {
    let archives = list_archives(root)?;
    let total_size = archives.iter().map(|a| archive_size(&a.path)).sum();

    Ok(BackupStats {
        total_backups: archives.len() as u64,
        total_size,
        oldest_backup: archives.first().map(|a| a.created),
        newest_backup: archives.last().map(|a| a.created),
    })
}

fn archive_size(path: &Path) -> u64 {
    let mut total = 0;
    for entry in WalkDir::new(path) {
        match entry {
            Ok(entry) => {
                if entry.file_type().is_file() {
                    if let Ok(metadata) = entry.metadata() {
                        total += metadata.len();
                    }
                }
            }
            Err(e) => warn!("Error while sizing {:?}: {}", path, e),
        }
    }
    total
}

/// Deletes one archive. Retention is parameterized over it.
pub type Remover = fn(&Path) -> io::Result<()>;

/// Removes an archive directory, or a plain file archive.
pub fn remove_archive(path: &Path) -> io::Result<()> {
    if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

/// Deletes the oldest archives so that at most `max_backups` remain.
///
/// Every excess archive is attempted even if an earlier deletion fails; any
/// failure is then reported as a single [`RetentionError::Delete`].
pub fn cleanup_old_backups(
    root: &Path,
    max_backups: usize,
    remove: Remover,
) -> Result<CleanupSummary, RetentionError> {
    let archives = list_archives(root).map_err(|source| RetentionError::Scan {
        path: root.to_path_buf(),
        source,
    })?;

    let excess = archives.len().saturating_sub(max_backups);
    if excess == 0 {
        debug!(
            "{} archive(s) present, limit {}, nothing to remove",
            archives.len(),
            max_backups
        );
        return Ok(CleanupSummary {
            kept: archives.len(),
            deleted: Vec::new(),
        });
    }

    let doomed: Vec<PathBuf> = archives.into_iter().take(excess).map(|a| a.path).collect();
    let (deleted, failures) = delete_entries(&doomed, remove);

    if !failures.is_empty() {
        return Err(RetentionError::Delete {
            attempted: doomed.len(),
            failures,
        });
    }

    Ok(CleanupSummary {
        kept: max_backups,
        deleted,
    })
}

/// Removes each path, continuing past failures.
fn delete_entries(
    paths: &[PathBuf],
    remove: Remover,
) -> (Vec<PathBuf>, Vec<(PathBuf, io::Error)>) {
    let mut deleted = Vec::new();
    let mut failures = Vec::new();

    for path in paths {
        match remove(path) {
            Ok(()) => {
                info!("Removed old backup {:?}", path);
                deleted.push(path.clone());
            }
            Err(e) => {
                error!("Failed to remove old backup {:?}: {}", path, e);
                failures.push((path.clone(), e));
            }
        }
    }
    (deleted, failures)
}
