use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Why a run (or the startup validation) failed.
#[derive(Debug, Error)]
pub enum BackupError {
    /// The database could not be reached.
    #[error("connectivity check failed: {0}")]
    Connectivity(String),
    /// The dump failed or produced an empty archive.
    #[error("backup execution failed: {0}")]
    Execution(String),
    /// The archive was written but old archives could not be cleaned up.
    #[error("retention cleanup failed: {0}")]
    Retention(#[from] RetentionError),
}

#[derive(Debug, Error)]
pub enum RetentionError {
    #[error("cannot read backup directory {path:?}: {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{} of {attempted} deletions failed: {}", .failures.len(), describe(.failures))]
    Delete {
        attempted: usize,
        failures: Vec<(PathBuf, std::io::Error)>,
    },
}

fn describe(failures: &[(PathBuf, std::io::Error)]) -> String {
    failures
        .iter()
        .map(|(path, err)| format!("{}: {}", path.display(), err))
        .collect::<Vec<_>>()
        .join("; ")
}

/// A single channel failed to deliver. Never fails a run.
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("delivery failed: {0}")]
    Delivery(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("SMTP error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
    #[error("invalid email address: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("cannot build email: {0}")]
    Message(#[from] lettre::error::Error),
}
