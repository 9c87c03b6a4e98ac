use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Name prefix that marks a directory entry as an archive managed by dumpkeeper.
pub const ARCHIVE_PREFIX: &str = "backup-";

/// Timestamp layout embedded in archive names. Sorts lexically and avoids `:`.
pub const ARCHIVE_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%S-%3fZ";

/// Builds the directory name for an archive created at `at`.
pub fn archive_name(at: DateTime<Utc>) -> String {
    format!("{}{}", ARCHIVE_PREFIX, at.format(ARCHIVE_TIMESTAMP_FORMAT))
}

/// Extracts the creation timestamp embedded in an archive name.
///
/// Returns `None` when the name lacks the managed prefix or the timestamp does
/// not parse.
pub fn parse_archive_timestamp(name: &str) -> Option<DateTime<Utc>> {
    let raw = name.strip_prefix(ARCHIVE_PREFIX)?;
    chrono::NaiveDateTime::parse_from_str(raw, ARCHIVE_TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Cumulative bookkeeping for the scheduled backup job.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct RunStatus {
    /// True for the whole duration of exactly one run.
    pub is_running: bool,
    pub last_run_time: Option<DateTime<Utc>>,
    pub last_success_time: Option<DateTime<Utc>>,
    pub last_error_time: Option<DateTime<Utc>>,
    /// Redacted description of the most recent failure, cleared on success.
    pub last_error: Option<String>,
    pub total_runs: u64,
    pub successful_runs: u64,
    pub failed_runs: u64,
    /// Failures since the last successful run.
    pub consecutive_failures: u64,
}

impl RunStatus {
    /// Percentage of successful runs, 0 when nothing has run yet.
    pub fn success_rate(&self) -> u64 {
        if self.total_runs == 0 {
            return 0;
        }
        ((self.successful_runs as f64 / self.total_runs as f64) * 100.0).round() as u64
    }
}

/// Snapshot of the archives currently present under the backup root.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct BackupStats {
    pub total_backups: u64,
    /// Sum of all archive file sizes, in bytes.
    pub total_size: u64,
    pub oldest_backup: Option<DateTime<Utc>>,
    pub newest_backup: Option<DateTime<Utc>>,
}

/// Outcome of a single run, handed to the notification channels.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BackupReport {
    /// RFC 3339 start time of the run.
    pub timestamp: String,
    pub success: bool,
    pub duration_seconds: u64,
    pub error: Option<String>,
    pub stats: Option<BackupStats>,
}

impl BackupReport {
    /// Empty report for a run that started at `started_at`.
    pub fn started(started_at: DateTime<Utc>) -> Self {
        Self {
            timestamp: started_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            success: false,
            duration_seconds: 0,
            error: None,
            stats: None,
        }
    }
}

/// Renders a byte count the way the status logs show it, e.g. `1.5 KB`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["Bytes", "KB", "MB", "GB", "TB"];
    if bytes == 0 {
        return "0 Bytes".to_string();
    }
    let exp = ((bytes as f64).ln() / 1024f64.ln()).floor() as usize;
    let exp = exp.min(UNITS.len() - 1);
    let value = bytes as f64 / 1024f64.powi(exp as i32);
    let rounded = (value * 100.0).round() / 100.0;
    format!("{} {}", rounded, UNITS[exp])
}
