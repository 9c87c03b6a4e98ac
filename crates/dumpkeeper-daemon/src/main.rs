use anyhow::{Context, Result};
use clap::Parser;
use dumpkeeper_daemon::build_job;
use dumpkeeper_daemon::job::{BackupJob, RunOutcome};
use dumpkeeper_lib::config::{self, CONFIG_ENV};
use dumpkeeper_lib::paths;
use std::fs;
use std::path::PathBuf;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser)]
#[command(name = "dumpkeeper")]
#[command(about = "Scheduled MongoDB backups with rotation and notifications", long_about = None)]
struct Args {
    /// Path to the config file
    #[arg(short, long, env = CONFIG_ENV)]
    config: Option<PathBuf>,

    /// Run a single backup, print its report as JSON and exit
    #[arg(long)]
    once: bool,
}

struct Daemon {
    pid_path: PathBuf,
    job: BackupJob,
}

impl Daemon {
    fn new(job: BackupJob) -> Self {
        Self {
            pid_path: paths::pid_path(),
            job,
        }
    }

    fn create_pid_file(&self) -> Result<()> {
        if self.pid_path.exists() {
            let old_pid = fs::read_to_string(&self.pid_path)?;
            if let Ok(pid) = old_pid.trim().parse::<i32>() {
                // Signal 0 only checks that the process exists.
                if unsafe { libc::kill(pid, 0) } == 0 {
                    anyhow::bail!("Daemon is already running with PID {}", pid);
                } else {
                    warn!("Stale PID file found (PID {}), removing...", pid);
                    let _ = fs::remove_file(&self.pid_path);
                }
            }
        }

        if let Some(parent) = self.pid_path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(&self.pid_path, std::process::id().to_string())
            .context("Failed to write PID file")?;
        Ok(())
    }

    fn cleanup(&self) {
        // Only cleanup if the PID file contains our PID
        if let Ok(content) = fs::read_to_string(&self.pid_path) {
            if content.trim() == std::process::id().to_string() {
                info!("Removing PID file...");
                let _ = fs::remove_file(&self.pid_path);
            }
        }
    }

    async fn run(&self) -> Result<()> {
        self.create_pid_file()?;

        // The cause has already been logged in redacted form.
        self.job
            .start()
            .await
            .map_err(|_| anyhow::anyhow!("Backup service validation failed, not scheduling"))?;

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
            _ = sigint.recv() => info!("Received SIGINT, shutting down..."),
        }

        self.job.stop();
        if self.job.status().is_running {
            info!("Waiting for the running backup to finish...");
        }
        self.job.wait_for_runs().await;
        self.job.log_status();
        Ok(())
    }
}

/// Performs exactly one guarded run and prints its report.
async fn run_once(job: &BackupJob) -> Result<()> {
    job.validate()
        .await
        .map_err(|_| anyhow::anyhow!("Backup service validation failed"))?;

    let report = match job.run_now().await {
        RunOutcome::Completed(report) => report,
        RunOutcome::Skipped => anyhow::bail!("A backup is already running"),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.success {
        anyhow::bail!(
            "Backup failed: {}",
            report.error.as_deref().unwrap_or("Unknown error")
        );
    }
    Ok(())
}

/// Logs to stderr and, when the data directory is writable, to the log file.
fn init_logging() -> Option<WorkerGuard> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr = fmt::layer().with_writer(std::io::stderr).with_target(false);

    let log_path = paths::log_path();
    let file = log_path.parent().and_then(|dir| {
        fs::create_dir_all(dir).ok()?;
        let name = log_path.file_name()?;
        Some(tracing_appender::non_blocking(
            tracing_appender::rolling::never(dir, name),
        ))
    });

    match file {
        Some((writer, guard)) => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(filter).with(stderr).init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _log_guard = init_logging();

    let config = match &args.config {
        Some(path) => config::load_config_from(path),
        None => config::load_config(),
    }
    .context("Failed to load configuration")?;
    let job = build_job(&config)?;

    if args.once {
        return run_once(&job).await;
    }

    let daemon = Daemon::new(job);

    let res = daemon.run().await;

    daemon.cleanup();

    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use dumpkeeper_lib::config::parse_config;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_pid_file_management() -> Result<()> {
        let tmp = tempdir()?;
        let pid_path = tmp.path().join("dumpkeeper.pid");
        let config = parse_config("[database]\nuri = \"mongodb://localhost\"\n")?;

        let daemon = Daemon {
            pid_path: pid_path.clone(),
            job: build_job(&config)?,
        };

        daemon.create_pid_file()?;
        assert!(pid_path.exists());

        let pid_content = fs::read_to_string(&pid_path)?;
        assert_eq!(pid_content, std::process::id().to_string());

        // A second instance sees us alive.
        assert!(daemon.create_pid_file().is_err());

        daemon.cleanup();
        assert!(!pid_path.exists());

        Ok(())
    }

    #[tokio::test]
    async fn test_stale_pid_file_is_replaced() -> Result<()> {
        let tmp = tempdir()?;
        let pid_path = tmp.path().join("dumpkeeper.pid");
        // PIDs are capped well below i32::MAX on Linux.
        fs::write(&pid_path, i32::MAX.to_string())?;
        let config = parse_config("[database]\nuri = \"mongodb://localhost\"\n")?;

        let daemon = Daemon {
            pid_path: pid_path.clone(),
            job: build_job(&config)?,
        };
        daemon.create_pid_file()?;
        assert_eq!(
            fs::read_to_string(&pid_path)?,
            std::process::id().to_string()
        );
        daemon.cleanup();
        Ok(())
    }
}
