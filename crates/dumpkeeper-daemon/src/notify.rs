use crate::error::NotificationError;
use async_trait::async_trait;
use dumpkeeper_lib::redact::Redactor;
use dumpkeeper_lib::types::BackupReport;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

/// Terminal state of a run, as seen by the channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

/// A destination for run outcomes (desktop, webhook, ...).
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    async fn send_success(
        &self,
        message: &str,
        report: &BackupReport,
    ) -> Result<(), NotificationError>;

    async fn send_failure(
        &self,
        message: &str,
        error: &str,
        report: &BackupReport,
    ) -> Result<(), NotificationError>;
}

/// A channel together with whether it should receive outcomes.
pub struct ChannelRegistration {
    channel: Arc<dyn NotificationChannel>,
    enabled: bool,
}

impl ChannelRegistration {
    pub fn new(channel: Arc<dyn NotificationChannel>, enabled: bool) -> Self {
        Self { channel, enabled }
    }
}

/// Counts from one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchSummary {
    pub attempted: usize,
    pub delivered: usize,
}

/// Fans an outcome out to every enabled channel concurrently.
///
/// Message and error text are redacted before any channel sees them. Each
/// channel is bounded by its own timeout and a failure, timeout or panic in one
/// channel is logged without affecting the others.
pub struct NotificationDispatcher {
    channels: Vec<ChannelRegistration>,
    redactor: Arc<Redactor>,
    timeout: Duration,
}

impl NotificationDispatcher {
    pub fn new(
        channels: Vec<ChannelRegistration>,
        redactor: Arc<Redactor>,
        timeout: Duration,
    ) -> Self {
        Self {
            channels,
            redactor,
            timeout,
        }
    }

    pub fn enabled_channels(&self) -> usize {
        self.channels.iter().filter(|c| c.enabled).count()
    }

    /// Delivers one outcome. Never fails; per-channel errors are only logged.
    pub async fn notify(
        &self,
        outcome: Outcome,
        message: &str,
        error: Option<&str>,
        report: &BackupReport,
    ) -> DispatchSummary {
        let message = self.redactor.filter(message);
        let error = self.redactor.filter(error.unwrap_or("Unknown error"));
        let report = Arc::new(report.clone());

        let mut tasks = JoinSet::new();
        for registration in self.channels.iter().filter(|c| c.enabled) {
            let channel = registration.channel.clone();
            let message = message.clone();
            let error = error.clone();
            let report = report.clone();
            let limit = self.timeout;

            tasks.spawn(async move {
                let name = channel.name().to_string();
                let send = async {
                    match outcome {
                        Outcome::Success => channel.send_success(&message, &report).await,
                        Outcome::Failure => channel.send_failure(&message, &error, &report).await,
                    }
                };
                let result = match tokio::time::timeout(limit, send).await {
                    Ok(result) => result,
                    Err(_) => Err(NotificationError::Timeout(limit)),
                };
                (name, result)
            });
        }

        let mut summary = DispatchSummary::default();
        while let Some(joined) = tasks.join_next().await {
            summary.attempted += 1;
            match joined {
                Ok((name, Ok(()))) => {
                    debug!("Notification delivered via {}", name);
                    summary.delivered += 1;
                }
                Ok((name, Err(e))) => {
                    error!("Notification via {} failed ({:?}): {}", name, outcome, e);
                }
                Err(e) => {
                    error!("Notification task aborted ({:?}): {}", outcome, e);
                }
            }
        }

        if summary.attempted > 0 {
            info!(
                "Notified {}/{} channel(s) of {:?}",
                summary.delivered, summary.attempted, outcome
            );
        }
        summary
    }
}
