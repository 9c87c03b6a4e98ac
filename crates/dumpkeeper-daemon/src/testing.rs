//! In-process stand-ins for the engine and channels used by unit tests.

use crate::engine::BackupEngine;
use crate::error::{BackupError, NotificationError};
use crate::notify::{NotificationChannel, Outcome};
use async_trait::async_trait;
use dumpkeeper_lib::types::BackupReport;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EngineBehavior {
    Succeed,
    Unreachable,
    /// Writes some files, then reports a failed dump.
    FailAfterPartialWrite,
}

pub struct FakeEngine {
    behavior: Mutex<EngineBehavior>,
    backups: AtomicUsize,
    /// When set, every backup waits for one permit before finishing.
    gate: Option<Arc<Semaphore>>,
}

impl FakeEngine {
    pub fn new(behavior: EngineBehavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            backups: AtomicUsize::new(0),
            gate: None,
        }
    }

    pub fn gated(behavior: EngineBehavior, gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new(behavior)
        }
    }

    pub fn set_behavior(&self, behavior: EngineBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    /// Number of `perform_backup` calls that started.
    pub fn backups(&self) -> usize {
        self.backups.load(Ordering::SeqCst)
    }

    fn behavior(&self) -> EngineBehavior {
        *self.behavior.lock().unwrap()
    }
}

#[async_trait]
impl BackupEngine for FakeEngine {
    async fn validate_connection(&self) -> Result<(), BackupError> {
        match self.behavior() {
            EngineBehavior::Unreachable => Err(BackupError::Connectivity(
                "connection refused by mongodb://admin:hunter2@db".to_string(),
            )),
            _ => Ok(()),
        }
    }

    async fn perform_backup(&self, destination: &Path) -> Result<(), BackupError> {
        self.backups.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        self.validate_connection().await?;

        std::fs::create_dir_all(destination.join("app")).unwrap();
        match self.behavior() {
            EngineBehavior::FailAfterPartialWrite => {
                std::fs::write(destination.join("app/users.metadata.json"), "{}").unwrap();
                Err(BackupError::Execution("dump interrupted".to_string()))
            }
            _ => {
                std::fs::write(destination.join("app/users.bson"), "0123456789").unwrap();
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChannelBehavior {
    Deliver,
    Fail,
    Hang,
    Panic,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub outcome: Outcome,
    pub message: String,
    pub error: Option<String>,
    pub report: BackupReport,
}

pub struct RecordingChannel {
    name: String,
    behavior: ChannelBehavior,
    calls: Mutex<Vec<RecordedCall>>,
}

impl RecordingChannel {
    pub fn new(name: &str, behavior: ChannelBehavior) -> Self {
        Self {
            name: name.to_string(),
            behavior,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    async fn record(&self, call: RecordedCall) -> Result<(), NotificationError> {
        self.calls.lock().unwrap().push(call);
        match self.behavior {
            ChannelBehavior::Deliver => Ok(()),
            ChannelBehavior::Fail => Err(NotificationError::Delivery("rejected".to_string())),
            ChannelBehavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
            ChannelBehavior::Panic => panic!("channel {} exploded", self.name),
        }
    }
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send_success(
        &self,
        message: &str,
        report: &BackupReport,
    ) -> Result<(), NotificationError> {
        self.record(RecordedCall {
            outcome: Outcome::Success,
            message: message.to_string(),
            error: None,
            report: report.clone(),
        })
        .await
    }

    async fn send_failure(
        &self,
        message: &str,
        error: &str,
        report: &BackupReport,
    ) -> Result<(), NotificationError> {
        self.record(RecordedCall {
            outcome: Outcome::Failure,
            message: message.to_string(),
            error: Some(error.to_string()),
            report: report.clone(),
        })
        .await
    }
}
