use crate::paths::expand_home;
use crate::redact::Redactor;
use crate::schedule::{ScheduleError, Timezone, Trigger};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable that overrides `database.uri`.
pub const URI_ENV: &str = "MONGODB_URI";

/// Environment variable pointing at an alternate config file.
pub const CONFIG_ENV: &str = "DUMPKEEPER_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
    #[error("Invalid schedule: {0}")]
    Schedule(#[from] ScheduleError),
    #[error("Invalid redaction list: {0}")]
    Redaction(#[from] regex::Error),
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub redaction: RedactionConfig,
}

/// Database connection and the external tools used to reach it.
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// Connection string. Always redacted from outbound text.
    #[serde(default)]
    pub uri: String,
    #[serde(default = "default_dump_command")]
    pub dump_command: String,
    #[serde(default = "default_shell_command")]
    pub shell_command: String,
    /// Bound on the connectivity check.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_dump_command() -> String {
    "mongodump".to_string()
}

fn default_shell_command() -> String {
    "mongosh".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

/// Where archives live and how many are kept.
#[derive(Debug, Deserialize, Clone)]
pub struct BackupConfig {
    #[serde(default = "default_backup_dir")]
    pub dir: String,
    /// Retention limit, at least 1.
    #[serde(default = "default_max_backups")]
    pub max_backups: u32,
    /// Bound on a single engine run.
    #[serde(default = "default_backup_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub compression: bool,
}

fn default_backup_dir() -> String {
    "./backups".to_string()
}

fn default_max_backups() -> u32 {
    7
}

fn default_backup_timeout() -> u64 {
    30 * 60
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            dir: default_backup_dir(),
            max_backups: default_max_backups(),
            timeout_secs: default_backup_timeout(),
            compression: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScheduleConfig {
    /// 5-field cron expression for backup runs.
    #[serde(default = "default_cron")]
    pub cron: String,
    /// `utc`, `local` or an IANA zone name. Defaults to UTC.
    pub timezone: Option<String>,
    /// Cron expression for the periodic status log.
    #[serde(default = "default_status_cron")]
    pub status_cron: String,
}

fn default_cron() -> String {
    "0 0 * * *".to_string()
}

fn default_status_cron() -> String {
    "0 * * * *".to_string()
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            cron: default_cron(),
            timezone: None,
            status_cron: default_status_cron(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotificationsConfig {
    /// Bound on a single channel delivery.
    #[serde(default = "default_notification_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub desktop: DesktopConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub email: EmailConfig,
}

fn default_notification_timeout() -> u64 {
    30
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_notification_timeout(),
            desktop: DesktopConfig::default(),
            webhook: WebhookConfig::default(),
            email: EmailConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct DesktopConfig {
    #[serde(default)]
    pub enabled: bool,
}

/// Discord-compatible webhook.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct WebhookConfig {
    #[serde(default)]
    pub enabled: bool,
    pub url: Option<String>,
    pub username: Option<String>,
}

/// HTML reports over SMTP.
#[derive(Debug, Deserialize, Clone)]
pub struct EmailConfig {
    #[serde(default)]
    pub enabled: bool,
    pub host: Option<String>,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    /// Implicit TLS from the first byte. Without it STARTTLS is used when offered.
    #[serde(default)]
    pub secure: bool,
    pub username: Option<String>,
    /// Redacted like the connection string.
    pub password: Option<String>,
    /// Sender mailbox. Defaults to `Backup Service <username>`.
    pub from: Option<String>,
    /// Each entry may hold several comma-separated addresses.
    #[serde(default)]
    pub recipients: Vec<String>,
}

fn default_smtp_port() -> u16 {
    587
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: None,
            port: default_smtp_port(),
            secure: false,
            username: None,
            password: None,
            from: None,
            recipients: Vec::new(),
        }
    }
}

impl EmailConfig {
    /// Recipient addresses with comma-separated entries split and blanks dropped.
    pub fn recipient_list(&self) -> Vec<String> {
        self.recipients
            .iter()
            .flat_map(|entry| entry.split(','))
            .map(str::trim)
            .filter(|address| !address.is_empty())
            .map(String::from)
            .collect()
    }

    pub fn sender(&self) -> Option<String> {
        self.from.clone().or_else(|| {
            self.username
                .as_ref()
                .map(|user| format!("Backup Service <{}>", user))
        })
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RedactionConfig {
    /// Literal strings masked in every notification and logged error.
    #[serde(default)]
    pub strings: Vec<String>,
}

impl Config {
    /// Validates the configuration, checks the schedules and expands `~/` in the backup dir.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if self.database.uri.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "database.uri is empty (set it in the config file or via {})",
                URI_ENV
            )));
        }

        if self.backup.max_backups == 0 {
            return Err(ConfigError::Validation(
                "backup.max_backups must be at least 1".to_string(),
            ));
        }

        for (name, value) in [
            ("database.connect_timeout_secs", self.database.connect_timeout_secs),
            ("backup.timeout_secs", self.backup.timeout_secs),
            ("notifications.timeout_secs", self.notifications.timeout_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::Validation(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
        }

        if self.notifications.webhook.enabled
            && self
                .notifications
                .webhook
                .url
                .as_deref()
                .map_or(true, |u| u.trim().is_empty())
        {
            return Err(ConfigError::Validation(
                "notifications.webhook.url is required when the webhook is enabled".to_string(),
            ));
        }

        let email = &self.notifications.email;
        if email.enabled {
            if email.host.as_deref().map_or(true, |h| h.trim().is_empty()) {
                return Err(ConfigError::Validation(
                    "notifications.email.host is required when email is enabled".to_string(),
                ));
            }
            if email.sender().is_none() {
                return Err(ConfigError::Validation(
                    "notifications.email.from or username is required when email is enabled"
                        .to_string(),
                ));
            }
        }

        self.backup_trigger()?;
        self.status_trigger()?;

        self.backup.dir = expand_home(&self.backup.dir);
        Ok(())
    }

    fn timezone(&self) -> Result<Timezone, ConfigError> {
        match &self.schedule.timezone {
            Some(tz) => Ok(tz.parse()?),
            None => Ok(Timezone::default()),
        }
    }

    /// Trigger for backup runs.
    pub fn backup_trigger(&self) -> Result<Trigger, ConfigError> {
        Ok(Trigger::cron(&self.schedule.cron, self.timezone()?)?)
    }

    /// Trigger for the periodic status log.
    pub fn status_trigger(&self) -> Result<Trigger, ConfigError> {
        Ok(Trigger::cron(&self.schedule.status_cron, self.timezone()?)?)
    }

    /// Redactor covering the connection string, the SMTP password and the configured strings.
    pub fn redactor(&self) -> Result<Redactor, ConfigError> {
        let secrets = self
            .redaction
            .strings
            .iter()
            .chain(self.notifications.email.password.as_ref());
        Ok(Redactor::new(&self.database.uri, secrets)?)
    }

    pub fn backup_dir(&self) -> PathBuf {
        PathBuf::from(&self.backup.dir)
    }

    pub fn backup_timeout(&self) -> Duration {
        Duration::from_secs(self.backup.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.database.connect_timeout_secs)
    }

    pub fn notification_timeout(&self) -> Duration {
        Duration::from_secs(self.notifications.timeout_secs)
    }
}

/// Parses and validates configuration text. `MONGODB_URI` overrides `database.uri`.
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let mut config: Config = toml::from_str(content)?;
    if let Ok(uri) = std::env::var(URI_ENV) {
        if !uri.trim().is_empty() {
            config.database.uri = uri;
        }
    }
    config.validate()?;
    Ok(config)
}

/// Loads the configuration from an explicit file.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Config file not found: {:?}", path),
        )));
    }

    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Loads the configuration from the environment variable `DUMPKEEPER_CONFIG`
/// or the default system location (`~/.config/dumpkeeper/config.toml`).
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be found, read, or parsed,
/// or if validation fails.
pub fn load_config() -> Result<Config, ConfigError> {
    let path = std::env::var(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| crate::paths::config_path());
    load_config_from(&path)
}
