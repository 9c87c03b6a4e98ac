//! Concrete notification channels.

use crate::error::NotificationError;
use crate::notify::{ChannelRegistration, NotificationChannel};
use async_trait::async_trait;
use dumpkeeper_lib::config::{Config, EmailConfig};
use dumpkeeper_lib::types::{format_bytes, BackupReport};
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const SUCCESS_COLOR: u32 = 0x2ecc71;
const FAILURE_COLOR: u32 = 0xe74c3c;
const FOOTER: &str = "Database Backup Service";

/// Builds the channel list from configuration, each with its enable flag.
pub fn from_config(config: &Config) -> Result<Vec<ChannelRegistration>, NotificationError> {
    let notifications = &config.notifications;
    let mut channels = vec![ChannelRegistration::new(
        Arc::new(DesktopChannel),
        notifications.desktop.enabled,
    )];

    if let Some(url) = &notifications.webhook.url {
        let webhook = WebhookChannel::new(
            url.clone(),
            notifications.webhook.username.clone(),
            config.notification_timeout(),
        )?;
        channels.push(ChannelRegistration::new(
            Arc::new(webhook),
            notifications.webhook.enabled,
        ));
    }

    let email = &notifications.email;
    if let (Some(host), Some(sender)) = (&email.host, email.sender()) {
        let channel = EmailChannel::new(host, &sender, email, config.notification_timeout())?;
        channels.push(ChannelRegistration::new(Arc::new(channel), email.enabled));
    }
    Ok(channels)
}

/// Desktop notification through the session's notification daemon.
pub struct DesktopChannel;

impl DesktopChannel {
    async fn show(summary: String, body: String, icon: &'static str) -> Result<(), NotificationError> {
        // `show` talks to D-Bus synchronously.
        tokio::task::spawn_blocking(move || {
            notify_rust::Notification::new()
                .summary(&summary)
                .body(&body)
                .icon(icon)
                .show()
                .map(|_| ())
                .map_err(|e| NotificationError::Delivery(e.to_string()))
        })
        .await
        .map_err(|e| NotificationError::Delivery(e.to_string()))?
    }
}

#[async_trait]
impl NotificationChannel for DesktopChannel {
    fn name(&self) -> &str {
        "desktop"
    }

    async fn send_success(
        &self,
        message: &str,
        report: &BackupReport,
    ) -> Result<(), NotificationError> {
        let body = match &report.stats {
            Some(stats) => format!(
                "{} ({}s, {} backups, {})",
                message,
                report.duration_seconds,
                stats.total_backups,
                format_bytes(stats.total_size)
            ),
            None => format!("{} ({}s)", message, report.duration_seconds),
        };
        Self::show("Backup Successful".to_string(), body, "dialog-information").await
    }

    async fn send_failure(
        &self,
        message: &str,
        error: &str,
        _report: &BackupReport,
    ) -> Result<(), NotificationError> {
        Self::show(
            "Backup Failed".to_string(),
            format!("{}: {}", message, error),
            "dialog-error",
        )
        .await
    }
}

/// Discord-style webhook that receives an embed per outcome.
pub struct WebhookChannel {
    url: String,
    username: Option<String>,
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(
        url: String,
        username: Option<String>,
        timeout: std::time::Duration,
    ) -> Result<Self, NotificationError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url,
            username,
            client,
        })
    }

    async fn post(&self, embed: Value) -> Result<(), NotificationError> {
        let mut payload = json!({ "embeds": [embed] });
        if let Some(username) = &self.username {
            payload["username"] = json!(username);
        }

        let response = self.client.post(&self.url).json(&payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NotificationError::Delivery(format!(
                "webhook answered {}",
                status
            )));
        }
        debug!("Webhook accepted notification ({})", status);
        Ok(())
    }
}

fn or_na<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "N/A".to_string())
}

/// Renders the embed shared by both outcomes.
fn build_embed(title: &str, color: u32, error: Option<&str>, report: &BackupReport) -> Value {
    let stats = report.stats.as_ref();
    let mut fields = Vec::new();
    if let Some(error) = error {
        fields.push(json!({ "name": "Error", "value": error, "inline": false }));
    }
    fields.extend([
        json!({ "name": "Duration", "value": format!("{}s", report.duration_seconds), "inline": true }),
        json!({ "name": "Total Backups", "value": or_na(stats.map(|s| s.total_backups)), "inline": true }),
        json!({ "name": "Total Size", "value": or_na(stats.map(|s| format_bytes(s.total_size))), "inline": true }),
        json!({ "name": "Oldest Backup", "value": or_na(stats.and_then(|s| s.oldest_backup).map(|t| t.to_rfc3339())), "inline": false }),
        json!({ "name": "Newest Backup", "value": or_na(stats.and_then(|s| s.newest_backup).map(|t| t.to_rfc3339())), "inline": false }),
    ]);

    json!({
        "title": title,
        "color": color,
        "fields": fields,
        "footer": { "text": FOOTER },
        "timestamp": report.timestamp,
    })
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send_success(
        &self,
        _message: &str,
        report: &BackupReport,
    ) -> Result<(), NotificationError> {
        self.post(build_embed("Backup Successful", SUCCESS_COLOR, None, report))
            .await
    }

    async fn send_failure(
        &self,
        _message: &str,
        error: &str,
        report: &BackupReport,
    ) -> Result<(), NotificationError> {
        self.post(build_embed("Backup Failed", FAILURE_COLOR, Some(error), report))
            .await
    }
}

/// Mails an HTML report to every configured recipient.
pub struct EmailChannel {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    recipients: Vec<Mailbox>,
}

impl EmailChannel {
    pub fn new(
        host: &str,
        sender: &str,
        config: &EmailConfig,
        timeout: Duration,
    ) -> Result<Self, NotificationError> {
        let mut builder = if config.secure {
            AsyncSmtpTransport::<Tokio1Executor>::relay(host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
                .tls(Tls::Opportunistic(TlsParameters::new(host.to_string())?))
        };
        builder = builder.port(config.port).timeout(Some(timeout));
        if let Some(username) = &config.username {
            builder = builder.credentials(Credentials::new(
                username.clone(),
                config.password.clone().unwrap_or_default(),
            ));
        }

        let recipients = config
            .recipient_list()
            .iter()
            .map(|address| address.parse())
            .collect::<Result<Vec<Mailbox>, _>>()?;

        Ok(Self {
            transport: builder.build(),
            from: sender.parse()?,
            recipients,
        })
    }

    async fn send(&self, subject: &str, html: String) -> Result<(), NotificationError> {
        if self.recipients.is_empty() {
            debug!("No email recipients configured, skipping");
            return Ok(());
        }

        let mut message = Message::builder()
            .from(self.from.clone())
            .subject(subject)
            .header(ContentType::TEXT_HTML);
        for recipient in &self.recipients {
            message = message.to(recipient.clone());
        }

        let response = self.transport.send(message.body(html)?).await?;
        debug!("SMTP server accepted notification ({})", response.code());
        Ok(())
    }
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Renders the report as a small HTML table, one row per line.
fn render_email(status: &str, error: Option<&str>, report: &BackupReport) -> String {
    let stats = report.stats.as_ref();
    let mut rows = vec![
        ("Status", status.to_string()),
        ("Time", report.timestamp.clone()),
        ("Duration", format!("{}s", report.duration_seconds)),
    ];
    if let Some(error) = error {
        rows.push(("Error", error.to_string()));
    }
    rows.extend([
        ("Total Backups", or_na(stats.map(|s| s.total_backups))),
        ("Total Size", or_na(stats.map(|s| format_bytes(s.total_size)))),
        ("Oldest Backup", or_na(stats.and_then(|s| s.oldest_backup).map(|t| t.to_rfc3339()))),
        ("Newest Backup", or_na(stats.and_then(|s| s.newest_backup).map(|t| t.to_rfc3339()))),
    ]);

    let mut html = format!("<html><body>\n<h2>Backup {}</h2>\n<table>\n", status);
    for (name, value) in rows {
        html.push_str(&format!(
            "<tr><th align=\"left\">{}</th>\n<td>{}</td></tr>\n",
            name,
            escape_html(&value)
        ));
    }
    html.push_str(&format!("</table>\n<p>{}</p>\n</body></html>\n", FOOTER));
    html
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn name(&self) -> &str {
        "email"
    }

    async fn send_success(
        &self,
        _message: &str,
        report: &BackupReport,
    ) -> Result<(), NotificationError> {
        self.send("\u{2705} Backup Successful", render_email("Successful", None, report))
            .await
    }

    async fn send_failure(
        &self,
        _message: &str,
        error: &str,
        report: &BackupReport,
    ) -> Result<(), NotificationError> {
        self.send(
            "\u{274c} Backup Failed",
            render_email("Failed", Some(error), report),
        )
        .await
    }
}
