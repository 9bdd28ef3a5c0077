//! Alert delivery channels
//!
//! Supports:
//! - Console (structured log records)
//! - SMTP email with an HTML body colored by level
//! - Slack-compatible chat webhooks
//! - PagerDuty Events API v2
//! - Generic JSON webhooks with custom headers

use super::manager::{Alert, AlertLevel};
use crate::observability::StructuredLogger;
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;

/// Default PagerDuty Events API v2 endpoint
pub const PAGERDUTY_EVENTS_URL: &str = "https://events.pagerduty.com/v2/enqueue";

/// Timeout for HTTP channel requests
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors returned by alert channels
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{channel} returned non-success status: {status}")]
    Rejected { channel: String, status: u16 },

    #[error("failed to build email: {0}")]
    EmailBuild(String),

    #[error("failed to send email: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error("invalid channel configuration: {0}")]
    Config(String),
}

/// A destination alerts are delivered to
#[async_trait]
pub trait AlertChannel: Send + Sync {
    async fn send(&self, alert: &Alert) -> Result<(), ChannelError>;

    fn name(&self) -> &str;
}

fn http_client() -> Result<reqwest::Client, ChannelError> {
    Ok(reqwest::Client::builder()
        .use_rustls_tls()
        .timeout(HTTP_TIMEOUT)
        .build()?)
}

fn check_status(channel: &str, status: reqwest::StatusCode) -> Result<(), ChannelError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(ChannelError::Rejected {
            channel: channel.to_string(),
            status: status.as_u16(),
        })
    }
}

/// Writes alerts to the log
pub struct ConsoleChannel {
    logger: StructuredLogger,
}

impl Default for ConsoleChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleChannel {
    pub fn new() -> Self {
        Self {
            logger: StructuredLogger::new("etcd-monitor"),
        }
    }
}

#[async_trait]
impl AlertChannel for ConsoleChannel {
    async fn send(&self, alert: &Alert) -> Result<(), ChannelError> {
        self.logger.log_alert(alert);
        Ok(())
    }

    fn name(&self) -> &str {
        "console"
    }
}

/// Sends alerts as HTML email over SMTP
#[derive(Debug, Clone)]
pub struct EmailChannel {
    pub smtp_server: String,
    pub smtp_port: u16,
    pub from: String,
    pub to: Vec<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl EmailChannel {
    pub fn subject(alert: &Alert) -> String {
        format!("[{}] etcd-monitor: {}", alert.level, alert.alert_type)
    }

    fn build_message(&self, alert: &Alert) -> Result<Message, ChannelError> {
        if self.to.is_empty() {
            return Err(ChannelError::Config("email channel has no recipients".to_string()));
        }

        let parse = |addr: &str| {
            addr.parse::<Mailbox>()
                .map_err(|e| ChannelError::EmailBuild(format!("invalid address '{addr}': {e}")))
        };

        let mut builder = Message::builder()
            .from(parse(&self.from)?)
            .subject(Self::subject(alert))
            .header(ContentType::TEXT_HTML);
        for recipient in &self.to {
            builder = builder.to(parse(recipient)?);
        }

        builder
            .body(format_email_body(alert))
            .map_err(|e| ChannelError::EmailBuild(e.to_string()))
    }

    fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>, ChannelError> {
        let transport = match (&self.username, &self.password) {
            (Some(username), Some(password)) => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.smtp_server)?
                    .port(self.smtp_port)
                    .credentials(Credentials::new(username.clone(), password.clone()))
                    .build()
            }
            _ => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&self.smtp_server)
                .port(self.smtp_port)
                .build(),
        };
        Ok(transport)
    }
}

#[async_trait]
impl AlertChannel for EmailChannel {
    async fn send(&self, alert: &Alert) -> Result<(), ChannelError> {
        let message = self.build_message(alert)?;
        self.transport()?.send(message).await?;
        Ok(())
    }

    fn name(&self) -> &str {
        "email"
    }
}

/// Border and header color for an alert level
pub fn level_color(level: AlertLevel) -> &'static str {
    match level {
        AlertLevel::Info => "#28a745",
        AlertLevel::Warning => "#ffc107",
        AlertLevel::Critical => "#dc3545",
    }
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// HTML body for an alert email
pub fn format_email_body(alert: &Alert) -> String {
    let color = level_color(alert.level);

    let details = if alert.details.is_empty() {
        String::new()
    } else {
        let items: String = alert
            .details
            .iter()
            .map(|(key, value)| {
                let value = match value {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                format!(
                    "<li><strong>{}:</strong> {}</li>",
                    escape_html(key),
                    escape_html(&value)
                )
            })
            .collect();
        format!("<h3>Details:</h3><ul>{items}</ul>")
    };

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <style>
        body {{ font-family: Arial, sans-serif; }}
        .alert-box {{ border-left: 4px solid {color}; padding: 15px; margin: 10px 0; background-color: #f8f9fa; }}
        .alert-header {{ font-size: 18px; font-weight: bold; color: {color}; }}
        .alert-message {{ font-size: 14px; margin: 10px 0; }}
        .alert-meta {{ font-size: 12px; color: #6c757d; }}
    </style>
</head>
<body>
    <div class="alert-box">
        <div class="alert-header">{level} Alert: {alert_type}</div>
        <div class="alert-message">{message}</div>
        <div class="alert-meta">
            <p><strong>Time:</strong> {time}</p>
            <p><strong>Level:</strong> {level}</p>
            <p><strong>Type:</strong> {alert_type}</p>
        </div>
        {details}
    </div>
    <hr>
    <p style="font-size: 12px; color: #6c757d;">This alert was generated by etcd-monitor.</p>
</body>
</html>
"#,
        level = alert.level,
        alert_type = alert.alert_type,
        message = escape_html(&alert.message),
        time = alert.timestamp.to_rfc3339(),
    )
}

/// Posts alerts to a Slack-compatible incoming webhook
pub struct SlackChannel {
    webhook_url: String,
    channel: Option<String>,
    username: String,
    http: reqwest::Client,
}

impl SlackChannel {
    pub fn new(
        webhook_url: impl Into<String>,
        channel: Option<String>,
        username: impl Into<String>,
    ) -> Result<Self, ChannelError> {
        Ok(Self {
            webhook_url: webhook_url.into(),
            channel,
            username: username.into(),
            http: http_client()?,
        })
    }

    /// Attachment color for an alert level
    pub fn color(level: AlertLevel) -> &'static str {
        match level {
            AlertLevel::Critical => "danger",
            AlertLevel::Warning => "warning",
            AlertLevel::Info => "good",
        }
    }

    pub fn payload(&self, alert: &Alert) -> serde_json::Value {
        let mut payload = json!({
            "username": self.username,
            "text": format!("[{}] {}", alert.level, alert.message),
            "attachments": [{
                "color": Self::color(alert.level),
                "fields": [
                    { "title": "Type", "value": alert.alert_type.as_str(), "short": true },
                    { "title": "Timestamp", "value": alert.timestamp.to_rfc3339(), "short": true },
                ],
            }],
        });
        if let Some(channel) = &self.channel {
            payload["channel"] = json!(channel);
        }
        payload
    }
}

#[async_trait]
impl AlertChannel for SlackChannel {
    async fn send(&self, alert: &Alert) -> Result<(), ChannelError> {
        let response = self
            .http
            .post(&self.webhook_url)
            .json(&self.payload(alert))
            .send()
            .await?;
        check_status(self.name(), response.status())
    }

    fn name(&self) -> &str {
        "slack"
    }
}

/// Triggers PagerDuty incidents through the Events API v2
pub struct PagerDutyChannel {
    routing_key: String,
    events_url: String,
    http: reqwest::Client,
}

impl PagerDutyChannel {
    pub fn new(routing_key: impl Into<String>) -> Result<Self, ChannelError> {
        Self::with_events_url(routing_key, PAGERDUTY_EVENTS_URL)
    }

    pub fn with_events_url(
        routing_key: impl Into<String>,
        events_url: impl Into<String>,
    ) -> Result<Self, ChannelError> {
        Ok(Self {
            routing_key: routing_key.into(),
            events_url: events_url.into(),
            http: http_client()?,
        })
    }

    pub fn payload(&self, alert: &Alert) -> serde_json::Value {
        json!({
            "routing_key": self.routing_key,
            "event_action": "trigger",
            "payload": {
                "summary": alert.message,
                "severity": alert.level.as_str(),
                "source": "etcd-monitor",
                "timestamp": alert.timestamp.to_rfc3339(),
                "custom_details": alert.details,
            },
        })
    }
}

#[async_trait]
impl AlertChannel for PagerDutyChannel {
    async fn send(&self, alert: &Alert) -> Result<(), ChannelError> {
        let response = self
            .http
            .post(&self.events_url)
            .json(&self.payload(alert))
            .send()
            .await?;
        check_status(self.name(), response.status())
    }

    fn name(&self) -> &str {
        "pagerduty"
    }
}

/// Posts alerts as JSON to an arbitrary URL
pub struct WebhookChannel {
    url: String,
    headers: BTreeMap<String, String>,
    http: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(
        url: impl Into<String>,
        headers: BTreeMap<String, String>,
    ) -> Result<Self, ChannelError> {
        Ok(Self {
            url: url.into(),
            headers,
            http: http_client()?,
        })
    }

    pub fn payload(alert: &Alert) -> serde_json::Value {
        json!({
            "level": alert.level.as_str(),
            "type": alert.alert_type.as_str(),
            "message": alert.message,
            "details": alert.details,
            "timestamp": alert.timestamp.to_rfc3339(),
        })
    }
}

#[async_trait]
impl AlertChannel for WebhookChannel {
    async fn send(&self, alert: &Alert) -> Result<(), ChannelError> {
        let mut request = self.http.post(&self.url).json(&Self::payload(alert));
        for (key, value) in &self.headers {
            request = request.header(key.as_str(), value.as_str());
        }

        let response = request.send().await?;
        check_status(self.name(), response.status())
    }

    fn name(&self) -> &str {
        "webhook"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertType;
    use mockito::Matcher;

    fn critical() -> Alert {
        Alert::new(
            AlertLevel::Critical,
            AlertType::ClusterHealth,
            "Cluster is unhealthy",
        )
        .with_detail("member_count", 3)
    }

    #[tokio::test]
    async fn test_console_channel() {
        let channel = ConsoleChannel::new();
        assert_eq!(channel.name(), "console");
        channel.send(&critical()).await.unwrap();
    }

    #[test]
    fn test_email_body_colors_and_escaping() {
        let info = Alert::new(AlertLevel::Info, AlertType::ClusterHealth, "ok <b>");
        let body = format_email_body(&info);
        assert!(body.contains("#28a745"));
        assert!(body.contains("ok &lt;b&gt;"));
        assert!(!body.contains("<h3>Details:</h3>"));

        let body = format_email_body(&critical());
        assert!(body.contains("#dc3545"));
        assert!(body.contains("critical Alert: cluster_health"));
        assert!(body.contains("<li><strong>member_count:</strong> 3</li>"));

        let warning = Alert::new(AlertLevel::Warning, AlertType::HighLatency, "slow");
        assert!(format_email_body(&warning).contains("#ffc107"));
    }

    #[test]
    fn test_email_message_build() {
        let channel = EmailChannel {
            smtp_server: "smtp.example.com".to_string(),
            smtp_port: 587,
            from: "monitor@example.com".to_string(),
            to: vec!["ops@example.com".to_string(), "dba@example.com".to_string()],
            username: None,
            password: None,
        };
        assert_eq!(EmailChannel::subject(&critical()), "[critical] etcd-monitor: cluster_health");
        assert!(channel.build_message(&critical()).is_ok());

        let no_recipients = EmailChannel {
            to: vec![],
            ..channel.clone()
        };
        assert!(matches!(
            no_recipients.build_message(&critical()),
            Err(ChannelError::Config(_))
        ));

        let bad_from = EmailChannel {
            from: "not an address".to_string(),
            ..channel
        };
        assert!(matches!(
            bad_from.build_message(&critical()),
            Err(ChannelError::EmailBuild(_))
        ));
    }

    #[tokio::test]
    async fn test_slack_channel_posts_attachment() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .match_body(Matcher::PartialJson(json!({
                "channel": "#alerts",
                "username": "etcd-monitor",
                "text": "[critical] Cluster is unhealthy",
            })))
            .with_status(200)
            .create_async()
            .await;

        let channel = SlackChannel::new(
            format!("{}/hook", server.url()),
            Some("#alerts".to_string()),
            "etcd-monitor",
        )
        .unwrap();
        channel.send(&critical()).await.unwrap();
        mock.assert_async().await;
    }

    #[test]
    fn test_slack_payload() {
        assert_eq!(SlackChannel::color(AlertLevel::Info), "good");
        assert_eq!(SlackChannel::color(AlertLevel::Warning), "warning");
        assert_eq!(SlackChannel::color(AlertLevel::Critical), "danger");

        let channel = SlackChannel::new("http://localhost/hook", None, "etcd-monitor").unwrap();
        let payload = channel.payload(&critical());
        assert!(payload.get("channel").is_none());
        assert_eq!(payload["attachments"][0]["color"], "danger");
        assert_eq!(payload["attachments"][0]["fields"][0]["value"], "cluster_health");
    }

    #[tokio::test]
    async fn test_slack_channel_rejects_non_success() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/hook")
            .with_status(500)
            .create_async()
            .await;

        let channel =
            SlackChannel::new(format!("{}/hook", server.url()), None, "etcd-monitor").unwrap();
        let err = channel.send(&critical()).await.unwrap_err();
        assert!(matches!(err, ChannelError::Rejected { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_pagerduty_channel() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v2/enqueue")
            .match_body(Matcher::PartialJson(json!({
                "routing_key": "abc123",
                "event_action": "trigger",
                "payload": {
                    "summary": "Cluster is unhealthy",
                    "severity": "critical",
                    "source": "etcd-monitor",
                    "custom_details": { "member_count": 3 },
                },
            })))
            .with_status(202)
            .create_async()
            .await;

        let channel =
            PagerDutyChannel::with_events_url("abc123", format!("{}/v2/enqueue", server.url()))
                .unwrap();
        channel.send(&critical()).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_webhook_channel_sends_headers() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/alerts")
            .match_header("authorization", "Bearer token")
            .match_header("content-type", "application/json")
            .match_body(Matcher::PartialJson(json!({
                "level": "critical",
                "type": "cluster_health",
                "message": "Cluster is unhealthy",
            })))
            .with_status(204)
            .create_async()
            .await;

        let mut headers = BTreeMap::new();
        headers.insert("Authorization".to_string(), "Bearer token".to_string());
        let channel = WebhookChannel::new(format!("{}/alerts", server.url()), headers).unwrap();
        channel.send(&critical()).await.unwrap();
        mock.assert_async().await;
    }
}
