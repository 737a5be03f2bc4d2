//! Notification channels and the dispatcher.
//!
//! This module provides the [`NotificationChannel`] trait, concrete channels
//! for logging, chat webhooks and in-memory capture, and [`ChannelRegistry`],
//! which implements [`Dispatcher`] over a set of named channels.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use crate::error::{IssueError, Result};
use crate::types::{DispatchOutcome, EventSource, Issue, IssueStatus, NotificationKind, Severity};

/// A fully formed notification about one issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationMessage {
    /// The issue this is about.
    pub issue_id: String,
    /// Why it is being sent.
    pub kind: NotificationKind,
    /// Issue title.
    pub title: String,
    /// Where the issue's events came from.
    pub source: EventSource,
    /// Issue subject.
    pub subject_key: String,
    /// Severity at send time.
    pub severity: Severity,
    /// Status at send time.
    pub status: IssueStatus,
    /// Occurrences so far.
    pub occurrence_count: u64,
    /// First occurrence.
    pub first_seen: DateTime<Utc>,
    /// Latest occurrence.
    pub last_seen: DateTime<Utc>,
    /// Analysis summary, if one is attached.
    pub summary: Option<String>,
    /// Suggested fixes from the analysis.
    pub suggested_fixes: Vec<String>,
}

impl NotificationMessage {
    /// Builds a message from the issue's current state.
    #[must_use]
    pub fn from_issue(issue: &Issue, kind: NotificationKind) -> Self {
        let (summary, suggested_fixes) = issue.analysis.as_ref().map_or((None, Vec::new()), |a| {
            (Some(a.summary.clone()), a.suggested_fixes.clone())
        });

        Self {
            issue_id: issue.id.clone(),
            kind,
            title: issue.title.clone(),
            source: issue.source,
            subject_key: issue.subject_key.clone(),
            severity: issue.severity,
            status: issue.status,
            occurrence_count: issue.occurrence_count,
            first_seen: issue.first_seen,
            last_seen: issue.last_seen,
            summary,
            suggested_fixes,
        }
    }

    /// Returns the urgency used for presentation.
    #[must_use]
    pub const fn urgency(&self) -> Urgency {
        match self.kind {
            NotificationKind::Resolution => Urgency::Resolved,
            NotificationKind::Reminder => Urgency::Reminder,
            NotificationKind::Escalation => Urgency::Urgent,
            NotificationKind::Initial if self.severity.is_urgent() => Urgency::Urgent,
            NotificationKind::Initial => Urgency::Standard,
        }
    }

    /// One-line headline.
    #[must_use]
    pub fn headline(&self) -> String {
        match self.kind {
            NotificationKind::Initial => self.title.clone(),
            NotificationKind::Escalation => format!("ESCALATED: {}", self.title),
            NotificationKind::Reminder => format!("REMINDER: {}", self.title),
            NotificationKind::Resolution => format!("RESOLVED: {}", self.title),
        }
    }

    /// Plain-text body with the summary and suggested fixes.
    #[must_use]
    pub fn body(&self) -> String {
        let mut body = format!(
            "{} seen {} time(s) between {} and {}.",
            self.subject_key,
            self.occurrence_count,
            self.first_seen.format("%Y-%m-%d %H:%M UTC"),
            self.last_seen.format("%Y-%m-%d %H:%M UTC"),
        );

        if let Some(summary) = &self.summary {
            body.push_str("\n\n");
            body.push_str(summary);
        }
        if !self.suggested_fixes.is_empty() {
            body.push_str("\n\nSuggested fixes:");
            for fix in &self.suggested_fixes {
                body.push_str("\n- ");
                body.push_str(fix);
            }
        }
        body
    }
}

/// How loudly a message should present itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    /// Routine notification.
    Standard,
    /// High/critical issues and escalations.
    Urgent,
    /// Follow-up while unresolved.
    Reminder,
    /// All clear.
    Resolved,
}

impl Urgency {
    /// Hex color without the leading `#`.
    #[must_use]
    pub const fn color(&self) -> &'static str {
        match self {
            Self::Standard => "FFA500",
            Self::Urgent => "FF0000",
            Self::Reminder => "FFCC00",
            Self::Resolved => "2EB67D",
        }
    }

    /// Returns the urgency as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Urgent => "urgent",
            Self::Reminder => "reminder",
            Self::Resolved => "resolved",
        }
    }
}

impl fmt::Display for Urgency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Trait for notification channels.
///
/// Implement this trait to deliver notifications through other services.
pub trait NotificationChannel: Send + Sync + fmt::Debug {
    /// Returns the name of this channel.
    fn name(&self) -> &str;

    /// Sends a message through this channel.
    ///
    /// # Errors
    ///
    /// Returns `IssueError::DispatchFailed` if the message was rejected or
    /// could not be sent and `IssueError::DispatchTimedOut` if the receiver
    /// did not answer in time.
    fn send(&self, message: &NotificationMessage) -> Result<()>;

    /// Returns true if this channel is enabled.
    fn is_enabled(&self) -> bool {
        true
    }
}

/// Delivers a message to a named channel and reports what happened.
///
/// Implementations never fail the caller: every problem becomes a failed or
/// timed-out outcome.
pub trait Dispatcher: Send + Sync + fmt::Debug {
    /// Dispatches `message` to `channel`.
    fn dispatch(&self, channel: &str, message: &NotificationMessage) -> DispatchOutcome;
}

/// A set of named channels.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    channels: RwLock<HashMap<String, Arc<dyn NotificationChannel>>>,
}

impl ChannelRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a channel, replacing any with the same name.
    pub fn register(&self, channel: Arc<dyn NotificationChannel>) {
        let name = channel.name().to_string();
        if self.channels.write().insert(name.clone(), channel).is_some() {
            warn!(channel = %name, "replaced existing notification channel");
        } else {
            debug!(channel = %name, "registered notification channel");
        }
    }

    /// Removes a channel.
    pub fn remove(&self, name: &str) -> Option<Arc<dyn NotificationChannel>> {
        self.channels.write().remove(name)
    }

    /// Looks up a channel.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn NotificationChannel>> {
        self.channels.read().get(name).cloned()
    }

    /// Registered channel names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered channels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.read().len()
    }

    /// Returns true if no channel is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Dispatcher for ChannelRegistry {
    fn dispatch(&self, channel: &str, message: &NotificationMessage) -> DispatchOutcome {
        // Clone the handle so no registry lock is held while sending.
        let Some(target) = self.get(channel) else {
            warn!(channel, issue_id = %message.issue_id, "no such notification channel");
            return DispatchOutcome::failed(format!("unknown channel '{channel}'"));
        };

        if !target.is_enabled() {
            debug!(channel, "channel is disabled, skipping");
            return DispatchOutcome::failed(format!("channel '{channel}' is disabled"));
        }

        match target.send(message) {
            Ok(()) => DispatchOutcome::Delivered,
            Err(IssueError::DispatchTimedOut { reason, .. }) => {
                warn!(channel, issue_id = %message.issue_id, reason = %reason, "notification timed out");
                DispatchOutcome::TimedOut { reason }
            }
            Err(IssueError::DispatchFailed { reason, .. }) => {
                warn!(channel, issue_id = %message.issue_id, reason = %reason, "notification failed");
                DispatchOutcome::Failed { reason }
            }
            Err(e) => {
                warn!(channel, issue_id = %message.issue_id, error = %e, "notification failed");
                DispatchOutcome::failed(e.to_string())
            }
        }
    }
}

/// A channel that writes notifications to the log.
#[derive(Debug, Clone)]
pub struct LogChannel {
    name: String,
    enabled: bool,
}

impl LogChannel {
    /// Creates a new log channel.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
        }
    }

    /// Sets whether the channel is enabled.
    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

impl Default for LogChannel {
    fn default() -> Self {
        Self::new("log")
    }
}

impl NotificationChannel for LogChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&self, message: &NotificationMessage) -> Result<()> {
        match message.urgency() {
            Urgency::Urgent => error!(
                issue_id = %message.issue_id,
                severity = %message.severity,
                occurrences = message.occurrence_count,
                subject = %message.subject_key,
                "{}",
                message.headline()
            ),
            Urgency::Standard | Urgency::Reminder => warn!(
                issue_id = %message.issue_id,
                severity = %message.severity,
                occurrences = message.occurrence_count,
                subject = %message.subject_key,
                "{}",
                message.headline()
            ),
            Urgency::Resolved => info!(
                issue_id = %message.issue_id,
                subject = %message.subject_key,
                "{}",
                message.headline()
            ),
        }
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}

/// Payload layout for a webhook.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookFormat {
    /// The message serialized as-is.
    #[default]
    Json,
    /// Slack incoming-webhook attachment.
    Slack,
    /// Microsoft Teams `MessageCard`.
    Teams,
}

impl WebhookFormat {
    /// Returns the format as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Slack => "slack",
            Self::Teams => "teams",
        }
    }
}

impl fmt::Display for WebhookFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Configuration for a webhook channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// The name of this webhook.
    pub name: String,
    /// The URL to post to.
    pub url: String,
    /// Payload layout.
    #[serde(default)]
    pub format: WebhookFormat,
    /// HTTP headers to include with requests.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Timeout in seconds for HTTP requests.
    #[serde(default = "default_webhook_timeout")]
    pub timeout_secs: u64,
    /// Whether this channel is enabled.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

const fn default_webhook_timeout() -> u64 {
    10
}

const fn default_enabled() -> bool {
    true
}

impl WebhookConfig {
    /// Creates a new webhook configuration.
    ///
    /// # Errors
    ///
    /// Returns `IssueError::InvalidConfig` if the URL is empty or not HTTP(S).
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Result<Self> {
        let config = Self {
            name: name.into(),
            url: url.into(),
            format: WebhookFormat::default(),
            headers: HashMap::new(),
            timeout_secs: default_webhook_timeout(),
            enabled: true,
        };
        config.validate()?;
        Ok(config)
    }

    /// Sets the payload format.
    #[must_use]
    pub const fn with_format(mut self, format: WebhookFormat) -> Self {
        self.format = format;
        self
    }

    /// Adds a header to the configuration.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Sets the timeout.
    #[must_use]
    pub const fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Sets whether the channel is enabled.
    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `IssueError::InvalidConfig` if the URL is empty or not HTTP(S),
    /// or the timeout is zero.
    pub fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(IssueError::InvalidConfig {
                reason: format!("webhook '{}' URL cannot be empty", self.name),
            });
        }
        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            return Err(IssueError::InvalidConfig {
                reason: format!("webhook '{}' URL must be http or https", self.name),
            });
        }
        if self.timeout_secs == 0 {
            return Err(IssueError::InvalidConfig {
                reason: format!("webhook '{}' timeout must be greater than 0", self.name),
            });
        }
        Ok(())
    }
}

/// A webhook notification channel.
///
/// Posts each message as JSON to the configured URL using a blocking HTTP
/// client; call it from a blocking context.
#[derive(Debug, Clone)]
pub struct WebhookChannel {
    config: WebhookConfig,
    client: reqwest::blocking::Client,
}

impl WebhookChannel {
    /// Creates a new webhook channel with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `IssueError::InvalidConfig` if the configuration is invalid or
    /// the HTTP client cannot be built.
    pub fn new(config: WebhookConfig) -> Result<Self> {
        config.validate()?;
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| IssueError::InvalidConfig {
                reason: format!("webhook '{}': {e}", config.name),
            })?;
        Ok(Self { config, client })
    }

    /// Returns the webhook URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// Returns the payload format.
    #[must_use]
    pub const fn format(&self) -> WebhookFormat {
        self.config.format
    }

    /// Builds the JSON payload for a message.
    #[must_use]
    pub fn payload(&self, message: &NotificationMessage) -> Value {
        match self.config.format {
            WebhookFormat::Json => serde_json::to_value(message).unwrap_or(Value::Null),
            WebhookFormat::Slack => slack_payload(message),
            WebhookFormat::Teams => teams_payload(message),
        }
    }
}

impl NotificationChannel for WebhookChannel {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn send(&self, message: &NotificationMessage) -> Result<()> {
        let payload = self.payload(message);
        let mut request = self.client.post(&self.config.url).json(&payload);
        for (key, value) in &self.config.headers {
            request = request.header(key, value);
        }

        debug!(channel = %self.name(), url = %self.config.url, format = %self.config.format, "posting webhook");
        let response = request.send().map_err(|e| {
            if e.is_timeout() {
                IssueError::DispatchTimedOut {
                    channel: self.name().to_string(),
                    reason: format!("no response within {}s", self.config.timeout_secs),
                }
            } else {
                IssueError::DispatchFailed {
                    channel: self.name().to_string(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(IssueError::DispatchFailed {
                channel: self.name().to_string(),
                reason: format!("HTTP {}", status.as_u16()),
            });
        }

        info!(channel = %self.name(), issue_id = %message.issue_id, kind = %message.kind, "webhook notification sent");
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }
}

fn slack_payload(message: &NotificationMessage) -> Value {
    let mut fields = vec![
        json!({ "title": "Severity", "value": message.severity.as_str().to_uppercase(), "short": true }),
        json!({ "title": "Status", "value": message.status.as_str().to_uppercase(), "short": true }),
        json!({ "title": "Occurrences", "value": message.occurrence_count.to_string(), "short": true }),
        json!({ "title": "First seen", "value": message.first_seen.format("%Y-%m-%d %H:%M UTC").to_string(), "short": true }),
    ];
    if !message.suggested_fixes.is_empty() {
        fields.push(json!({
            "title": "Suggested fixes",
            "value": message.suggested_fixes.join("\n"),
            "short": false,
        }));
    }

    json!({
        "attachments": [{
            "color": format!("#{}", message.urgency().color()),
            "title": message.headline(),
            "text": message.body(),
            "fields": fields,
            "footer": "vigil",
            "ts": message.last_seen.timestamp(),
        }]
    })
}

fn teams_payload(message: &NotificationMessage) -> Value {
    let facts = vec![
        json!({ "name": "Subject", "value": message.subject_key }),
        json!({ "name": "Source", "value": message.source.as_str() }),
        json!({ "name": "Occurrences", "value": message.occurrence_count.to_string() }),
        json!({ "name": "First seen", "value": message.first_seen.format("%Y-%m-%d %H:%M UTC").to_string() }),
    ];

    json!({
        "@type": "MessageCard",
        "@context": "http://schema.org/extensions",
        "themeColor": message.urgency().color(),
        "summary": message.headline(),
        "sections": [{
            "activityTitle": message.headline(),
            "activitySubtitle": format!(
                "Severity: {} | Status: {}",
                message.severity.as_str().to_uppercase(),
                message.status.as_str().to_uppercase()
            ),
            "text": message.body(),
            "facts": facts,
        }]
    })
}

/// A channel that keeps messages in memory.
///
/// Useful for dry runs and tests; can be told to fail.
#[derive(Debug, Default)]
pub struct MemoryChannel {
    name: String,
    sent: Mutex<Vec<NotificationMessage>>,
    failure: Mutex<Option<DispatchOutcome>>,
}

impl MemoryChannel {
    /// Creates a new memory channel.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Makes every following send fail with `reason`.
    pub fn fail_with(&self, reason: impl Into<String>) {
        *self.failure.lock() = Some(DispatchOutcome::failed(reason));
    }

    /// Makes every following send time out.
    pub fn time_out(&self) {
        *self.failure.lock() = Some(DispatchOutcome::TimedOut {
            reason: "simulated timeout".to_string(),
        });
    }

    /// Makes sends succeed again.
    pub fn recover(&self) {
        *self.failure.lock() = None;
    }

    /// Messages delivered so far.
    #[must_use]
    pub fn sent(&self) -> Vec<NotificationMessage> {
        self.sent.lock().clone()
    }

    /// Number of messages delivered so far.
    #[must_use]
    pub fn count(&self) -> usize {
        self.sent.lock().len()
    }

    /// Number of delivered messages of one kind.
    #[must_use]
    pub fn count_kind(&self, kind: NotificationKind) -> usize {
        self.sent.lock().iter().filter(|m| m.kind == kind).count()
    }
}

impl NotificationChannel for MemoryChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&self, message: &NotificationMessage) -> Result<()> {
        match self.failure.lock().clone() {
            Some(DispatchOutcome::TimedOut { reason }) => Err(IssueError::DispatchTimedOut {
                channel: self.name.clone(),
                reason,
            }),
            Some(DispatchOutcome::Failed { reason }) => Err(IssueError::DispatchFailed {
                channel: self.name.clone(),
                reason,
            }),
            _ => {
                self.sent.lock().push(message.clone());
                Ok(())
            }
        }
    }
}
