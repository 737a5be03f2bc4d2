//! Escalation policy.
//!
//! The state machine is `open -> notified -> escalated -> reminded* -> resolved`.
//! [`EscalationPolicy::plan`] decides which transition, if any, is due for an
//! issue at a point in time; [`Transition::apply`] records it on the issue.
//! Neither touches the store or a channel, so the machine can be driven
//! deterministically from tests.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{IssueError, Result};
use crate::types::{Issue, IssueStatus, NotificationKind, NotificationRecord, Severity};

/// When to notify, escalate and remind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationPolicy {
    /// Occurrences that trigger the initial notification.
    pub alert_threshold: u64,
    /// Severity that triggers the initial notification regardless of count.
    pub alert_severity: Severity,
    /// Escalate once occurrences reach `alert_threshold * escalation_multiple`.
    pub escalation_multiple: u64,
    /// Minimum time between the last notification and a reminder, in seconds.
    pub reminder_interval_secs: u64,
    /// Notify as soon as an issue is created.
    pub notify_on_create: bool,
    /// Tell notified channels when an issue resolves.
    pub notify_on_resolve: bool,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            alert_threshold: 3,
            alert_severity: Severity::Critical,
            escalation_multiple: 2,
            reminder_interval_secs: 600,
            notify_on_create: false,
            notify_on_resolve: true,
        }
    }
}

impl EscalationPolicy {
    /// Longest accepted reminder interval: one year.
    pub const MAX_REMINDER_INTERVAL_SECS: u64 = 365 * 24 * 60 * 60;

    /// Sets the alert threshold.
    #[must_use]
    pub const fn with_alert_threshold(mut self, threshold: u64) -> Self {
        self.alert_threshold = threshold;
        self
    }

    /// Sets the alert severity.
    #[must_use]
    pub const fn with_alert_severity(mut self, severity: Severity) -> Self {
        self.alert_severity = severity;
        self
    }

    /// Sets the escalation multiple.
    #[must_use]
    pub const fn with_escalation_multiple(mut self, multiple: u64) -> Self {
        self.escalation_multiple = multiple;
        self
    }

    /// Sets the reminder interval.
    #[must_use]
    pub const fn with_reminder_interval_secs(mut self, secs: u64) -> Self {
        self.reminder_interval_secs = secs;
        self
    }

    /// Sets whether new issues notify immediately.
    #[must_use]
    pub const fn with_notify_on_create(mut self, enabled: bool) -> Self {
        self.notify_on_create = enabled;
        self
    }

    /// Sets whether resolutions are announced.
    #[must_use]
    pub const fn with_notify_on_resolve(mut self, enabled: bool) -> Self {
        self.notify_on_resolve = enabled;
        self
    }

    /// The reminder interval as a chrono duration.
    #[must_use]
    pub fn reminder_interval(&self) -> Duration {
        let secs = self.reminder_interval_secs.min(Self::MAX_REMINDER_INTERVAL_SECS);
        Duration::seconds(secs as i64)
    }

    /// Validates the policy.
    ///
    /// # Errors
    ///
    /// Returns `IssueError::InvalidConfig` if a threshold, multiple or
    /// interval is zero, or if the reminder interval is longer than a year.
    pub fn validate(&self) -> Result<()> {
        if self.alert_threshold == 0 {
            return Err(IssueError::InvalidConfig {
                reason: "escalation.alert_threshold must be greater than 0".to_string(),
            });
        }
        if self.escalation_multiple < 2 {
            return Err(IssueError::InvalidConfig {
                reason: "escalation.escalation_multiple must be at least 2".to_string(),
            });
        }
        if self.reminder_interval_secs == 0 {
            return Err(IssueError::InvalidConfig {
                reason: "escalation.reminder_interval_secs must be greater than 0".to_string(),
            });
        }
        if self.reminder_interval_secs > Self::MAX_REMINDER_INTERVAL_SECS {
            return Err(IssueError::InvalidConfig {
                reason: format!(
                    "escalation.reminder_interval_secs cannot exceed {}",
                    Self::MAX_REMINDER_INTERVAL_SECS
                ),
            });
        }
        Ok(())
    }

    /// Returns the transition due for `issue` at `now`, if any.
    #[must_use]
    pub fn plan(&self, issue: &Issue, now: DateTime<Utc>) -> Option<Transition> {
        match issue.status {
            IssueStatus::Resolved => None,
            IssueStatus::Open => self.should_alert(issue).then_some(Transition::Notify),
            IssueStatus::Notified | IssueStatus::Reminded => {
                if issue.escalated_at.is_none() && self.should_escalate(issue) {
                    Some(Transition::Escalate)
                } else if self.reminder_due(issue, now) {
                    Some(Transition::Remind)
                } else {
                    None
                }
            }
            IssueStatus::Escalated => self.reminder_due(issue, now).then_some(Transition::Remind),
        }
    }

    /// True once an open issue warrants its first notification.
    #[must_use]
    pub fn should_alert(&self, issue: &Issue) -> bool {
        self.notify_on_create
            || issue.occurrence_count >= self.alert_threshold
            || issue.severity >= self.alert_severity
    }

    /// True once a notified issue warrants a higher-urgency notification.
    #[must_use]
    pub fn should_escalate(&self, issue: &Issue) -> bool {
        let severity_rose = issue
            .notified_severity
            .is_some_and(|notified| issue.severity > notified);
        let count_limit = self.alert_threshold.saturating_mul(self.escalation_multiple);
        severity_rose || issue.occurrence_count >= count_limit
    }

    /// True once a reminder interval has passed since the last notification.
    #[must_use]
    pub fn reminder_due(&self, issue: &Issue, now: DateTime<Utc>) -> bool {
        issue
            .last_notified_at
            .is_some_and(|last| now - last >= self.reminder_interval())
    }
}

/// Which channels receive which notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Routing {
    /// Channels for routine notifications.
    pub standard: Vec<String>,
    /// Channels for high/critical issues and escalations.
    pub urgent: Vec<String>,
}

impl Default for Routing {
    fn default() -> Self {
        Self {
            standard: vec!["log".to_string()],
            urgent: vec!["log".to_string()],
        }
    }
}

impl Routing {
    /// Creates routing with the given channel lists.
    #[must_use]
    pub fn new(standard: Vec<String>, urgent: Vec<String>) -> Self {
        Self { standard, urgent }
    }

    /// Routes everything to one channel.
    #[must_use]
    pub fn single(channel: impl Into<String>) -> Self {
        let channel = channel.into();
        Self {
            standard: vec![channel.clone()],
            urgent: vec![channel],
        }
    }

    /// Channels for a notification of `kind` about an issue at `severity`.
    #[must_use]
    pub fn channels_for(&self, severity: Severity, kind: NotificationKind) -> &[String] {
        if kind == NotificationKind::Escalation || severity.is_urgent() {
            &self.urgent
        } else {
            &self.standard
        }
    }

    /// Validates the routing.
    ///
    /// # Errors
    ///
    /// Returns `IssueError::InvalidConfig` if either list is empty.
    pub fn validate(&self) -> Result<()> {
        if self.standard.is_empty() || self.urgent.is_empty() {
            return Err(IssueError::InvalidConfig {
                reason: "routing.standard and routing.urgent need at least one channel"
                    .to_string(),
            });
        }
        Ok(())
    }
}

/// A due state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transition {
    /// `open -> notified`.
    Notify,
    /// `notified|reminded -> escalated`.
    Escalate,
    /// `notified|escalated|reminded -> reminded`.
    Remind,
}

impl Transition {
    /// Returns the transition as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Notify => "notify",
            Self::Escalate => "escalate",
            Self::Remind => "remind",
        }
    }

    /// The notification this transition sends.
    #[must_use]
    pub const fn notification_kind(&self) -> NotificationKind {
        match self {
            Self::Notify => NotificationKind::Initial,
            Self::Escalate => NotificationKind::Escalation,
            Self::Remind => NotificationKind::Reminder,
        }
    }

    /// The status the issue moves to.
    #[must_use]
    pub const fn target_status(&self) -> IssueStatus {
        match self {
            Self::Notify => IssueStatus::Notified,
            Self::Escalate => IssueStatus::Escalated,
            Self::Remind => IssueStatus::Reminded,
        }
    }

    /// Records the transition on `issue` with one pending history entry per
    /// channel, returning the new entries.
    pub fn apply(
        &self,
        issue: &mut Issue,
        channels: &[String],
        now: DateTime<Utc>,
    ) -> Vec<NotificationRecord> {
        issue.prune_reminders();
        issue.status = self.target_status();
        issue.last_notified_at = Some(now);
        match self {
            Self::Notify => issue.notified_severity = Some(issue.severity),
            Self::Escalate => {
                issue.notified_severity = Some(issue.severity);
                issue.escalated_at = Some(now);
            }
            Self::Remind => {}
        }

        let records: Vec<NotificationRecord> = channels
            .iter()
            .map(|channel| NotificationRecord::pending(channel, self.notification_kind(), now))
            .collect();
        issue.notification_history.extend(records.iter().cloned());
        records
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Pending resolution entries for every channel `issue` was notified on.
///
/// Returns nothing if the issue never notified anyone.
pub fn record_resolution(issue: &mut Issue, now: DateTime<Utc>) -> Vec<NotificationRecord> {
    let mut channels: Vec<&str> = Vec::new();
    for record in &issue.notification_history {
        if record.kind != NotificationKind::Resolution && !channels.contains(&record.channel.as_str())
        {
            channels.push(&record.channel);
        }
    }

    let records: Vec<NotificationRecord> = channels
        .into_iter()
        .map(|channel| NotificationRecord::pending(channel, NotificationKind::Resolution, now))
        .collect();
    issue.notification_history.extend(records.iter().cloned());
    records
}
