//! Core types for issue tracking.
//!
//! This module provides the fundamental types used throughout the vigil-issues crate:
//! - [`Severity`]: How urgent an issue is
//! - [`IssueStatus`]: Where an issue sits in its notification lifecycle
//! - [`Event`]: A normalized monitoring observation
//! - [`Issue`]: The deduplicated, stateful record of a problem
//! - [`NotificationRecord`]: One entry of an issue's notification history
//! - [`Analysis`]: Optional AI-derived annotation attached to an issue
//! - [`IssueFilter`]: Query filter for listing issues

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::IssueError;

/// The severity of an issue, ordered from least to most urgent.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Worth recording, no action required.
    Low,
    /// Should be investigated.
    #[default]
    Medium,
    /// Needs prompt attention.
    High,
    /// Requires immediate attention.
    Critical,
}

impl Severity {
    /// All severities, least urgent first.
    pub const ALL: [Self; 4] = [Self::Low, Self::Medium, Self::High, Self::Critical];

    /// Returns the severity as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Returns the priority of this severity (higher = more urgent).
    #[must_use]
    pub const fn priority(&self) -> u8 {
        match self {
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 3,
            Self::Critical => 4,
        }
    }

    /// Returns the next level up, saturating at critical.
    #[must_use]
    pub const fn raised(self) -> Self {
        match self {
            Self::Low => Self::Medium,
            Self::Medium => Self::High,
            Self::High | Self::Critical => Self::Critical,
        }
    }

    /// Returns true for severities routed to urgent channels.
    #[must_use]
    pub const fn is_urgent(&self) -> bool {
        matches!(self, Self::High | Self::Critical)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Severity {
    type Err = IssueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(IssueError::malformed(format!("unknown severity '{other}'"))),
        }
    }
}

/// The lifecycle status of an issue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueStatus {
    /// Detected, nobody told yet.
    #[default]
    Open,
    /// The initial notification went out.
    Notified,
    /// A higher-urgency notification went out.
    Escalated,
    /// At least one reminder went out.
    Reminded,
    /// Recovered or manually closed. Terminal.
    Resolved,
}

impl IssueStatus {
    /// All statuses in lifecycle order.
    pub const ALL: [Self; 5] = [
        Self::Open,
        Self::Notified,
        Self::Escalated,
        Self::Reminded,
        Self::Resolved,
    ];

    /// Returns the status as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Notified => "notified",
            Self::Escalated => "escalated",
            Self::Reminded => "reminded",
            Self::Resolved => "resolved",
        }
    }

    /// Returns true if the issue is closed.
    #[must_use]
    pub const fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved)
    }

    /// Returns true once at least the initial notification has been attempted.
    #[must_use]
    pub const fn has_notified(&self) -> bool {
        matches!(self, Self::Notified | Self::Escalated | Self::Reminded)
    }
}

impl fmt::Display for IssueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for IssueStatus {
    type Err = IssueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| IssueError::malformed(format!("unknown status '{s}'")))
    }
}

/// Where an event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    /// A CI/CD pipeline run.
    Pipeline,
    /// A deployment health report.
    Deployment,
}

impl EventSource {
    /// Returns the source as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pipeline => "pipeline",
            Self::Deployment => "deployment",
        }
    }
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EventSource {
    type Err = IssueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pipeline" => Ok(Self::Pipeline),
            "deployment" => Ok(Self::Deployment),
            other => Err(IssueError::malformed(format!("unknown source '{other}'"))),
        }
    }
}

/// What an event says about its subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// The subject failed.
    Failure,
    /// The subject works but is unhealthy or slow.
    Degradation,
    /// The subject is healthy again.
    Recovery,
}

impl EventKind {
    /// Returns the kind as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Failure => "failure",
            Self::Degradation => "degradation",
            Self::Recovery => "recovery",
        }
    }

    /// Returns true for recovery events.
    #[must_use]
    pub const fn is_recovery(&self) -> bool {
        matches!(self, Self::Recovery)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = IssueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "failure" => Ok(Self::Failure),
            "degradation" => Ok(Self::Degradation),
            "recovery" => Ok(Self::Recovery),
            other => Err(IssueError::malformed(format!("unknown event kind '{other}'"))),
        }
    }
}

/// Coarse classification of what went wrong.
///
/// Deliberately coarse: two failures that differ only in line numbers or
/// embedded timestamps land in the same class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureClass {
    /// A security or vulnerability scan failed.
    SecurityScan,
    /// Containers restart in a loop.
    CrashLoop,
    /// A container image could not be pulled.
    ImagePull,
    /// A process was killed for exceeding memory.
    OutOfMemory,
    /// Something timed out or hit a deadline.
    Timeout,
    /// Tests failed.
    Test,
    /// Compilation or build steps failed.
    Build,
    /// Dependency resolution or install failed.
    Dependency,
    /// Authentication or authorization failed.
    Permission,
    /// Connectivity problems.
    Network,
    /// The deployment has no available replicas.
    Unavailable,
    /// Fewer replicas than desired.
    Scaling,
    /// Slower than expected.
    Slow,
    /// Nothing recognizable.
    #[default]
    Unknown,
}

impl FailureClass {
    /// Returns the class as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::SecurityScan => "security-scan",
            Self::CrashLoop => "crash-loop",
            Self::ImagePull => "image-pull",
            Self::OutOfMemory => "out-of-memory",
            Self::Timeout => "timeout",
            Self::Test => "test",
            Self::Build => "build",
            Self::Dependency => "dependency",
            Self::Permission => "permission",
            Self::Network => "network",
            Self::Unavailable => "unavailable",
            Self::Scaling => "scaling",
            Self::Slow => "slow",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A normalized, immutable monitoring observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Where the event came from.
    pub source: EventSource,
    /// When the observation was made.
    pub timestamp: DateTime<Utc>,
    /// What the event is about, e.g. `ci@main` or `prod/api`.
    pub subject_key: String,
    /// What happened.
    pub kind: EventKind,
    /// Coarse classification of the problem.
    pub class: FailureClass,
    /// The original record, kept opaque.
    pub raw_payload: serde_json::Value,
    /// Fingerprint grouping events that describe the same problem.
    pub signature: String,
}

impl Event {
    /// Creates an event and derives its signature.
    #[must_use]
    pub fn new(
        source: EventSource,
        subject_key: impl Into<String>,
        kind: EventKind,
        class: FailureClass,
        timestamp: DateTime<Utc>,
        raw_payload: serde_json::Value,
    ) -> Self {
        let subject_key = subject_key.into();
        let signature = Self::compute_signature(source, &subject_key, kind, class);

        Self {
            source,
            timestamp,
            subject_key,
            kind,
            class,
            raw_payload,
            signature,
        }
    }

    /// Computes the signature for the given components.
    ///
    /// Fields are length-prefixed so that `("a", "bc")` and `("ab", "c")`
    /// never collide.
    #[must_use]
    pub fn compute_signature(
        source: EventSource,
        subject_key: &str,
        kind: EventKind,
        class: FailureClass,
    ) -> String {
        let mut hasher = blake3::Hasher::new();
        for part in [
            source.as_str(),
            subject_key,
            kind.as_str(),
            class.as_str(),
        ] {
            hasher.update(&(part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }

        let hash = hasher.finalize();
        hash.to_hex()[..32].to_string()
    }

    /// A short human-readable title for issues opened by this event.
    #[must_use]
    pub fn title(&self) -> String {
        let what = match (self.source, self.kind) {
            (EventSource::Pipeline, EventKind::Failure) => "Pipeline failure",
            (EventSource::Pipeline, EventKind::Degradation) => "Pipeline degradation",
            (EventSource::Deployment, EventKind::Failure) => "Deployment failure",
            (EventSource::Deployment, EventKind::Degradation) => "Deployment degradation",
            (_, EventKind::Recovery) => "Recovery",
        };

        if self.class == FailureClass::Unknown {
            format!("{what} in {}", self.subject_key)
        } else {
            format!("{what} in {} ({})", self.subject_key, self.class)
        }
    }
}

/// An optional AI-derived annotation.
///
/// Replaceable at any time and never required for correct lifecycle handling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    /// Root-cause summary.
    pub summary: String,
    /// Suggested fixes, most important first.
    #[serde(default)]
    pub suggested_fixes: Vec<String>,
    /// Severity suggested by the analyzer, if any.
    #[serde(default)]
    pub severity: Option<Severity>,
    /// When the analysis was produced.
    pub produced_at: DateTime<Utc>,
}

impl Analysis {
    /// Creates an analysis with just a summary.
    #[must_use]
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            suggested_fixes: Vec::new(),
            severity: None,
            produced_at: Utc::now(),
        }
    }

    /// Adds a suggested fix.
    #[must_use]
    pub fn with_fix(mut self, fix: impl Into<String>) -> Self {
        self.suggested_fixes.push(fix.into());
        self
    }

    /// Sets the suggested severity.
    #[must_use]
    pub const fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    /// Sets the production timestamp.
    #[must_use]
    pub const fn produced_at(mut self, at: DateTime<Utc>) -> Self {
        self.produced_at = at;
        self
    }
}

/// Why a notification was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    /// First notification for an issue.
    Initial,
    /// Higher-urgency follow-up.
    Escalation,
    /// Periodic reminder while unresolved.
    Reminder,
    /// The issue was resolved.
    Resolution,
}

impl NotificationKind {
    /// Returns the kind as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Escalation => "escalation",
            Self::Reminder => "reminder",
            Self::Resolution => "resolution",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of one dispatch attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// Recorded, delivery not finished yet.
    Pending,
    /// The channel accepted the message.
    Delivered,
    /// The channel rejected the message or was unreachable.
    Failed {
        /// Reason reported by the channel.
        reason: String,
    },
    /// The channel did not answer in time.
    TimedOut {
        /// Reason reported by the channel.
        reason: String,
    },
}

impl DispatchOutcome {
    /// Creates a failed outcome.
    #[must_use]
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    /// Returns the outcome as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Delivered => "delivered",
            Self::Failed { .. } => "failed",
            Self::TimedOut { .. } => "timed_out",
        }
    }

    /// Returns true if the delivery did not succeed.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. } | Self::TimedOut { .. })
    }

    /// Returns true if the delivery succeeded.
    #[must_use]
    pub const fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }
}

impl fmt::Display for DispatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed { reason } | Self::TimedOut { reason } => {
                write!(f, "{} ({reason})", self.as_str())
            }
            _ => write!(f, "{}", self.as_str()),
        }
    }
}

/// One entry of an issue's notification history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRecord {
    /// Unique identifier of this attempt.
    pub id: String,
    /// Channel the notification was sent to.
    pub channel: String,
    /// Why it was sent.
    pub kind: NotificationKind,
    /// When the attempt was made.
    pub timestamp: DateTime<Utc>,
    /// What happened.
    #[serde(flatten)]
    pub outcome: DispatchOutcome,
}

impl NotificationRecord {
    /// Creates a pending record.
    #[must_use]
    pub fn pending(
        channel: impl Into<String>,
        kind: NotificationKind,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            channel: channel.into(),
            kind,
            timestamp,
            outcome: DispatchOutcome::Pending,
        }
    }
}

/// The deduplicated, stateful record of a detected problem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    /// Stable identifier, generated once.
    pub id: String,
    /// Source of the events grouped here.
    pub source: EventSource,
    /// Subject of the events grouped here.
    pub subject_key: String,
    /// Fingerprint used to match future events.
    pub signature: String,
    /// Human-readable title.
    pub title: String,
    /// Current severity; never decreases while unresolved.
    pub severity: Severity,
    /// Lifecycle status.
    pub status: IssueStatus,
    /// Timestamp of the first matched event.
    pub first_seen: DateTime<Utc>,
    /// Timestamp of the latest matched event.
    pub last_seen: DateTime<Utc>,
    /// When the issue was resolved.
    pub resolved_at: Option<DateTime<Utc>>,
    /// Number of matched non-recovery events.
    pub occurrence_count: u64,
    /// Most recent occurrence timestamps, oldest first.
    #[serde(default)]
    pub recent_occurrences: VecDeque<DateTime<Utc>>,
    /// Optional AI-derived annotation.
    #[serde(default)]
    pub analysis: Option<Analysis>,
    /// Every notification attempt, in order.
    #[serde(default)]
    pub notification_history: Vec<NotificationRecord>,
    /// Severity at the time of the last initial/escalation notification.
    #[serde(default)]
    pub notified_severity: Option<Severity>,
    /// When the last notification was attempted.
    #[serde(default)]
    pub last_notified_at: Option<DateTime<Utc>>,
    /// When the issue was escalated.
    #[serde(default)]
    pub escalated_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency version, bumped by every store update.
    #[serde(default)]
    pub version: u64,
}

impl Issue {
    /// How many occurrence timestamps are retained for windowed counting.
    pub const MAX_RECENT_OCCURRENCES: usize = 64;

    /// How many settled reminder entries the notification history keeps.
    ///
    /// A stuck issue adds one reminder per channel every interval; older
    /// settled reminders are dropped so the history stays bounded.
    pub const MAX_SETTLED_REMINDERS: usize = 32;

    /// Opens a new issue from its first event.
    #[must_use]
    pub fn open(event: &Event, severity: Severity) -> Self {
        let mut recent_occurrences = VecDeque::new();
        recent_occurrences.push_back(event.timestamp);

        Self {
            id: Uuid::new_v4().to_string(),
            source: event.source,
            subject_key: event.subject_key.clone(),
            signature: event.signature.clone(),
            title: event.title(),
            severity,
            status: IssueStatus::Open,
            first_seen: event.timestamp,
            last_seen: event.timestamp,
            resolved_at: None,
            occurrence_count: 1,
            recent_occurrences,
            analysis: None,
            notification_history: Vec::new(),
            notified_severity: None,
            last_notified_at: None,
            escalated_at: None,
            version: 0,
        }
    }

    /// Records another matched occurrence.
    ///
    /// Out-of-order timestamps still count, but never move `last_seen` back
    /// or `first_seen` forward.
    pub fn record_occurrence(&mut self, at: DateTime<Utc>) {
        self.occurrence_count += 1;
        if at > self.last_seen {
            self.last_seen = at;
        }
        if at < self.first_seen {
            self.first_seen = at;
        }

        let pos = self
            .recent_occurrences
            .iter()
            .rposition(|t| *t <= at)
            .map_or(0, |i| i + 1);
        self.recent_occurrences.insert(pos, at);
        while self.recent_occurrences.len() > Self::MAX_RECENT_OCCURRENCES {
            self.recent_occurrences.pop_front();
        }
    }

    /// Counts retained occurrences in `(now - window, now]`.
    #[must_use]
    pub fn occurrences_within(&self, window: Duration, now: DateTime<Utc>) -> usize {
        let since = now.checked_sub_signed(window);
        self.recent_occurrences
            .iter()
            .filter(|t| **t <= now && since.is_none_or(|since| **t > since))
            .count()
    }

    /// Marks the issue resolved.
    ///
    /// Returns `false` if it already was.
    pub fn resolve(&mut self, at: DateTime<Utc>) -> bool {
        if self.status.is_resolved() {
            return false;
        }
        self.status = IssueStatus::Resolved;
        self.resolved_at = Some(at.max(self.first_seen));
        true
    }

    /// Returns true if the issue is closed.
    #[must_use]
    pub const fn is_resolved(&self) -> bool {
        self.status.is_resolved()
    }

    /// Raises severity to `severity` if it is higher.
    ///
    /// Returns true if the severity changed.
    pub fn raise_severity(&mut self, severity: Severity) -> bool {
        if severity > self.severity {
            self.severity = severity;
            true
        } else {
            false
        }
    }

    /// Number of history entries whose delivery failed.
    #[must_use]
    pub fn failed_dispatches(&self) -> usize {
        self.notification_history
            .iter()
            .filter(|r| r.outcome.is_failure())
            .count()
    }

    /// Drops the oldest settled reminder entries beyond
    /// [`Self::MAX_SETTLED_REMINDERS`].
    ///
    /// Initial, escalation and resolution entries are kept, as is anything
    /// still pending.
    pub fn prune_reminders(&mut self) {
        let settled = |r: &NotificationRecord| {
            r.kind == NotificationKind::Reminder && !matches!(r.outcome, DispatchOutcome::Pending)
        };
        let mut excess = self
            .notification_history
            .iter()
            .filter(|r| settled(r))
            .count()
            .saturating_sub(Self::MAX_SETTLED_REMINDERS);
        if excess == 0 {
            return;
        }
        self.notification_history.retain(|r| {
            if excess > 0 && settled(r) {
                excess -= 1;
                false
            } else {
                true
            }
        });
    }

    /// Looks up a history entry by ID.
    pub fn notification_mut(&mut self, record_id: &str) -> Option<&mut NotificationRecord> {
        self.notification_history
            .iter_mut()
            .find(|r| r.id == record_id)
    }
}

/// Filter for listing issues.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueFilter {
    /// Only issues with this status.
    pub status: Option<IssueStatus>,
    /// Only issues at or above this severity.
    pub min_severity: Option<Severity>,
    /// Only issues from this source.
    pub source: Option<EventSource>,
    /// Only issues for this subject.
    pub subject_key: Option<String>,
    /// Exclude resolved issues.
    pub unresolved_only: bool,
    /// Maximum number of results.
    pub limit: Option<usize>,
}

impl IssueFilter {
    /// A filter matching everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts to a status.
    #[must_use]
    pub const fn status(mut self, status: IssueStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Restricts to a minimum severity.
    #[must_use]
    pub const fn min_severity(mut self, severity: Severity) -> Self {
        self.min_severity = Some(severity);
        self
    }

    /// Restricts to a source.
    #[must_use]
    pub const fn source(mut self, source: EventSource) -> Self {
        self.source = Some(source);
        self
    }

    /// Restricts to a subject.
    #[must_use]
    pub fn subject_key(mut self, subject_key: impl Into<String>) -> Self {
        self.subject_key = Some(subject_key.into());
        self
    }

    /// Excludes resolved issues.
    #[must_use]
    pub const fn unresolved(mut self) -> Self {
        self.unresolved_only = true;
        self
    }

    /// Caps the number of results.
    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Checks whether an issue passes the filter (ignores `limit`).
    #[must_use]
    pub fn matches(&self, issue: &Issue) -> bool {
        if self.unresolved_only && issue.is_resolved() {
            return false;
        }
        if self.status.is_some_and(|s| s != issue.status) {
            return false;
        }
        if self.min_severity.is_some_and(|s| issue.severity < s) {
            return false;
        }
        if self.source.is_some_and(|s| s != issue.source) {
            return false;
        }
        if let Some(subject) = &self.subject_key {
            if subject != &issue.subject_key {
                return false;
            }
        }
        true
    }
}
