//! Severity classification.
//!
//! [`SeverityRules::classify`] is a pure function of the issue's current
//! severity and occurrence history, the incoming event and an optional
//! [`Analysis`]. The rule table gives a floor; an analysis may push the
//! result above the floor but never below it, and the result never drops
//! below the issue's current severity.

use std::fmt;
use std::sync::Arc;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{IssueError, Result};
use crate::types::{Analysis, Event, EventKind, EventSource, FailureClass, Issue, Severity};

/// Tunables for the rule table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityRules {
    /// Occurrences inside the window that raise the floor by one level.
    pub repeat_threshold: u32,
    /// Sliding window for counting repeats, in seconds.
    pub repeat_window_secs: u64,
}

impl Default for SeverityRules {
    fn default() -> Self {
        Self {
            repeat_threshold: 3,
            repeat_window_secs: 3600,
        }
    }
}

impl SeverityRules {
    /// Longest accepted repeat window: one year.
    pub const MAX_REPEAT_WINDOW_SECS: u64 = 365 * 24 * 60 * 60;

    /// Sets the repeat threshold.
    #[must_use]
    pub const fn with_repeat_threshold(mut self, threshold: u32) -> Self {
        self.repeat_threshold = threshold;
        self
    }

    /// Sets the repeat window.
    #[must_use]
    pub const fn with_repeat_window_secs(mut self, secs: u64) -> Self {
        self.repeat_window_secs = secs;
        self
    }

    /// The repeat window as a chrono duration.
    #[must_use]
    pub fn repeat_window(&self) -> Duration {
        let secs = self.repeat_window_secs.min(Self::MAX_REPEAT_WINDOW_SECS);
        Duration::seconds(secs as i64)
    }

    /// Validates the rules.
    ///
    /// # Errors
    ///
    /// Returns `IssueError::InvalidConfig` if the threshold is zero or exceeds
    /// the number of occurrences an issue retains, or if the window is zero or
    /// longer than a year.
    pub fn validate(&self) -> Result<()> {
        if self.repeat_threshold == 0 {
            return Err(IssueError::InvalidConfig {
                reason: "severity.repeat_threshold must be greater than 0".to_string(),
            });
        }
        if self.repeat_threshold as usize > Issue::MAX_RECENT_OCCURRENCES {
            return Err(IssueError::InvalidConfig {
                reason: format!(
                    "severity.repeat_threshold cannot exceed {}",
                    Issue::MAX_RECENT_OCCURRENCES
                ),
            });
        }
        if self.repeat_window_secs == 0 {
            return Err(IssueError::InvalidConfig {
                reason: "severity.repeat_window_secs must be greater than 0".to_string(),
            });
        }
        if self.repeat_window_secs > Self::MAX_REPEAT_WINDOW_SECS {
            return Err(IssueError::InvalidConfig {
                reason: format!(
                    "severity.repeat_window_secs cannot exceed {}",
                    Self::MAX_REPEAT_WINDOW_SECS
                ),
            });
        }
        Ok(())
    }

    /// Static baseline for an event, ignoring history.
    #[must_use]
    pub const fn baseline(source: EventSource, kind: EventKind, class: FailureClass) -> Severity {
        match (source, kind, class) {
            (_, EventKind::Recovery, _) => Severity::Low,
            (_, EventKind::Degradation, FailureClass::Slow) => Severity::Low,
            (EventSource::Deployment, EventKind::Failure, FailureClass::CrashLoop)
            | (EventSource::Deployment, EventKind::Failure, FailureClass::Unavailable) => {
                Severity::Critical
            }
            (EventSource::Deployment, EventKind::Failure, _) => Severity::High,
            (EventSource::Deployment, EventKind::Degradation, _) => Severity::Medium,
            (EventSource::Pipeline, EventKind::Failure, FailureClass::SecurityScan) => {
                Severity::High
            }
            (EventSource::Pipeline, EventKind::Failure, _) => Severity::Medium,
            (EventSource::Pipeline, EventKind::Degradation, _) => Severity::Low,
        }
    }

    /// The rule-table floor for an event given the issue's history.
    ///
    /// `issue` should already include `event` in its occurrence history.
    #[must_use]
    pub fn floor(&self, issue: &Issue, event: &Event) -> Severity {
        let base = Self::baseline(event.source, event.kind, event.class);
        if event.kind.is_recovery() {
            return base;
        }

        let repeats = issue.occurrences_within(self.repeat_window(), event.timestamp);
        if repeats >= self.repeat_threshold as usize {
            base.raised()
        } else {
            base
        }
    }

    /// Classifies the issue after `event` has been applied to it.
    #[must_use]
    pub fn classify(&self, issue: &Issue, event: &Event, analysis: Option<&Analysis>) -> Severity {
        let floor = self.floor(issue, event);
        let suggested = analysis.and_then(|a| a.severity).unwrap_or(Severity::Low);
        issue.severity.max(floor).max(suggested)
    }
}

/// Produces optional analyses for issues.
///
/// Implementations typically wrap an LLM call; failures should yield `None`
/// so that lifecycle handling never depends on the analyzer.
pub trait AnalysisProvider: Send + Sync + fmt::Debug {
    /// Returns the name of this provider.
    fn name(&self) -> &str;

    /// Analyzes an issue in light of its newest event.
    fn analyze(&self, issue: &Issue, event: &Event) -> Option<Analysis>;
}

/// A provider that never produces an analysis.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAnalysis;

impl AnalysisProvider for NoAnalysis {
    fn name(&self) -> &str {
        "none"
    }

    fn analyze(&self, _issue: &Issue, _event: &Event) -> Option<Analysis> {
        None
    }
}

type AnalyzeFn = dyn Fn(&Issue, &Event) -> Option<Analysis> + Send + Sync;

/// Adapts a closure into an [`AnalysisProvider`].
#[derive(Clone)]
pub struct FnAnalysis {
    name: String,
    func: Arc<AnalyzeFn>,
}

impl FnAnalysis {
    /// Wraps `func` under the given name.
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Issue, &Event) -> Option<Analysis> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }
}

impl fmt::Debug for FnAnalysis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnAnalysis").field("name", &self.name).finish_non_exhaustive()
    }
}

impl AnalysisProvider for FnAnalysis {
    fn name(&self) -> &str {
        &self.name
    }

    fn analyze(&self, issue: &Issue, event: &Event) -> Option<Analysis> {
        (self.func)(issue, event)
    }
}

/// Extracts a severity from free-form model output.
///
/// Accepts bare words (`"High"`), labelled answers (`"Severity: critical"`)
/// and answers with trailing punctuation. When several levels are
/// mentioned the first one wins; nothing recognizable yields `None`.
#[must_use]
pub fn parse_severity_suggestion(text: &str) -> Option<Severity> {
    text.split(|c: char| !c.is_ascii_alphabetic())
        .filter(|word| !word.is_empty())
        .find_map(|word| word.parse::<Severity>().ok())
}
