//! Event-to-issue matching.
//!
//! The matcher is where deduplication happens: an event either recurs an
//! unresolved issue with the same signature, opens a new one, or, for
//! recoveries, resolves whatever is open for the same subject.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::{IssueError, Result};
use crate::severity::{AnalysisProvider, NoAnalysis, SeverityRules};
use crate::store::{IssueStore, update_with_retry};
use crate::types::{Event, Issue};

/// Default number of attempts before a contended event is given up on.
pub const DEFAULT_MAX_CONFLICT_RETRIES: u32 = 5;

/// What matching an event did.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    /// A new issue was opened.
    Created(Issue),
    /// An unresolved issue matched and was updated.
    Recurred(Issue),
    /// A recovery resolved these issues.
    Resolved(Vec<Issue>),
    /// A recovery arrived with nothing open for its subject.
    Ignored,
}

impl MatchOutcome {
    /// Returns the outcome as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Created(_) => "created",
            Self::Recurred(_) => "recurred",
            Self::Resolved(_) => "resolved",
            Self::Ignored => "ignored",
        }
    }

    /// The issues touched by this outcome.
    #[must_use]
    pub fn issues(&self) -> &[Issue] {
        match self {
            Self::Created(issue) | Self::Recurred(issue) => std::slice::from_ref(issue),
            Self::Resolved(issues) => issues,
            Self::Ignored => &[],
        }
    }

    /// The single issue created or updated, if any.
    #[must_use]
    pub const fn issue(&self) -> Option<&Issue> {
        match self {
            Self::Created(issue) | Self::Recurred(issue) => Some(issue),
            Self::Resolved(_) | Self::Ignored => None,
        }
    }
}

impl fmt::Display for MatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Matches events against the issue store.
#[derive(Debug, Clone)]
pub struct IssueMatcher {
    store: Arc<dyn IssueStore>,
    rules: SeverityRules,
    analyzer: Arc<dyn AnalysisProvider>,
    max_attempts: u32,
}

impl IssueMatcher {
    /// Creates a matcher with default rules and no analysis.
    #[must_use]
    pub fn new(store: Arc<dyn IssueStore>) -> Self {
        Self {
            store,
            rules: SeverityRules::default(),
            analyzer: Arc::new(NoAnalysis),
            max_attempts: DEFAULT_MAX_CONFLICT_RETRIES,
        }
    }

    /// Sets the severity rules.
    #[must_use]
    pub const fn with_rules(mut self, rules: SeverityRules) -> Self {
        self.rules = rules;
        self
    }

    /// Sets the analysis provider.
    #[must_use]
    pub fn with_analyzer(mut self, analyzer: Arc<dyn AnalysisProvider>) -> Self {
        self.analyzer = analyzer;
        self
    }

    /// Sets how many attempts a contended event gets.
    #[must_use]
    pub const fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Returns the severity rules.
    #[must_use]
    pub const fn rules(&self) -> &SeverityRules {
        &self.rules
    }

    /// Returns the attempt bound.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Applies an event to the store.
    ///
    /// # Errors
    ///
    /// Returns `IssueError::RetriesExhausted` if concurrent writers kept
    /// winning, or any store error.
    pub fn match_event(&self, event: &Event) -> Result<MatchOutcome> {
        if event.kind.is_recovery() {
            return self.resolve_subject(event);
        }

        let attempts = self.max_attempts.max(1);
        for attempt in 1..=attempts {
            match self.try_record(event) {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_conflict() => {
                    debug!(signature = %event.signature, attempt, "conflict while matching event, retrying");
                }
                Err(e) => return Err(e),
            }
        }

        Err(IssueError::RetriesExhausted {
            signature: event.signature.clone(),
            attempts,
        })
    }

    fn try_record(&self, event: &Event) -> Result<MatchOutcome> {
        if let Some(mut issue) = self.store.find_open(&event.signature)? {
            issue.record_occurrence(event.timestamp);
            self.attach_analysis(&mut issue, event);
            let severity = self.rules.classify(&issue, event, issue.analysis.as_ref());
            let raised = issue.raise_severity(severity);

            let stored = self.store.update(issue)?;
            debug!(
                issue_id = %stored.id,
                occurrences = stored.occurrence_count,
                severity = %stored.severity,
                raised,
                "event matched open issue"
            );
            return Ok(MatchOutcome::Recurred(stored));
        }

        let baseline = SeverityRules::baseline(event.source, event.kind, event.class);
        let mut issue = Issue::open(event, baseline);
        self.attach_analysis(&mut issue, event);
        issue.severity = self.rules.classify(&issue, event, issue.analysis.as_ref());

        let stored = self.store.insert(issue)?;
        info!(
            issue_id = %stored.id,
            subject = %stored.subject_key,
            severity = %stored.severity,
            title = %stored.title,
            "opened issue"
        );
        Ok(MatchOutcome::Created(stored))
    }

    fn attach_analysis(&self, issue: &mut Issue, event: &Event) {
        if let Some(analysis) = self.analyzer.analyze(issue, event) {
            debug!(issue_id = %issue.id, provider = %self.analyzer.name(), "analysis attached");
            issue.analysis = Some(analysis);
        }
    }

    fn resolve_subject(&self, event: &Event) -> Result<MatchOutcome> {
        let open = self
            .store
            .find_open_by_subject(event.source, &event.subject_key)?;
        if open.is_empty() {
            debug!(subject = %event.subject_key, "recovery with nothing open");
            return Ok(MatchOutcome::Ignored);
        }

        let mut resolved = Vec::with_capacity(open.len());
        for candidate in open {
            let updated = update_with_retry(
                self.store.as_ref(),
                &candidate.id,
                self.max_attempts,
                |issue| issue.resolve(event.timestamp).then_some(()),
            )?;

            if let Some((issue, ())) = updated {
                info!(
                    issue_id = %issue.id,
                    subject = %issue.subject_key,
                    occurrences = issue.occurrence_count,
                    "issue resolved by recovery"
                );
                resolved.push(issue);
            }
        }

        if resolved.is_empty() {
            Ok(MatchOutcome::Ignored)
        } else {
            Ok(MatchOutcome::Resolved(resolved))
        }
    }
}
