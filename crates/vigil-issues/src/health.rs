//! Aggregate counts for health reporting.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{Issue, IssueStatus, Severity};

/// Issue counts by status and severity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSummary {
    /// All stored issues.
    pub total: usize,
    /// Issues not yet resolved.
    pub unresolved: usize,
    /// Unresolved issues at high or critical severity.
    pub urgent: usize,
    /// Count per status; every status is present.
    pub by_status: BTreeMap<String, usize>,
    /// Count of unresolved issues per severity; every severity is present.
    pub by_severity: BTreeMap<String, usize>,
    /// Notification attempts that failed or timed out, across all issues.
    pub failed_dispatches: usize,
}

impl HealthSummary {
    /// Computes a summary over `issues`.
    #[must_use]
    pub fn from_issues<'a>(issues: impl IntoIterator<Item = &'a Issue>) -> Self {
        let mut summary = Self {
            by_status: IssueStatus::ALL
                .iter()
                .map(|s| (s.as_str().to_string(), 0))
                .collect(),
            by_severity: Severity::ALL
                .iter()
                .map(|s| (s.as_str().to_string(), 0))
                .collect(),
            ..Self::default()
        };

        for issue in issues {
            summary.total += 1;
            summary.failed_dispatches += issue.failed_dispatches();
            *summary
                .by_status
                .entry(issue.status.as_str().to_string())
                .or_default() += 1;

            if !issue.is_resolved() {
                summary.unresolved += 1;
                if issue.severity.is_urgent() {
                    summary.urgent += 1;
                }
                *summary
                    .by_severity
                    .entry(issue.severity.as_str().to_string())
                    .or_default() += 1;
            }
        }
        summary
    }

    /// Overall state: `healthy`, `degraded` with unresolved issues, or
    /// `critical` with urgent ones.
    #[must_use]
    pub const fn status(&self) -> &'static str {
        if self.urgent > 0 {
            "critical"
        } else if self.unresolved > 0 {
            "degraded"
        } else {
            "healthy"
        }
    }

    /// Count for one status.
    #[must_use]
    pub fn count_status(&self, status: IssueStatus) -> usize {
        self.by_status.get(status.as_str()).copied().unwrap_or(0)
    }

    /// Count of unresolved issues at one severity.
    #[must_use]
    pub fn count_severity(&self, severity: Severity) -> usize {
        self.by_severity.get(severity.as_str()).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        DispatchOutcome, Event, EventKind, EventSource, FailureClass, NotificationKind,
        NotificationRecord,
    };
    use chrono::Utc;

    fn issue(subject: &str, severity: Severity) -> Issue {
        let event = Event::new(
            EventSource::Deployment,
            subject,
            EventKind::Failure,
            FailureClass::Unknown,
            Utc::now(),
            serde_json::json!({}),
        );
        Issue::open(&event, severity)
    }

    #[test]
    fn empty_summary_is_healthy() {
        let summary = HealthSummary::from_issues(&Vec::<Issue>::new());
        assert_eq!(summary.total, 0);
        assert_eq!(summary.status(), "healthy");
        assert_eq!(summary.by_status.len(), IssueStatus::ALL.len());
        assert_eq!(summary.count_severity(Severity::Critical), 0);
    }

    #[test]
    fn summary_counts() {
        let mut resolved = issue("prod/a", Severity::Critical);
        resolved.resolve(Utc::now());
        let mut notified = issue("prod/b", Severity::Medium);
        notified.status = IssueStatus::Notified;
        let mut record = NotificationRecord::pending("slack", NotificationKind::Initial, Utc::now());
        record.outcome = DispatchOutcome::failed("HTTP 500");
        notified.notification_history.push(record);
        let open = issue("prod/c", Severity::High);

        let issues = vec![resolved, notified, open];
        let summary = HealthSummary::from_issues(&issues);

        assert_eq!(summary.total, 3);
        assert_eq!(summary.unresolved, 2);
        assert_eq!(summary.urgent, 1);
        assert_eq!(summary.failed_dispatches, 1);
        assert_eq!(summary.count_status(IssueStatus::Resolved), 1);
        assert_eq!(summary.count_status(IssueStatus::Notified), 1);
        // Resolved issues do not count toward severity.
        assert_eq!(summary.count_severity(Severity::Critical), 0);
        assert_eq!(summary.count_severity(Severity::High), 1);
        assert_eq!(summary.status(), "critical");
    }
}
