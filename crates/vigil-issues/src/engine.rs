//! The issue engine.
//!
//! This module provides the [`IssueEngine`], the entry point that turns raw
//! monitoring records into issues and drives each issue through the
//! escalation state machine.
//!
//! Every notification is dispatched in two steps. First the transition and
//! a `pending` history entry per channel are written to the store. Then,
//! with no store lock held, each channel is dispatched and the outcomes are
//! written back. A slow or failing channel therefore never blocks ingestion,
//! and a failed attempt stays visible in the issue's history until the next
//! reminder cycle tries again.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::channels::{Dispatcher, NotificationMessage};
use crate::error::{IssueError, Result};
use crate::escalation::{EscalationPolicy, Routing, Transition, record_resolution};
use crate::health::HealthSummary;
use crate::matcher::{DEFAULT_MAX_CONFLICT_RETRIES, IssueMatcher, MatchOutcome};
use crate::normalizer;
use crate::severity::{AnalysisProvider, SeverityRules};
use crate::store::{IssueStore, update_with_retry};
use crate::types::{
    Analysis, DispatchOutcome, Event, EventSource, Issue, IssueFilter, NotificationKind,
    NotificationRecord,
};

/// Configuration for the issue engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Severity rule tunables.
    pub severity: SeverityRules,
    /// When to notify, escalate and remind.
    pub escalation: EscalationPolicy,
    /// Which channels get which notifications.
    pub routing: Routing,
    /// Attempts per store mutation before giving up on a contended issue.
    pub max_conflict_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            severity: SeverityRules::default(),
            escalation: EscalationPolicy::default(),
            routing: Routing::default(),
            max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
        }
    }
}

impl EngineConfig {
    /// Sets the severity rules.
    #[must_use]
    pub const fn with_severity(mut self, severity: SeverityRules) -> Self {
        self.severity = severity;
        self
    }

    /// Sets the escalation policy.
    #[must_use]
    pub fn with_escalation(mut self, escalation: EscalationPolicy) -> Self {
        self.escalation = escalation;
        self
    }

    /// Sets the routing.
    #[must_use]
    pub fn with_routing(mut self, routing: Routing) -> Self {
        self.routing = routing;
        self
    }

    /// Sets the conflict retry bound.
    #[must_use]
    pub const fn with_max_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    /// Validates every section.
    ///
    /// # Errors
    ///
    /// Returns `IssueError::InvalidConfig` describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        self.severity.validate()?;
        self.escalation.validate()?;
        self.routing.validate()?;
        if self.max_conflict_retries == 0 {
            return Err(IssueError::InvalidConfig {
                reason: "store.max_conflict_retries must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}

/// What one notification round did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    /// The issue notified about.
    pub issue_id: String,
    /// Why.
    pub kind: NotificationKind,
    /// Channels that accepted the message.
    pub delivered: usize,
    /// Channels that failed or timed out.
    pub failed: usize,
}

/// What processing one event did.
#[derive(Debug, Clone, PartialEq)]
pub struct EventReport {
    /// How the event matched.
    pub outcome: MatchOutcome,
    /// Notifications sent as a consequence.
    pub notifications: Vec<DispatchReport>,
}

/// What one periodic evaluation pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Unresolved issues looked at.
    pub evaluated: usize,
    /// Notifications sent.
    pub notifications: Vec<DispatchReport>,
    /// Issues whose evaluation failed.
    pub errors: usize,
}

/// Turns events into issues and notifications.
#[derive(Debug)]
pub struct IssueEngine {
    config: EngineConfig,
    store: Arc<dyn IssueStore>,
    matcher: IssueMatcher,
    dispatcher: Arc<dyn Dispatcher>,
}

impl IssueEngine {
    /// Creates an engine over a store and a dispatcher.
    ///
    /// # Errors
    ///
    /// Returns `IssueError::InvalidConfig` if the configuration is invalid.
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn IssueStore>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Result<Self> {
        config.validate()?;
        let matcher = IssueMatcher::new(Arc::clone(&store))
            .with_rules(config.severity)
            .with_max_attempts(config.max_conflict_retries);

        Ok(Self {
            config,
            store,
            matcher,
            dispatcher,
        })
    }

    /// Installs an analysis provider consulted on every matched event.
    #[must_use]
    pub fn with_analyzer(mut self, analyzer: Arc<dyn AnalysisProvider>) -> Self {
        self.matcher = self.matcher.with_analyzer(analyzer);
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn IssueStore> {
        &self.store
    }

    // ============ Ingestion ============

    /// Normalizes and processes a raw monitoring record.
    ///
    /// # Errors
    ///
    /// Returns `IssueError::MalformedInput` for records that cannot be
    /// normalized; the caller should discard or quarantine them. Store
    /// failures surface as their own errors.
    pub fn submit_event(&self, raw: &Value, source: EventSource) -> Result<EventReport> {
        self.submit_event_at(raw, source, Utc::now())
    }

    /// Like [`submit_event`](Self::submit_event) with an explicit clock.
    ///
    /// # Errors
    ///
    /// See [`submit_event`](Self::submit_event).
    pub fn submit_event_at(
        &self,
        raw: &Value,
        source: EventSource,
        now: DateTime<Utc>,
    ) -> Result<EventReport> {
        let event = normalizer::normalize_at(raw, source, now).inspect_err(|e| {
            warn!(source = %source, error = %e, "discarding malformed record");
        })?;
        self.process_event(&event, now)
    }

    /// Matches an event and runs any escalation it triggers.
    ///
    /// Escalation problems are logged, not returned: the event itself has
    /// been recorded and the next [`tick`](Self::tick) picks the issue up.
    ///
    /// # Errors
    ///
    /// Returns an error if the event could not be recorded, including
    /// `IssueError::RetriesExhausted` under persistent contention.
    pub fn process_event(&self, event: &Event, now: DateTime<Utc>) -> Result<EventReport> {
        let outcome = self.matcher.match_event(event)?;
        debug!(
            signature = %event.signature,
            subject = %event.subject_key,
            kind = %event.kind,
            outcome = %outcome,
            "event processed"
        );

        let mut notifications = Vec::new();
        match &outcome {
            MatchOutcome::Created(issue) | MatchOutcome::Recurred(issue) => {
                match self.evaluate(&issue.id, now) {
                    Ok(Some(report)) => notifications.push(report),
                    Ok(None) => {}
                    Err(e) => warn!(issue_id = %issue.id, error = %e, "escalation deferred"),
                }
            }
            MatchOutcome::Resolved(issues) => {
                for issue in issues {
                    match self.announce_resolution(&issue.id, now) {
                        Ok(Some(report)) => notifications.push(report),
                        Ok(None) => {}
                        Err(e) => warn!(issue_id = %issue.id, error = %e, "resolution notice failed"),
                    }
                }
            }
            MatchOutcome::Ignored => {}
        }

        Ok(EventReport {
            outcome,
            notifications,
        })
    }

    // ============ Escalation ============

    /// Runs the transition due for one issue at `now`, if any.
    ///
    /// Calling this repeatedly at the same point in time is idempotent.
    ///
    /// # Errors
    ///
    /// Returns `IssueError::IssueNotFound` for unknown IDs and
    /// `IssueError::RetriesExhausted` under persistent contention.
    pub fn evaluate(&self, issue_id: &str, now: DateTime<Utc>) -> Result<Option<DispatchReport>> {
        let policy = &self.config.escalation;
        let routing = &self.config.routing;

        let planned = update_with_retry(
            self.store.as_ref(),
            issue_id,
            self.config.max_conflict_retries,
            |issue| {
                let transition = policy.plan(issue, now)?;
                let channels = routing
                    .channels_for(issue.severity, transition.notification_kind())
                    .to_vec();
                let records = transition.apply(issue, &channels, now);
                Some((transition, records))
            },
        )?;

        let Some((issue, (transition, records))) = planned else {
            return Ok(None);
        };

        info!(
            issue_id = %issue.id,
            transition = %transition,
            status = %issue.status,
            severity = %issue.severity,
            occurrences = issue.occurrence_count,
            channels = records.len(),
            "escalation transition"
        );

        let message = NotificationMessage::from_issue(&issue, transition.notification_kind());
        Ok(Some(self.deliver(&issue.id, &message, &records)))
    }

    /// Evaluates every unresolved issue.
    ///
    /// A failure on one issue is counted and logged; the others still run.
    ///
    /// # Errors
    ///
    /// Returns an error only if the unresolved issues cannot be listed.
    pub fn tick(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let issues = self.store.unresolved()?;
        let mut report = TickReport {
            evaluated: issues.len(),
            ..TickReport::default()
        };

        for issue in issues {
            match self.evaluate(&issue.id, now) {
                Ok(Some(dispatch)) => report.notifications.push(dispatch),
                Ok(None) => {}
                // Resolved or purged since listing.
                Err(IssueError::IssueNotFound { .. }) => {}
                Err(e) => {
                    warn!(issue_id = %issue.id, error = %e, "evaluation failed");
                    report.errors += 1;
                }
            }
        }

        debug!(
            evaluated = report.evaluated,
            notified = report.notifications.len(),
            errors = report.errors,
            "tick complete"
        );
        Ok(report)
    }

    // ============ Issue Actions ============

    /// Resolves an issue by hand.
    ///
    /// Resolving an already resolved issue changes nothing.
    ///
    /// # Errors
    ///
    /// Returns `IssueError::IssueNotFound` for unknown IDs.
    pub fn resolve(&self, issue_id: &str, now: DateTime<Utc>) -> Result<Issue> {
        let resolved = update_with_retry(
            self.store.as_ref(),
            issue_id,
            self.config.max_conflict_retries,
            |issue| issue.resolve(now).then_some(()),
        )?;

        if resolved.is_none() {
            debug!(issue_id, "issue already resolved");
            return self.get_issue(issue_id);
        }

        info!(issue_id, "issue resolved manually");
        if let Err(e) = self.announce_resolution(issue_id, now) {
            warn!(issue_id, error = %e, "resolution notice failed");
        }
        self.get_issue(issue_id)
    }

    /// Attaches or replaces an issue's analysis and runs any escalation a
    /// raised severity triggers.
    ///
    /// A suggested severity can only raise the issue's severity.
    ///
    /// # Errors
    ///
    /// Returns `IssueError::IssueNotFound` for unknown IDs.
    pub fn annotate(&self, issue_id: &str, analysis: Analysis, now: DateTime<Utc>) -> Result<Issue> {
        let updated = update_with_retry(
            self.store.as_ref(),
            issue_id,
            self.config.max_conflict_retries,
            |issue| {
                if let Some(suggested) = analysis.severity {
                    if !issue.is_resolved() {
                        issue.raise_severity(suggested);
                    }
                }
                issue.analysis = Some(analysis.clone());
                Some(())
            },
        )?;

        if let Some((issue, ())) = updated {
            info!(issue_id = %issue.id, severity = %issue.severity, "analysis attached");
            if let Err(e) = self.evaluate(issue_id, now) {
                warn!(issue_id, error = %e, "escalation deferred");
            }
        }
        self.get_issue(issue_id)
    }

    fn announce_resolution(&self, issue_id: &str, now: DateTime<Utc>) -> Result<Option<DispatchReport>> {
        if !self.config.escalation.notify_on_resolve {
            return Ok(None);
        }

        let recorded = update_with_retry(
            self.store.as_ref(),
            issue_id,
            self.config.max_conflict_retries,
            |issue| {
                let records = record_resolution(issue, now);
                (!records.is_empty()).then_some(records)
            },
        )?;

        let Some((issue, records)) = recorded else {
            return Ok(None);
        };
        let message = NotificationMessage::from_issue(&issue, NotificationKind::Resolution);
        Ok(Some(self.deliver(&issue.id, &message, &records)))
    }

    fn deliver(
        &self,
        issue_id: &str,
        message: &NotificationMessage,
        records: &[NotificationRecord],
    ) -> DispatchReport {
        let outcomes: Vec<(String, DispatchOutcome)> = records
            .iter()
            .map(|record| {
                let outcome = self.dispatcher.dispatch(&record.channel, message);
                (record.id.clone(), outcome)
            })
            .collect();

        let failed = outcomes.iter().filter(|(_, o)| o.is_failure()).count();
        let report = DispatchReport {
            issue_id: issue_id.to_string(),
            kind: message.kind,
            delivered: outcomes.len() - failed,
            failed,
        };

        let written = update_with_retry(
            self.store.as_ref(),
            issue_id,
            self.config.max_conflict_retries,
            |issue| {
                for (record_id, outcome) in &outcomes {
                    if let Some(record) = issue.notification_mut(record_id) {
                        record.outcome = outcome.clone();
                    }
                }
                Some(())
            },
        );
        if let Err(e) = written {
            warn!(issue_id, error = %e, "could not record dispatch outcomes");
        }

        if failed > 0 {
            warn!(issue_id, kind = %message.kind, failed, "some notifications were not delivered");
        }
        report
    }

    // ============ Queries ============

    /// Gets an issue by ID.
    ///
    /// # Errors
    ///
    /// Returns `IssueError::IssueNotFound` for unknown IDs.
    pub fn get_issue(&self, issue_id: &str) -> Result<Issue> {
        self.store
            .get(issue_id)?
            .ok_or_else(|| IssueError::IssueNotFound {
                id: issue_id.to_string(),
            })
    }

    /// Lists issues matching a filter, most recently seen first.
    ///
    /// # Errors
    ///
    /// Returns any store error.
    pub fn list_issues(&self, filter: &IssueFilter) -> Result<Vec<Issue>> {
        self.store.list(filter)
    }

    /// Counts issues by status and severity.
    ///
    /// # Errors
    ///
    /// Returns any store error.
    pub fn health(&self) -> Result<HealthSummary> {
        let issues = self.store.list(&IssueFilter::new())?;
        Ok(HealthSummary::from_issues(&issues))
    }

    // ============ Retention ============

    /// Deletes issues resolved longer than `retention` ago.
    ///
    /// A retention reaching past the representable time range purges nothing.
    ///
    /// # Errors
    ///
    /// Returns any store error.
    pub fn purge_resolved(&self, retention: Duration, now: DateTime<Utc>) -> Result<usize> {
        let Some(cutoff) = now.checked_sub_signed(retention) else {
            debug!(
                retention_days = retention.num_days(),
                "retention exceeds time range, nothing to purge"
            );
            return Ok(0);
        };
        let purged = self.store.purge_resolved_before(cutoff)?;
        if purged > 0 {
            info!(purged, retention_days = retention.num_days(), "purged resolved issues");
        }
        Ok(purged)
    }

    /// Makes every accepted write durable.
    ///
    /// # Errors
    ///
    /// Returns any store error.
    pub fn flush(&self) -> Result<()> {
        self.store.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{ChannelRegistry, MemoryChannel};
    use crate::store::MemoryIssueStore;
    use crate::types::{IssueStatus, Severity};
    use serde_json::json;

    struct Harness {
        engine: IssueEngine,
        chat: Arc<MemoryChannel>,
        pager: Arc<MemoryChannel>,
    }

    fn harness(policy: EscalationPolicy) -> Harness {
        let registry = ChannelRegistry::new();
        let chat = Arc::new(MemoryChannel::new("chat"));
        let pager = Arc::new(MemoryChannel::new("pager"));
        registry.register(chat.clone());
        registry.register(pager.clone());

        let config = EngineConfig::default()
            .with_escalation(policy)
            .with_routing(Routing::new(vec!["chat".to_string()], vec!["pager".to_string()]));
        let engine = IssueEngine::new(
            config,
            Arc::new(MemoryIssueStore::new()),
            Arc::new(registry),
        )
        .unwrap();

        Harness {
            engine,
            chat,
            pager,
        }
    }

    fn failed_run(at: DateTime<Utc>) -> Value {
        json!({
            "workflow_name": "build",
            "branch": "main",
            "conclusion": "failure",
            "created_at": at.to_rfc3339(),
            "jobs": [{ "name": "unit tests", "conclusion": "failure", "error": "3 tests failed" }],
        })
    }

    fn green_run(at: DateTime<Utc>) -> Value {
        json!({
            "workflow_name": "build",
            "branch": "main",
            "conclusion": "success",
            "created_at": at.to_rfc3339(),
        })
    }

    mod config_tests {
        use super::*;

        #[test]
        fn default_config_is_valid() {
            assert!(EngineConfig::default().validate().is_ok());
        }

        #[test]
        fn zero_retries_is_invalid() {
            let config = EngineConfig::default().with_max_conflict_retries(0);
            assert!(config.validate().is_err());
        }

        #[test]
        fn engine_rejects_invalid_config() {
            let config =
                EngineConfig::default().with_routing(Routing::new(Vec::new(), Vec::new()));
            let result = IssueEngine::new(
                config,
                Arc::new(MemoryIssueStore::new()),
                Arc::new(ChannelRegistry::new()),
            );
            assert!(result.is_err());
        }
    }

    mod ingestion_tests {
        use super::*;

        #[test]
        fn malformed_record_is_rejected() {
            let h = harness(EscalationPolicy::default());
            let err = h
                .engine
                .submit_event(&json!({ "conclusion": "failure" }), EventSource::Pipeline)
                .unwrap_err();
            assert!(matches!(err, IssueError::MalformedInput { .. }));
            assert!(h.engine.list_issues(&IssueFilter::new()).unwrap().is_empty());
        }

        #[test]
        fn threshold_notifies_once() {
            let h = harness(EscalationPolicy::default());
            let now = Utc::now();

            for i in 0..3 {
                let at = now + Duration::seconds(i);
                h.engine.submit_event_at(&failed_run(at), EventSource::Pipeline, at).unwrap();
            }
            let issues = h.engine.list_issues(&IssueFilter::new()).unwrap();
            assert_eq!(issues.len(), 1);
            assert_eq!(issues[0].status, IssueStatus::Notified);

            // Re-evaluating at the same instant does nothing.
            assert!(h.engine.evaluate(&issues[0].id, now + Duration::seconds(2)).unwrap().is_none());
            // Third occurrence raised severity to high, so the notice went to the urgent route.
            assert_eq!(h.pager.count(), 1);
            assert_eq!(h.chat.count(), 0);
        }

        #[test]
        fn notify_on_create_uses_standard_route() {
            let h = harness(EscalationPolicy::default().with_notify_on_create(true));
            let now = Utc::now();
            let report = h
                .engine
                .submit_event_at(&failed_run(now), EventSource::Pipeline, now)
                .unwrap();

            assert_eq!(report.notifications.len(), 1);
            assert_eq!(report.notifications[0].kind, NotificationKind::Initial);
            assert_eq!(h.chat.count(), 1);
        }

        #[test]
        fn recovery_announces_resolution_to_notified_channels() {
            let h = harness(EscalationPolicy::default().with_notify_on_create(true));
            let now = Utc::now();
            h.engine.submit_event_at(&failed_run(now), EventSource::Pipeline, now).unwrap();

            let later = now + Duration::minutes(1);
            let report = h
                .engine
                .submit_event_at(&green_run(later), EventSource::Pipeline, later)
                .unwrap();

            assert_eq!(report.outcome.as_str(), "resolved");
            assert_eq!(h.chat.count_kind(NotificationKind::Resolution), 1);
            let issue = &report.outcome.issues()[0];
            assert_eq!(h.engine.get_issue(&issue.id).unwrap().status, IssueStatus::Resolved);
        }

        #[test]
        fn silent_resolution_for_unnotified_issue() {
            let h = harness(EscalationPolicy::default());
            let now = Utc::now();
            h.engine.submit_event_at(&failed_run(now), EventSource::Pipeline, now).unwrap();
            let report = h
                .engine
                .submit_event_at(&green_run(now), EventSource::Pipeline, now)
                .unwrap();

            assert!(report.notifications.is_empty());
            assert_eq!(h.chat.count() + h.pager.count(), 0);
        }
    }

    mod dispatch_tests {
        use super::*;

        #[test]
        fn failed_dispatch_is_recorded_and_retried_next_cycle() {
            let h = harness(EscalationPolicy::default().with_notify_on_create(true));
            h.chat.fail_with("HTTP 503");
            let now = Utc::now();

            let report = h
                .engine
                .submit_event_at(&failed_run(now), EventSource::Pipeline, now)
                .unwrap();
            assert_eq!(report.notifications[0].failed, 1);

            let id = report.outcome.issue().unwrap().id.clone();
            let issue = h.engine.get_issue(&id).unwrap();
            assert_eq!(issue.status, IssueStatus::Notified);
            assert_eq!(issue.failed_dispatches(), 1);
            assert_eq!(
                issue.notification_history[0].outcome,
                DispatchOutcome::failed("HTTP 503")
            );

            // No tight retry loop.
            let tick = h.engine.tick(now + Duration::minutes(5)).unwrap();
            assert!(tick.notifications.is_empty());

            h.chat.recover();
            let tick = h.engine.tick(now + Duration::minutes(10)).unwrap();
            assert_eq!(tick.notifications.len(), 1);
            assert_eq!(tick.notifications[0].kind, NotificationKind::Reminder);
            assert_eq!(h.chat.count_kind(NotificationKind::Reminder), 1);

            let issue = h.engine.get_issue(&id).unwrap();
            assert_eq!(issue.status, IssueStatus::Reminded);
            assert_eq!(issue.notification_history.len(), 2);
        }

        #[test]
        fn unknown_channel_fails_without_blocking_transition() {
            let registry = ChannelRegistry::new();
            let config = EngineConfig::default()
                .with_escalation(EscalationPolicy::default().with_notify_on_create(true))
                .with_routing(Routing::single("missing"));
            let engine = IssueEngine::new(
                config,
                Arc::new(MemoryIssueStore::new()),
                Arc::new(registry),
            )
            .unwrap();

            let now = Utc::now();
            let report = engine
                .submit_event_at(&failed_run(now), EventSource::Pipeline, now)
                .unwrap();
            let issue = engine.get_issue(&report.outcome.issue().unwrap().id).unwrap();
            assert_eq!(issue.status, IssueStatus::Notified);
            assert!(issue.notification_history[0].outcome.is_failure());
        }
    }

    mod action_tests {
        use super::*;

        #[test]
        fn manual_resolve_is_idempotent() {
            let h = harness(EscalationPolicy::default());
            let now = Utc::now();
            let report = h
                .engine
                .submit_event_at(&failed_run(now), EventSource::Pipeline, now)
                .unwrap();
            let id = report.outcome.issue().unwrap().id.clone();

            let resolved = h.engine.resolve(&id, now + Duration::minutes(1)).unwrap();
            assert_eq!(resolved.status, IssueStatus::Resolved);
            let again = h.engine.resolve(&id, now + Duration::minutes(2)).unwrap();
            assert_eq!(again.resolved_at, resolved.resolved_at);
        }

        #[test]
        fn resolve_unknown_issue() {
            let h = harness(EscalationPolicy::default());
            let err = h.engine.resolve("nope", Utc::now()).unwrap_err();
            assert!(matches!(err, IssueError::IssueNotFound { .. }));
        }

        #[test]
        fn annotate_raises_and_notifies() {
            let h = harness(EscalationPolicy::default());
            let now = Utc::now();
            let report = h
                .engine
                .submit_event_at(&failed_run(now), EventSource::Pipeline, now)
                .unwrap();
            let id = report.outcome.issue().unwrap().id.clone();

            let analysis = Analysis::new("Database migration broke fixtures")
                .with_fix("Re-run migrations")
                .with_severity(Severity::Critical);
            let issue = h.engine.annotate(&id, analysis, now).unwrap();

            assert_eq!(issue.severity, Severity::Critical);
            assert_eq!(issue.status, IssueStatus::Notified);
            let sent = h.pager.sent();
            assert_eq!(sent.len(), 1);
            assert_eq!(sent[0].suggested_fixes, vec!["Re-run migrations".to_string()]);
        }

        #[test]
        fn annotate_never_lowers() {
            let h = harness(EscalationPolicy::default());
            let now = Utc::now();
            let report = h
                .engine
                .submit_event_at(&failed_run(now), EventSource::Pipeline, now)
                .unwrap();
            let id = report.outcome.issue().unwrap().id.clone();

            let issue = h
                .engine
                .annotate(&id, Analysis::new("noise").with_severity(Severity::Low), now)
                .unwrap();
            assert_eq!(issue.severity, Severity::Medium);
            assert_eq!(issue.analysis.unwrap().summary, "noise");
        }

        #[test]
        fn purge_respects_retention() {
            let h = harness(EscalationPolicy::default());
            let now = Utc::now();
            let report = h
                .engine
                .submit_event_at(&failed_run(now), EventSource::Pipeline, now)
                .unwrap();
            let id = report.outcome.issue().unwrap().id.clone();
            h.engine.resolve(&id, now).unwrap();

            assert_eq!(h.engine.purge_resolved(Duration::days(30), now).unwrap(), 0);
            assert_eq!(
                h.engine
                    .purge_resolved(Duration::days(30), now + Duration::days(31))
                    .unwrap(),
                1
            );
        }

        #[test]
        fn purge_with_retention_past_time_range_keeps_everything() {
            let h = harness(EscalationPolicy::default());
            let now = Utc::now();
            let report = h
                .engine
                .submit_event_at(&failed_run(now), EventSource::Pipeline, now)
                .unwrap();
            let id = report.outcome.issue().unwrap().id.clone();
            h.engine.resolve(&id, now).unwrap();

            let retention = Duration::days(i64::from(u32::MAX));
            assert_eq!(h.engine.purge_resolved(retention, now).unwrap(), 0);
            assert_eq!(h.engine.list_issues(&IssueFilter::new()).unwrap().len(), 1);
        }

        #[test]
        fn health_reflects_store() {
            let h = harness(EscalationPolicy::default());
            let now = Utc::now();
            h.engine.submit_event_at(&failed_run(now), EventSource::Pipeline, now).unwrap();

            let health = h.engine.health().unwrap();
            assert_eq!(health.total, 1);
            assert_eq!(health.unresolved, 1);
            assert_eq!(health.count_status(IssueStatus::Open), 1);
            assert_eq!(health.status(), "degraded");
        }
    }
}
