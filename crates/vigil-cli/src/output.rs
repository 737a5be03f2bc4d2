//! Output formatting for CLI commands.
//!
//! Supports table (human-readable) and JSON output formats.

use std::io::Write;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use vigil_issues::{
    HealthSummary, Issue, IssueStatus, Severity, TickReport, VigilConfig,
};

use crate::cli::Format;

/// Output formatter that handles both table and JSON output.
#[derive(Debug, Clone)]
pub struct OutputFormat {
    format: Format,
}

impl OutputFormat {
    /// Create a new output formatter.
    #[must_use]
    pub const fn new(format: Format) -> Self {
        Self { format }
    }

    /// Check if JSON format is selected.
    #[must_use]
    pub const fn is_json(&self) -> bool {
        matches!(self.format, Format::Json)
    }

    /// Write a serializable value to the output.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn write<W, T>(&self, writer: &mut W, value: &T) -> anyhow::Result<()>
    where
        W: Write,
        T: Serialize + TableDisplay,
    {
        match self.format {
            Format::Json => {
                serde_json::to_writer_pretty(&mut *writer, value)
                    .context("JSON serialization failed")?;
                writeln!(writer)?;
            }
            Format::Table => {
                value.write_table(writer)?;
            }
        }
        Ok(())
    }

    /// Write a value to a string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_string<T>(&self, value: &T) -> anyhow::Result<String>
    where
        T: Serialize + TableDisplay,
    {
        let mut buf = Vec::new();
        self.write(&mut buf, value)?;
        String::from_utf8(buf).context("output is not UTF-8")
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self::new(Format::Table)
    }
}

/// Trait for types that can be displayed as a table.
pub trait TableDisplay {
    /// Write the value as a human-readable table.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    fn write_table<W: Write>(&self, writer: &mut W) -> std::io::Result<()>;
}

/// Issues for listing.
#[derive(Debug, Clone, Serialize)]
pub struct IssueList {
    /// Matching issues, most recently seen first.
    pub issues: Vec<Issue>,
}

impl TableDisplay for IssueList {
    fn write_table<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        if self.issues.is_empty() {
            writeln!(writer, "No issues found")?;
            return Ok(());
        }

        writeln!(
            writer,
            "{:<36}  {:<8}  {:<9}  {:>5}  {:<20}  TITLE",
            "ID", "SEVERITY", "STATUS", "COUNT", "LAST SEEN"
        )?;
        writeln!(writer, "{}", "─".repeat(120))?;

        for issue in &self.issues {
            writeln!(
                writer,
                "{:<36}  {} {:<6}  {:<9}  {:>5}  {:<20}  {}",
                issue.id,
                severity_icon(issue.severity),
                issue.severity,
                issue.status,
                issue.occurrence_count,
                timestamp(issue.last_seen),
                truncate(&issue.title, 48)
            )?;
        }

        let unresolved = self.issues.iter().filter(|i| !i.is_resolved()).count();
        writeln!(writer)?;
        writeln!(
            writer,
            "Total: {} issue(s) ({} unresolved)",
            self.issues.len(),
            unresolved
        )?;
        Ok(())
    }
}

impl TableDisplay for Issue {
    fn write_table<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writeln!(writer, "Issue: {}", self.id)?;
        writeln!(writer, "══════════════════════════════════════════════════")?;
        writeln!(writer, "{}", self.title)?;
        writeln!(writer)?;
        writeln!(writer, "General")?;
        writeln!(writer, "  Source:         {}", self.source)?;
        writeln!(writer, "  Subject:        {}", self.subject_key)?;
        writeln!(writer, "  Severity:       {} {}", severity_icon(self.severity), self.severity)?;
        writeln!(writer, "  Status:         {}", self.status)?;
        writeln!(writer, "  Occurrences:    {}", self.occurrence_count)?;
        writeln!(writer, "  First Seen:     {}", timestamp(self.first_seen))?;
        writeln!(writer, "  Last Seen:      {}", timestamp(self.last_seen))?;
        if let Some(resolved) = self.resolved_at {
            writeln!(writer, "  Resolved:       {}", timestamp(resolved))?;
        }
        writeln!(writer, "  Signature:      {}", truncate(&self.signature, 16))?;
        writeln!(writer)?;

        match &self.analysis {
            Some(analysis) => {
                writeln!(writer, "Analysis")?;
                writeln!(writer, "  {}", analysis.summary)?;
                for fix in &analysis.suggested_fixes {
                    writeln!(writer, "  - {fix}")?;
                }
                if let Some(severity) = analysis.severity {
                    writeln!(writer, "  Suggested severity: {severity}")?;
                }
            }
            None => writeln!(writer, "Analysis: None")?,
        }
        writeln!(writer)?;

        if self.notification_history.is_empty() {
            writeln!(writer, "Notifications: None")?;
        } else {
            writeln!(writer, "Notifications ({}):", self.notification_history.len())?;
            for record in &self.notification_history {
                writeln!(
                    writer,
                    "  {}  {:<10}  {:<12}  {}",
                    timestamp(record.timestamp),
                    record.kind,
                    record.channel,
                    record.outcome
                )?;
            }
        }
        Ok(())
    }
}

impl TableDisplay for HealthSummary {
    fn write_table<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        let icon = match self.status() {
            "critical" => "🔴",
            "degraded" => "🟡",
            _ => "🟢",
        };
        writeln!(writer, "Vigil Health: {icon} {}", self.status())?;
        writeln!(writer, "══════════════════════════════════")?;
        writeln!(writer, "Issues")?;
        writeln!(writer, "  Total:          {}", self.total)?;
        writeln!(writer, "  Unresolved:     {}", self.unresolved)?;
        writeln!(writer, "  Urgent:         {}", self.urgent)?;
        writeln!(writer)?;
        writeln!(writer, "By Status")?;
        for status in IssueStatus::ALL {
            writeln!(writer, "  {:<16}{}", format!("{status}:"), self.count_status(status))?;
        }
        writeln!(writer)?;
        writeln!(writer, "Unresolved By Severity")?;
        for severity in Severity::ALL.iter().rev() {
            writeln!(
                writer,
                "  {:<16}{}",
                format!("{severity}:"),
                self.count_severity(*severity)
            )?;
        }
        writeln!(writer)?;
        writeln!(writer, "Failed Dispatches: {}", self.failed_dispatches)?;
        Ok(())
    }
}

impl TableDisplay for TickReport {
    fn write_table<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writeln!(
            writer,
            "Evaluated {} issue(s): {} notification round(s), {} error(s)",
            self.evaluated,
            self.notifications.len(),
            self.errors
        )?;
        for round in &self.notifications {
            writeln!(
                writer,
                "  {}  {:<10}  {} delivered, {} failed",
                round.issue_id, round.kind, round.delivered, round.failed
            )?;
        }
        Ok(())
    }
}

/// Result of ingesting one record.
#[derive(Debug, Clone, Serialize)]
pub struct IngestResult {
    /// Position in the input.
    pub index: usize,
    /// `created`, `recurred`, `resolved`, `ignored` or `rejected`.
    pub outcome: String,
    /// Issues touched.
    pub issue_ids: Vec<String>,
    /// Notification rounds triggered.
    pub notifications: usize,
    /// Why the record was rejected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of an ingest run.
#[derive(Debug, Clone, Serialize)]
pub struct IngestSummary {
    /// One entry per input record.
    pub results: Vec<IngestResult>,
}

impl IngestSummary {
    /// Records that failed.
    #[must_use]
    pub fn rejected(&self) -> usize {
        self.results.iter().filter(|r| r.error.is_some()).count()
    }
}

impl TableDisplay for IngestSummary {
    fn write_table<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        for result in &self.results {
            match &result.error {
                Some(error) => writeln!(writer, "✗ [{}] rejected: {error}", result.index)?,
                None => writeln!(
                    writer,
                    "✓ [{}] {} {}",
                    result.index,
                    result.outcome,
                    result.issue_ids.join(", ")
                )?,
            }
        }
        writeln!(writer)?;
        writeln!(
            writer,
            "Total: {} record(s), {} rejected",
            self.results.len(),
            self.rejected()
        )?;
        Ok(())
    }
}

/// Result of one watch cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleSummary {
    /// Events collected from the monitors.
    pub events: usize,
    /// Events that failed processing.
    pub failed_events: usize,
    /// The escalation pass.
    pub tick: TickReport,
}

impl TableDisplay for CycleSummary {
    fn write_table<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writeln!(
            writer,
            "Processed {} event(s), {} failed",
            self.events, self.failed_events
        )?;
        self.tick.write_table(writer)
    }
}

/// Result of a purge.
#[derive(Debug, Clone, Serialize)]
pub struct PurgeSummary {
    /// Issues deleted.
    pub purged: usize,
    /// Retention applied.
    pub retention_days: u32,
}

impl TableDisplay for PurgeSummary {
    fn write_table<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writeln!(
            writer,
            "✓ Purged {} issue(s) resolved more than {} day(s) ago",
            self.purged, self.retention_days
        )
    }
}

impl TableDisplay for VigilConfig {
    fn write_table<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writeln!(writer, "✓ Configuration is valid")?;
        writeln!(writer)?;
        writeln!(writer, "Monitoring")?;
        writeln!(writer, "  Interval:       {}s", self.monitoring.check_interval_secs)?;
        writeln!(writer, "  Retention:      {} day(s)", self.monitoring.retention_days)?;
        writeln!(writer)?;
        writeln!(writer, "Escalation")?;
        writeln!(writer, "  Alert at:       {} occurrence(s) or {}", self.escalation.alert_threshold, self.escalation.alert_severity)?;
        writeln!(writer, "  Escalate at:    {}x threshold", self.escalation.escalation_multiple)?;
        writeln!(writer, "  Remind every:   {}s", self.escalation.reminder_interval_secs)?;
        writeln!(writer)?;
        writeln!(writer, "Routing")?;
        writeln!(writer, "  Standard:       {}", self.routing.standard.join(", "))?;
        writeln!(writer, "  Urgent:         {}", self.routing.urgent.join(", "))?;
        Ok(())
    }
}

fn severity_icon(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "🔴",
        Severity::High => "🟠",
        Severity::Medium => "🟡",
        Severity::Low => "⚪",
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}
