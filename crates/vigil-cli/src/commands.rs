//! Command implementations.
//!
//! Every command runs synchronously against an [`App`]: the loaded
//! configuration, the issue engine over the on-disk store and the
//! configured monitors.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use chrono::{Duration, Utc};
use serde_json::Value;
use tracing::{info, warn};
use vigil_issues::{
    Analysis, DeploymentMonitor, EventProducer, EventSource, IssueEngine, IssueFilter,
    JsonIssueStore, PipelineMonitor, VigilConfig,
};

use crate::cli::{AnnotateArgs, ListArgs};
use crate::output::{
    CycleSummary, IngestResult, IngestSummary, IssueList, OutputFormat, PurgeSummary,
};

/// State directory used when neither the flag nor the config names one.
pub const DEFAULT_STATE_DIR: &str = ".vigil";

/// Loads the configuration file, or defaults when none is given.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is invalid.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<VigilConfig> {
    match path {
        Some(path) => VigilConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display())),
        None => Ok(VigilConfig::default()),
    }
}

/// Everything a command needs.
#[derive(Debug)]
pub struct App {
    config: VigilConfig,
    engine: Arc<IssueEngine>,
    monitors: Vec<Box<dyn EventProducer>>,
}

impl App {
    /// Opens the store and builds the engine and monitors.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened or a channel cannot be
    /// built.
    pub fn open(config: VigilConfig, state_dir: Option<PathBuf>) -> anyhow::Result<Self> {
        let state_dir = state_dir
            .or_else(|| config.store.state_dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR));

        let store = JsonIssueStore::open(&state_dir)
            .with_context(|| format!("opening issue store in {}", state_dir.display()))?;
        let registry = config.build_channels().context("building channels")?;
        let engine = IssueEngine::new(config.engine_config(), Arc::new(store), Arc::new(registry))?;

        let mut monitors: Vec<Box<dyn EventProducer>> = Vec::new();
        if let Some(dir) = &config.monitoring.pipeline_spool {
            monitors.push(Box::new(PipelineMonitor::new(dir)));
        }
        if let Some(dir) = &config.monitoring.deployment_spool {
            monitors.push(Box::new(DeploymentMonitor::new(dir)));
        }

        info!(
            state_dir = %state_dir.display(),
            monitors = monitors.len(),
            "vigil ready"
        );
        Ok(Self {
            config,
            engine: Arc::new(engine),
            monitors,
        })
    }

    /// The loaded configuration.
    #[must_use]
    pub const fn config(&self) -> &VigilConfig {
        &self.config
    }

    /// The engine.
    #[must_use]
    pub fn engine(&self) -> &Arc<IssueEngine> {
        &self.engine
    }

    /// Submits every record in `input`, which holds one JSON object or an
    /// array of them.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not JSON or output fails. Rejected
    /// records are reported, not returned as errors.
    pub fn ingest<W: Write>(
        &self,
        out: &mut W,
        format: &OutputFormat,
        source: EventSource,
        input: &str,
    ) -> anyhow::Result<IngestSummary> {
        let records = match serde_json::from_str::<Value>(input).context("input is not JSON")? {
            Value::Array(records) => records,
            record => vec![record],
        };

        let now = Utc::now();
        let results = records
            .iter()
            .enumerate()
            .map(|(index, raw)| match self.engine.submit_event_at(raw, source, now) {
                Ok(report) => IngestResult {
                    index,
                    outcome: report.outcome.as_str().to_string(),
                    issue_ids: report.outcome.issues().iter().map(|i| i.id.clone()).collect(),
                    notifications: report.notifications.len(),
                    error: None,
                },
                Err(e) => IngestResult {
                    index,
                    outcome: "rejected".to_string(),
                    issue_ids: Vec::new(),
                    notifications: 0,
                    error: Some(e.to_string()),
                },
            })
            .collect();

        let summary = IngestSummary { results };
        self.engine.flush()?;
        format.write(out, &summary)?;
        Ok(summary)
    }

    /// Runs one monitor cycle: drains every monitor, then evaluates every
    /// unresolved issue.
    ///
    /// # Errors
    ///
    /// Returns an error only if the escalation pass cannot list issues.
    pub fn cycle(&self) -> anyhow::Result<CycleSummary> {
        let mut summary = CycleSummary::default();

        for monitor in &self.monitors {
            let events = match monitor.produce_events() {
                Ok(events) => events,
                Err(e) => {
                    warn!(monitor = %monitor.name(), error = %e, "monitor failed");
                    continue;
                }
            };

            for event in events {
                summary.events += 1;
                if let Err(e) = self.engine.process_event(&event, Utc::now()) {
                    warn!(
                        monitor = %monitor.name(),
                        signature = %event.signature,
                        error = %e,
                        "event processing failed"
                    );
                    summary.failed_events += 1;
                }
            }
        }

        summary.tick = self.engine.tick(Utc::now())?;
        self.engine.flush()?;
        Ok(summary)
    }

    /// Lists issues.
    ///
    /// # Errors
    ///
    /// Returns an error if the store or output fails.
    pub fn list<W: Write>(
        &self,
        out: &mut W,
        format: &OutputFormat,
        args: &ListArgs,
    ) -> anyhow::Result<()> {
        let issues = self.engine.list_issues(&filter(args))?;
        format.write(out, &IssueList { issues })
    }

    /// Shows one issue.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown IDs.
    pub fn show<W: Write>(&self, out: &mut W, format: &OutputFormat, id: &str) -> anyhow::Result<()> {
        let issue = self.engine.get_issue(id)?;
        format.write(out, &issue)
    }

    /// Resolves one issue.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown IDs.
    pub fn resolve<W: Write>(
        &self,
        out: &mut W,
        format: &OutputFormat,
        id: &str,
    ) -> anyhow::Result<()> {
        let issue = self.engine.resolve(id, Utc::now())?;
        self.engine.flush()?;
        format.write(out, &issue)
    }

    /// Attaches an analysis.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown IDs or an empty summary.
    pub fn annotate<W: Write>(
        &self,
        out: &mut W,
        format: &OutputFormat,
        args: &AnnotateArgs,
    ) -> anyhow::Result<()> {
        if args.summary.trim().is_empty() {
            bail!("analysis summary cannot be empty");
        }

        let mut analysis = Analysis::new(args.summary.trim());
        for fix in &args.fixes {
            analysis = analysis.with_fix(fix);
        }
        if let Some(severity) = args.severity {
            analysis = analysis.with_severity(severity.into());
        }

        let issue = self.engine.annotate(&args.id, analysis, Utc::now())?;
        self.engine.flush()?;
        format.write(out, &issue)
    }

    /// Runs one escalation pass.
    ///
    /// # Errors
    ///
    /// Returns an error if the store or output fails.
    pub fn tick<W: Write>(&self, out: &mut W, format: &OutputFormat) -> anyhow::Result<()> {
        let report = self.engine.tick(Utc::now())?;
        self.engine.flush()?;
        format.write(out, &report)
    }

    /// Prints the health summary.
    ///
    /// # Errors
    ///
    /// Returns an error if the store or output fails.
    pub fn health<W: Write>(&self, out: &mut W, format: &OutputFormat) -> anyhow::Result<()> {
        let summary = self.engine.health()?;
        format.write(out, &summary)
    }

    /// Deletes resolved issues past retention.
    ///
    /// # Errors
    ///
    /// Returns an error if the store or output fails.
    pub fn purge<W: Write>(
        &self,
        out: &mut W,
        format: &OutputFormat,
        retention_days: Option<u32>,
    ) -> anyhow::Result<()> {
        let retention_days = retention_days.unwrap_or(self.config.monitoring.retention_days);
        if retention_days == 0 {
            bail!("retention must be at least one day");
        }

        let purged = self
            .engine
            .purge_resolved(Duration::days(i64::from(retention_days)), Utc::now())?;
        self.engine.flush()?;
        format.write(
            out,
            &PurgeSummary {
                purged,
                retention_days,
            },
        )
    }
}

/// Reads ingest input from a file, or stdin for `-` or no file.
///
/// # Errors
///
/// Returns an error if the input cannot be read.
pub fn read_input(file: Option<&Path>) -> anyhow::Result<String> {
    match file {
        Some(path) if path != Path::new("-") => {
            fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
        }
        _ => {
            let mut input = String::new();
            std::io::stdin()
                .read_to_string(&mut input)
                .context("reading stdin")?;
            Ok(input)
        }
    }
}

fn filter(args: &ListArgs) -> IssueFilter {
    let mut filter = IssueFilter::new();
    if let Some(status) = args.status {
        filter = filter.status(status.into());
    }
    if let Some(severity) = args.min_severity {
        filter = filter.min_severity(severity.into());
    }
    if let Some(source) = args.source {
        filter = filter.source(source.into());
    }
    if let Some(subject) = &args.subject {
        filter = filter.subject_key(subject);
    }
    if args.unresolved {
        filter = filter.unresolved();
    }
    if let Some(limit) = args.limit {
        filter = filter.limit(limit);
    }
    filter
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Format, SeverityArg, StatusArg};
    use vigil_issues::IssueStatus;

    fn app(dir: &Path) -> App {
        let mut config = VigilConfig::default();
        config.monitoring.pipeline_spool = Some(dir.join("spool"));
        App::open(config, Some(dir.join("state"))).unwrap()
    }

    fn json() -> OutputFormat {
        OutputFormat::new(Format::Json)
    }

    const FAILED_RUN: &str =
        r#"{"workflow_name": "build", "branch": "main", "conclusion": "failure"}"#;

    #[test]
    fn ingest_reports_each_record() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());
        let input = format!("[{FAILED_RUN}, {{\"conclusion\": \"failure\"}}]");

        let mut out = Vec::new();
        let summary = app
            .ingest(&mut out, &json(), EventSource::Pipeline, &input)
            .unwrap();

        assert_eq!(summary.results.len(), 2);
        assert_eq!(summary.results[0].outcome, "created");
        assert_eq!(summary.rejected(), 1);
        let printed: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(printed["results"][1]["outcome"], "rejected");
    }

    #[test]
    fn ingest_rejects_non_json() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());
        let mut out = Vec::new();
        assert!(app
            .ingest(&mut out, &json(), EventSource::Pipeline, "not json")
            .is_err());
    }

    #[test]
    fn state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let app = app(dir.path());
            let summary = app
                .ingest(&mut Vec::<u8>::new(), &json(), EventSource::Pipeline, FAILED_RUN)
                .unwrap();
            summary.results[0].issue_ids[0].clone()
        };

        let app = app(dir.path());
        let issue = app.engine().get_issue(&id).unwrap();
        assert_eq!(issue.occurrence_count, 1);
    }

    #[test]
    fn cycle_drains_spool_and_ticks() {
        let dir = tempfile::tempdir().unwrap();
        let spool = dir.path().join("spool");
        fs::create_dir_all(&spool).unwrap();
        fs::write(spool.join("1.json"), format!("[{FAILED_RUN}, {FAILED_RUN}, {FAILED_RUN}]")).unwrap();

        let app = app(dir.path());
        let summary = app.cycle().unwrap();

        assert_eq!(summary.events, 3);
        assert_eq!(summary.failed_events, 0);
        assert_eq!(summary.tick.evaluated, 1);
        assert!(!spool.join("1.json").exists());

        let issues = app.engine().list_issues(&IssueFilter::new()).unwrap();
        assert_eq!(issues[0].status, IssueStatus::Notified);
    }

    #[test]
    fn list_filters() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());
        app.ingest(&mut Vec::<u8>::new(), &json(), EventSource::Pipeline, FAILED_RUN)
            .unwrap();

        let args = ListArgs {
            status: Some(StatusArg::Resolved),
            ..ListArgs::default()
        };
        let mut out = Vec::new();
        app.list(&mut out, &json(), &args).unwrap();
        let printed: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(printed["issues"].as_array().unwrap().len(), 0);

        let args = ListArgs {
            unresolved: true,
            min_severity: Some(SeverityArg::Medium),
            ..ListArgs::default()
        };
        let mut out = Vec::new();
        app.list(&mut out, &json(), &args).unwrap();
        let printed: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(printed["issues"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn annotate_and_resolve() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());
        let summary = app
            .ingest(&mut Vec::<u8>::new(), &json(), EventSource::Pipeline, FAILED_RUN)
            .unwrap();
        let id = summary.results[0].issue_ids[0].clone();

        let args = AnnotateArgs {
            id: id.clone(),
            summary: "Lockfile drift".to_string(),
            fixes: vec!["Regenerate Cargo.lock".to_string()],
            severity: Some(SeverityArg::Critical),
        };
        app.annotate(&mut Vec::<u8>::new(), &json(), &args).unwrap();
        let issue = app.engine().get_issue(&id).unwrap();
        assert_eq!(issue.status, IssueStatus::Notified);

        app.resolve(&mut Vec::<u8>::new(), &json(), &id).unwrap();
        let issue = app.engine().get_issue(&id).unwrap();
        assert_eq!(issue.status, IssueStatus::Resolved);

        let empty = AnnotateArgs {
            summary: "  ".to_string(),
            ..args
        };
        assert!(app.annotate(&mut Vec::<u8>::new(), &json(), &empty).is_err());
    }

    #[test]
    fn show_unknown_issue_fails() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());
        assert!(app.show(&mut Vec::<u8>::new(), &json(), "missing").is_err());
    }

    #[test]
    fn purge_rejects_zero_retention() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());
        assert!(app.purge(&mut Vec::<u8>::new(), &json(), Some(0)).is_err());
        assert!(app.purge(&mut Vec::<u8>::new(), &json(), None).is_ok());
    }

    #[test]
    fn missing_config_file_fails() {
        assert!(load_config(Some(Path::new("/nonexistent/vigil.toml"))).is_err());
        assert!(load_config(None).is_ok());
    }
}
