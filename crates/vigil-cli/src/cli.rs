//! Command-line argument parsing with clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use vigil_issues::{EventSource, IssueStatus, Severity};

/// Vigil - CI/CD issue tracking and notification escalation.
#[derive(Parser, Debug, Clone)]
#[command(name = "vigil")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "VIGIL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding issue state. Overrides `store.state_dir`.
    #[arg(short, long, env = "VIGIL_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Output format.
    #[arg(short, long, value_enum, default_value_t = Format::Table)]
    pub format: Format,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// Human-readable table format.
    #[default]
    Table,
    /// JSON output for scripting.
    Json,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Submit raw monitoring records.
    ///
    /// Reads a JSON object or an array of objects from FILE, or from stdin
    /// when FILE is `-` or omitted.
    Ingest {
        /// Which monitor produced the records.
        #[arg(short = 'S', long, value_enum)]
        source: SourceArg,

        /// File to read.
        file: Option<PathBuf>,
    },

    /// Drain the configured spool directories and run escalation on a loop.
    Watch {
        /// Run a single cycle and exit.
        #[arg(long)]
        once: bool,
    },

    /// List issues.
    Issues(ListArgs),

    /// Show one issue with its notification history.
    Show {
        /// Issue ID.
        id: String,
    },

    /// Resolve an issue by hand.
    Resolve {
        /// Issue ID.
        id: String,
    },

    /// Attach an analysis to an issue.
    Annotate(AnnotateArgs),

    /// Run one escalation pass over every unresolved issue.
    Tick,

    /// Show issue counts and overall health.
    Health,

    /// Delete resolved issues past the retention window.
    Purge {
        /// Retention in days. Defaults to `monitoring.retention_days`.
        #[arg(long)]
        retention_days: Option<u32>,
    },

    /// Validate the configuration and print the effective settings.
    CheckConfig,
}

/// Arguments for listing issues.
#[derive(Args, Debug, Clone, Default)]
pub struct ListArgs {
    /// Only issues in this status.
    #[arg(long, value_enum)]
    pub status: Option<StatusArg>,

    /// Only issues at or above this severity.
    #[arg(long, value_enum)]
    pub min_severity: Option<SeverityArg>,

    /// Only issues from this source.
    #[arg(short = 'S', long, value_enum)]
    pub source: Option<SourceArg>,

    /// Only issues for this subject.
    #[arg(long)]
    pub subject: Option<String>,

    /// Hide resolved issues.
    #[arg(short, long)]
    pub unresolved: bool,

    /// Maximum number of issues.
    #[arg(short, long)]
    pub limit: Option<usize>,
}

/// Arguments for the annotate command.
#[derive(Args, Debug, Clone)]
pub struct AnnotateArgs {
    /// Issue ID.
    pub id: String,

    /// Root-cause summary.
    #[arg(long)]
    pub summary: String,

    /// Suggested fix; repeat for several.
    #[arg(long = "fix")]
    pub fixes: Vec<String>,

    /// Suggested severity. Can only raise the issue's severity.
    #[arg(long, value_enum)]
    pub severity: Option<SeverityArg>,
}

/// Event sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SourceArg {
    /// GitHub Actions runs.
    Pipeline,
    /// Kubernetes deployment reports.
    Deployment,
}

impl From<SourceArg> for EventSource {
    fn from(arg: SourceArg) -> Self {
        match arg {
            SourceArg::Pipeline => Self::Pipeline,
            SourceArg::Deployment => Self::Deployment,
        }
    }
}

/// Severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SeverityArg {
    /// Low.
    Low,
    /// Medium.
    Medium,
    /// High.
    High,
    /// Critical.
    Critical,
}

impl From<SeverityArg> for Severity {
    fn from(arg: SeverityArg) -> Self {
        match arg {
            SeverityArg::Low => Self::Low,
            SeverityArg::Medium => Self::Medium,
            SeverityArg::High => Self::High,
            SeverityArg::Critical => Self::Critical,
        }
    }
}

/// Issue statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StatusArg {
    /// Open, not yet notified.
    Open,
    /// First notification sent.
    Notified,
    /// Escalated to the urgent route.
    Escalated,
    /// At least one reminder sent.
    Reminded,
    /// Resolved.
    Resolved,
}

impl From<StatusArg> for IssueStatus {
    fn from(arg: StatusArg) -> Self {
        match arg {
            StatusArg::Open => Self::Open,
            StatusArg::Notified => Self::Notified,
            StatusArg::Escalated => Self::Escalated,
            StatusArg::Reminded => Self::Reminded,
            StatusArg::Resolved => Self::Resolved,
        }
    }
}
