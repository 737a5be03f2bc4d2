//! Issue lifecycle and notification escalation for CI/CD monitoring.
//!
//! `vigil-issues` turns the raw records produced by pipeline and deployment
//! monitors into deduplicated issues, tracks how often each issue recurs,
//! and escalates notifications through configurable channels.
//!
//! # Features
//!
//! - **Normalization**: GitHub Actions runs and Kubernetes deployment reports
//!   become [`Event`]s with a stable failure signature
//! - **Deduplication**: one open issue per signature, with occurrence counting
//! - **Recovery**: a success for a subject resolves its open issues
//! - **Severity**: baseline by failure class, raised by repetition and analysis
//! - **Escalation**: notify at a threshold, escalate on repetition, remind on a
//!   fixed cadence, announce resolution
//! - **Channels**: log, JSON webhook, Slack and Teams
//! - **Persistence**: optimistic-concurrency store with a JSON snapshot backend
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use vigil_issues::{
//!     ChannelRegistry, EngineConfig, EventSource, IssueEngine, IssueFilter, IssueStatus,
//!     MemoryIssueStore, channels::LogChannel,
//! };
//!
//! let registry = ChannelRegistry::new();
//! registry.register(Arc::new(LogChannel::default()));
//!
//! let engine = IssueEngine::new(
//!     EngineConfig::default(),
//!     Arc::new(MemoryIssueStore::new()),
//!     Arc::new(registry),
//! )
//! .unwrap();
//!
//! let run = serde_json::json!({
//!     "workflow_name": "build",
//!     "branch": "main",
//!     "conclusion": "failure",
//! });
//! for _ in 0..3 {
//!     engine.submit_event(&run, EventSource::Pipeline).unwrap();
//! }
//!
//! let issues = engine.list_issues(&IssueFilter::new()).unwrap();
//! assert_eq!(issues.len(), 1);
//! assert_eq!(issues[0].occurrence_count, 3);
//! assert_eq!(issues[0].status, IssueStatus::Notified);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod channels;
pub mod config;
pub mod engine;
pub mod error;
pub mod escalation;
pub mod health;
pub mod matcher;
pub mod monitors;
pub mod normalizer;
pub mod severity;
pub mod store;
pub mod types;

// Re-export main types at crate root
pub use channels::{
    ChannelRegistry, Dispatcher, LogChannel, MemoryChannel, NotificationChannel,
    NotificationMessage, Urgency, WebhookChannel, WebhookConfig, WebhookFormat,
};
pub use config::{ChannelConfig, ChannelKind, MonitoringConfig, StoreConfig, VigilConfig};
pub use engine::{DispatchReport, EngineConfig, EventReport, IssueEngine, TickReport};
pub use error::{IssueError, Result};
pub use escalation::{EscalationPolicy, Routing, Transition};
pub use health::HealthSummary;
pub use matcher::{IssueMatcher, MatchOutcome};
pub use monitors::{DeploymentMonitor, EventProducer, PipelineMonitor};
pub use severity::{AnalysisProvider, FnAnalysis, NoAnalysis, SeverityRules};
pub use store::{IssueStore, JsonIssueStore, MemoryIssueStore, update_with_retry};
pub use types::{
    Analysis, DispatchOutcome, Event, EventKind, EventSource, FailureClass, Issue, IssueFilter,
    IssueStatus, NotificationKind, NotificationRecord, Severity,
};
