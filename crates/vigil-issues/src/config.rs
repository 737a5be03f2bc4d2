//! Vigil configuration.
//!
//! One TOML document configures the whole engine:
//! - `[monitoring]`: polling cadence, retention and spool directories
//! - `[severity]`: repeat rule tunables
//! - `[escalation]`: notify, escalate and remind thresholds
//! - `[routing]`: which channels get routine and urgent notices
//! - `[[channels]]`: channel definitions
//! - `[store]`: state directory and conflict retries
//!
//! Every section is optional and falls back to defaults.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::channels::{
    ChannelRegistry, LogChannel, MemoryChannel, WebhookChannel, WebhookConfig, WebhookFormat,
};
use crate::engine::EngineConfig;
use crate::error::{IssueError, Result};
use crate::escalation::{EscalationPolicy, Routing};
use crate::matcher::DEFAULT_MAX_CONFLICT_RETRIES;
use crate::severity::SeverityRules;

/// Polling and retention settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Seconds between monitor polls and escalation ticks.
    pub check_interval_secs: u64,
    /// Days resolved issues are kept before purging.
    pub retention_days: u32,
    /// Directory the pipeline monitor drains.
    pub pipeline_spool: Option<PathBuf>,
    /// Directory the deployment monitor drains.
    pub deployment_spool: Option<PathBuf>,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 300,
            retention_days: 30,
            pipeline_spool: None,
            deployment_spool: None,
        }
    }
}

impl MonitoringConfig {
    /// The retention window.
    #[must_use]
    pub fn retention(&self) -> Duration {
        Duration::days(i64::from(self.retention_days))
    }

    /// The poll interval.
    #[must_use]
    pub const fn check_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.check_interval_secs)
    }
}

/// Issue store settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding the issue snapshot. `None` keeps issues in memory.
    pub state_dir: Option<PathBuf>,
    /// Attempts per contended mutation.
    pub max_conflict_retries: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            state_dir: None,
            max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
        }
    }
}

/// Kind of notification channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// Writes to the log.
    #[default]
    Log,
    /// Posts the message as JSON.
    Webhook,
    /// Posts a Slack attachment.
    Slack,
    /// Posts a Teams message card.
    Teams,
    /// Keeps messages in memory.
    Memory,
}

/// One `[[channels]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Name referenced by `[routing]`.
    pub name: String,
    /// What kind of channel.
    #[serde(default)]
    pub kind: ChannelKind,
    /// Target URL for webhook kinds.
    #[serde(default)]
    pub url: Option<String>,
    /// HTTP headers for webhook kinds.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// HTTP timeout for webhook kinds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Whether the channel accepts messages.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

const fn default_true() -> bool {
    true
}

impl ChannelConfig {
    /// A log channel entry.
    #[must_use]
    pub fn log(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ChannelKind::Log,
            url: None,
            headers: HashMap::new(),
            timeout_secs: None,
            enabled: true,
        }
    }

    fn webhook_config(&self, format: WebhookFormat) -> Result<WebhookConfig> {
        let url = self.url.as_deref().ok_or_else(|| IssueError::InvalidConfig {
            reason: format!("channel '{}' needs a url", self.name),
        })?;

        let mut config = WebhookConfig::new(&self.name, url)?.with_format(format);
        if let Some(timeout) = self.timeout_secs {
            config = config.with_timeout_secs(timeout);
        }
        for (key, value) in &self.headers {
            config = config.with_header(key, value);
        }
        config = config.enabled(self.enabled);
        config.validate()?;
        Ok(config)
    }

    /// Builds the channel.
    ///
    /// # Errors
    ///
    /// Returns `IssueError::InvalidConfig` for webhook kinds without a valid
    /// URL.
    pub fn build(&self) -> Result<Arc<dyn crate::channels::NotificationChannel>> {
        Ok(match self.kind {
            ChannelKind::Log => Arc::new(LogChannel::new(&self.name).enabled(self.enabled)),
            ChannelKind::Memory => Arc::new(MemoryChannel::new(&self.name)),
            ChannelKind::Webhook => {
                Arc::new(WebhookChannel::new(self.webhook_config(WebhookFormat::Json)?)?)
            }
            ChannelKind::Slack => {
                Arc::new(WebhookChannel::new(self.webhook_config(WebhookFormat::Slack)?)?)
            }
            ChannelKind::Teams => {
                Arc::new(WebhookChannel::new(self.webhook_config(WebhookFormat::Teams)?)?)
            }
        })
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VigilConfig {
    /// Polling and retention.
    pub monitoring: MonitoringConfig,
    /// Severity rules.
    pub severity: SeverityRules,
    /// Escalation policy.
    pub escalation: EscalationPolicy,
    /// Channel routing.
    pub routing: Routing,
    /// Channel definitions. A `log` channel exists even if not listed.
    pub channels: Vec<ChannelConfig>,
    /// Issue store.
    pub store: StoreConfig,
}

impl VigilConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns `IssueError::InvalidConfig` if the file cannot be read, parsed
    /// or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| IssueError::InvalidConfig {
            reason: format!("failed to read config file '{}': {e}", path.display()),
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `IssueError::InvalidConfig` if the TOML is invalid or fails
    /// validation.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| IssueError::InvalidConfig {
            reason: format!("invalid TOML: {e}"),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `IssueError::InvalidConfig` describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.monitoring.check_interval_secs == 0 {
            return Err(IssueError::InvalidConfig {
                reason: "monitoring.check_interval_secs must be greater than 0".to_string(),
            });
        }
        if self.monitoring.retention_days == 0 {
            return Err(IssueError::InvalidConfig {
                reason: "monitoring.retention_days must be greater than 0".to_string(),
            });
        }

        self.engine_config().validate()?;

        let mut names = HashSet::new();
        for channel in &self.channels {
            if channel.name.is_empty() {
                return Err(IssueError::InvalidConfig {
                    reason: "channel name cannot be empty".to_string(),
                });
            }
            if !names.insert(channel.name.as_str()) {
                return Err(IssueError::InvalidConfig {
                    reason: format!("channel '{}' is defined twice", channel.name),
                });
            }
            if channel.kind != ChannelKind::Log && channel.kind != ChannelKind::Memory {
                channel.webhook_config(WebhookFormat::Json)?;
            }
        }
        names.insert("log");

        if let Some(missing) = self
            .routing
            .standard
            .iter()
            .chain(&self.routing.urgent)
            .find(|name| !names.contains(name.as_str()))
        {
            return Err(IssueError::InvalidConfig {
                reason: format!("routing refers to undefined channel '{missing}'"),
            });
        }

        Ok(())
    }

    /// The engine's share of the configuration.
    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::default()
            .with_severity(self.severity)
            .with_escalation(self.escalation.clone())
            .with_routing(self.routing.clone())
            .with_max_conflict_retries(self.store.max_conflict_retries)
    }

    /// Builds a registry with every configured channel plus the default
    /// `log` channel.
    ///
    /// # Errors
    ///
    /// Returns `IssueError::InvalidConfig` if a channel cannot be built.
    pub fn build_channels(&self) -> Result<ChannelRegistry> {
        let registry = ChannelRegistry::new();
        if !self.channels.iter().any(|c| c.name == "log") {
            registry.register(Arc::new(LogChannel::default()));
        }
        for channel in &self.channels {
            registry.register(channel.build()?);
        }
        Ok(registry)
    }
}
