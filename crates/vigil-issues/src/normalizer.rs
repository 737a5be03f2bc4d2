//! Turning raw monitoring records into [`Event`]s.
//!
//! Pollers and webhook receivers hand over source-specific JSON records:
//! GitHub Actions workflow runs for [`EventSource::Pipeline`] and Kubernetes
//! deployment health reports for [`EventSource::Deployment`]. [`normalize`]
//! extracts the subject, decides the event kind and reduces free-form error
//! text to a coarse [`FailureClass`], so that the derived signature is stable
//! across runs that fail the same way.
//!
//! Records that lack a subject or carry no health signal are rejected with
//! [`IssueError::MalformedInput`]; nothing is guessed.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::error::{IssueError, Result};
use crate::types::{Event, EventKind, EventSource, FailureClass};

/// Job names that identify security scanners.
const SECURITY_JOBS: [&str; 5] = [
    "security-scan",
    "vulnerability-scan",
    "trivy",
    "bandit",
    "safety",
];

/// Pipeline conclusions that count as failures.
const FAILED_CONCLUSIONS: [&str; 4] = ["failure", "timed_out", "startup_failure", "action_required"];

/// Expected job duration ceilings in seconds, by job name.
const JOB_DURATION_LIMITS: [(&str, u64); 3] = [("test", 600), ("build", 900), ("deploy", 1200)];

/// Ceiling for jobs without a specific limit.
const DEFAULT_JOB_DURATION_LIMIT: u64 = 1800;

/// Ceiling for a whole pipeline run.
const PIPELINE_DURATION_LIMIT: u64 = 3600;

static TIMESTAMP_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\d{4}-\d{2}-\d{2}[t ]\d{2}:\d{2}:\d{2}(\.\d+)?(z|[+-]\d{2}:?\d{2})?")
        .unwrap_or_else(|_| unreachable!())
});

static HEX_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(0x)?[0-9a-f]{7,}\b").unwrap_or_else(|_| unreachable!()));

static PATH_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(/[\w.\-]+)+(:\d+)*").unwrap_or_else(|_| unreachable!()));

static NUMBER_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+").unwrap_or_else(|_| unreachable!()));

static SPACE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").unwrap_or_else(|_| unreachable!()));

/// Keyword table for [`classify_text`], checked in order.
const CLASS_KEYWORDS: [(FailureClass, &[&str]); 11] = [
    (
        FailureClass::SecurityScan,
        &["vulnerabilit", "cve-", "security scan", "trivy", "bandit"],
    ),
    (FailureClass::CrashLoop, &["crashloopbackoff", "back-off restarting"]),
    (
        FailureClass::ImagePull,
        &[
            "imagepullbackoff",
            "errimagepull",
            "back-off pulling image",
            "pull access denied",
            "manifest unknown",
        ],
    ),
    (FailureClass::OutOfMemory, &["oomkilled", "out of memory", "cannot allocate memory"]),
    (
        FailureClass::Timeout,
        &["timed out", "timeout", "deadline exceeded", "progressdeadlineexceeded"],
    ),
    (
        FailureClass::Network,
        &["connection refused", "connection reset", "could not resolve host", "network unreachable"],
    ),
    (
        FailureClass::Dependency,
        &[
            "could not resolve",
            "no matching version",
            "failed to download",
            "dependency",
            "npm err",
            "pip install",
        ],
    ),
    (
        FailureClass::Permission,
        &["permission denied", "unauthorized", "forbidden", "authentication failed"],
    ),
    (
        FailureClass::Test,
        &["test failed", "tests failed", "assertion", "failing test", "test result: failed"],
    ),
    (
        FailureClass::Build,
        &["compilation failed", "could not compile", "build failed", "syntax error", "error["],
    ),
    (FailureClass::Slow, &["took longer", "exceeded expected duration"]),
];

/// Normalizes a raw record using the current time when the record carries none.
///
/// # Errors
///
/// Returns `IssueError::MalformedInput` if the subject or kind cannot be
/// determined.
pub fn normalize(raw: &Value, source: EventSource) -> Result<Event> {
    normalize_at(raw, source, Utc::now())
}

/// Normalizes a raw record, using `fallback` when it carries no timestamp.
///
/// # Errors
///
/// Returns `IssueError::MalformedInput` if the subject or kind cannot be
/// determined.
pub fn normalize_at(raw: &Value, source: EventSource, fallback: DateTime<Utc>) -> Result<Event> {
    if !raw.is_object() {
        return Err(IssueError::malformed("record must be a JSON object"));
    }

    let (subject_key, kind, class) = match source {
        EventSource::Pipeline => pipeline_fields(raw)?,
        EventSource::Deployment => deployment_fields(raw)?,
    };

    let timestamp = record_timestamp(raw)?.unwrap_or(fallback);
    Ok(Event::new(source, subject_key, kind, class, timestamp, raw.clone()))
}

/// Collapses volatile fragments out of error text.
///
/// Timestamps, hex identifiers, file paths and numbers are replaced with
/// placeholders, and whitespace is squeezed, so that two logs of the same
/// failure compare equal.
#[must_use]
pub fn normalize_error_text(text: &str) -> String {
    let lowered = text.to_lowercase();
    let s = TIMESTAMP_REGEX.replace_all(&lowered, "<ts>");
    let s = HEX_REGEX.replace_all(&s, "<hex>");
    let s = PATH_REGEX.replace_all(&s, "<path>");
    let s = NUMBER_REGEX.replace_all(&s, "<n>");
    SPACE_REGEX.replace_all(s.trim(), " ").into_owned()
}

/// Maps error text onto a coarse failure class.
#[must_use]
pub fn classify_text(text: &str) -> FailureClass {
    let normalized = normalize_error_text(text);
    CLASS_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| normalized.contains(k)))
        .map_or(FailureClass::Unknown, |(class, _)| *class)
}

fn pipeline_fields(raw: &Value) -> Result<(String, EventKind, FailureClass)> {
    let subject_key = match str_field(raw, &["subject_key"]) {
        Some(key) => key.to_string(),
        None => {
            let workflow = str_field(raw, &["workflow_name", "workflow", "name"])
                .ok_or_else(|| IssueError::malformed("pipeline record has no workflow name"))?;
            match str_field(raw, &["branch", "head_branch"]) {
                Some(branch) => format!("{workflow}@{branch}"),
                None => workflow.to_string(),
            }
        }
    };

    let jobs = raw
        .get("jobs")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let kind = match explicit_kind(raw)? {
        Some(kind) => kind,
        None => {
            let conclusion = str_field(raw, &["conclusion"])
                .ok_or_else(|| IssueError::malformed("pipeline record has no conclusion"))?
                .to_ascii_lowercase();
            if FAILED_CONCLUSIONS.contains(&conclusion.as_str()) {
                EventKind::Failure
            } else if conclusion == "success" {
                EventKind::Recovery
            } else {
                return Err(IssueError::malformed(format!(
                    "pipeline conclusion '{conclusion}' carries no health signal"
                )));
            }
        }
    };

    let class = match kind {
        EventKind::Recovery => FailureClass::Unknown,
        EventKind::Degradation => {
            if pipeline_is_slow(raw, jobs) {
                FailureClass::Slow
            } else {
                classify_text(&collect_text(raw, jobs))
            }
        }
        EventKind::Failure => pipeline_failure_class(raw, jobs),
    };

    Ok((subject_key, kind, class))
}

fn pipeline_failure_class(raw: &Value, jobs: &[Value]) -> FailureClass {
    let failed_jobs: Vec<&Value> = jobs
        .iter()
        .filter(|job| str_field(job, &["conclusion"]).is_some_and(|c| c == "failure"))
        .collect();

    let security_failed = failed_jobs.iter().any(|job| {
        str_field(job, &["name"]).is_some_and(|name| {
            let name = name.to_lowercase();
            SECURITY_JOBS.iter().any(|s| name.contains(s))
        })
    });
    if security_failed {
        return FailureClass::SecurityScan;
    }

    if str_field(raw, &["conclusion"]).is_some_and(|c| c == "timed_out") {
        return FailureClass::Timeout;
    }

    let owned: Vec<Value> = failed_jobs.into_iter().cloned().collect();
    let class = classify_text(&collect_text(raw, &owned));
    if class != FailureClass::Unknown {
        return class;
    }

    // Fall back on the failing job's role.
    owned
        .iter()
        .filter_map(|job| str_field(job, &["name"]))
        .map(str::to_lowercase)
        .find_map(|name| {
            if name.contains("test") {
                Some(FailureClass::Test)
            } else if name.contains("build") || name.contains("compile") {
                Some(FailureClass::Build)
            } else {
                None
            }
        })
        .unwrap_or(FailureClass::Unknown)
}

fn pipeline_is_slow(raw: &Value, jobs: &[Value]) -> bool {
    if raw
        .get("duration")
        .and_then(Value::as_u64)
        .is_some_and(|d| d > PIPELINE_DURATION_LIMIT)
    {
        return true;
    }

    jobs.iter().any(|job| {
        let Some(duration) = job.get("duration").and_then(Value::as_u64) else {
            return false;
        };
        let name = str_field(job, &["name"]).unwrap_or_default().to_lowercase();
        let limit = JOB_DURATION_LIMITS
            .iter()
            .find(|(job_name, _)| *job_name == name)
            .map_or(DEFAULT_JOB_DURATION_LIMIT, |(_, limit)| *limit);
        duration > limit
    })
}

fn deployment_fields(raw: &Value) -> Result<(String, EventKind, FailureClass)> {
    let subject_key = match str_field(raw, &["subject_key"]) {
        Some(key) => key.to_string(),
        None => {
            let name = str_field(raw, &["deployment_name", "name"])
                .ok_or_else(|| IssueError::malformed("deployment record has no name"))?;
            let namespace = str_field(raw, &["namespace"]).unwrap_or("default");
            format!("{namespace}/{name}")
        }
    };

    let conditions = raw
        .get("conditions")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    let pod_events = raw
        .get("pod_events")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let condition_is = |kind: &str, status: &str| {
        conditions.iter().any(|c| {
            str_field(c, &["type"]) == Some(kind) && str_field(c, &["status"]) == Some(status)
        })
    };
    let event_reason_has = |needle: &str| {
        pod_events.iter().any(|e| {
            str_field(e, &["reason"]).is_some_and(|r| r.to_lowercase().contains(needle))
        })
    };
    let event_message_has = |needle: &str| {
        pod_events.iter().any(|e| {
            str_field(e, &["message"]).is_some_and(|m| m.to_lowercase().contains(needle))
        })
    };

    let status = str_field(raw, &["status"]).map(str::to_ascii_lowercase);
    let replicas = raw.get("replicas").and_then(Value::as_u64);
    let available = raw.get("available_replicas").and_then(Value::as_u64);

    // `BackOff` alone also covers image pulls; only restart back-off is a crash loop.
    let crash_looping =
        event_reason_has("crashloopbackoff") || event_message_has("back-off restarting");
    let unavailable = condition_is("Available", "False");
    let failed = status.as_deref() == Some("failed")
        || unavailable
        || condition_is("Progressing", "False")
        || condition_is("ReplicaFailure", "True")
        || crash_looping;
    let under_replicated = match (replicas, available) {
        (Some(want), Some(have)) => have < want,
        (Some(want), None) => want > 0,
        _ => false,
    };

    let kind = match explicit_kind(raw)? {
        Some(kind) => kind,
        None if failed => EventKind::Failure,
        None if under_replicated => EventKind::Degradation,
        None if matches!(status.as_deref(), Some("running" | "available")) => EventKind::Recovery,
        None => {
            return Err(IssueError::malformed(format!(
                "deployment status '{}' carries no health signal",
                status.as_deref().unwrap_or("<missing>")
            )));
        }
    };

    let class = match kind {
        EventKind::Recovery => FailureClass::Unknown,
        EventKind::Degradation => FailureClass::Scaling,
        EventKind::Failure => {
            if event_reason_has("crashloopbackoff") {
                FailureClass::CrashLoop
            } else if event_reason_has("imagepull") || event_reason_has("errimagepull") {
                FailureClass::ImagePull
            } else if event_reason_has("oomkilled") {
                FailureClass::OutOfMemory
            } else if unavailable {
                FailureClass::Unavailable
            } else {
                let text = conditions
                    .iter()
                    .chain(pod_events.iter())
                    .flat_map(|v| [str_field(v, &["reason"]), str_field(v, &["message"])])
                    .flatten()
                    .collect::<Vec<_>>()
                    .join(" ");
                match classify_text(&text) {
                    FailureClass::Unknown if crash_looping => FailureClass::CrashLoop,
                    other => other,
                }
            }
        }
    };

    Ok((subject_key, kind, class))
}

fn explicit_kind(raw: &Value) -> Result<Option<EventKind>> {
    match raw.get("kind") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(kind)) => kind.parse().map(Some),
        Some(other) => Err(IssueError::malformed(format!("kind must be a string, got {other}"))),
    }
}

fn record_timestamp(raw: &Value) -> Result<Option<DateTime<Utc>>> {
    let Some(text) = str_field(raw, &["timestamp", "completed_at", "updated_at", "created_at"])
    else {
        return Ok(None);
    };

    DateTime::parse_from_rfc3339(text)
        .map(|t| Some(t.with_timezone(&Utc)))
        .map_err(|e| IssueError::malformed(format!("invalid timestamp '{text}': {e}")))
}

fn collect_text(raw: &Value, jobs: &[Value]) -> String {
    let mut parts: Vec<&str> = Vec::new();
    parts.extend(str_field(raw, &["error"]));
    parts.extend(str_field(raw, &["message"]));
    for job in jobs {
        parts.extend(str_field(job, &["error"]));
        parts.extend(str_field(job, &["log"]));
        parts.extend(str_field(job, &["message"]));
    }
    parts.join(" ")
}

fn str_field<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|k| value.get(k).and_then(Value::as_str))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}
