//! Event producers.
//!
//! Pollers and webhook receivers (which live outside this crate) drop raw
//! JSON records into a spool directory, one record or an array of records
//! per `*.json` file. Writers should create files under another extension
//! and rename them into place. Each monitor drains its own spool:
//!
//! - readable records are normalized into events and the file is removed
//! - unparseable files are moved to `quarantine/` as-is
//! - malformed records are written to `quarantine/` one per file
//!
//! Nothing is retried; quarantined input waits for a human.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::normalizer;
use crate::types::{Event, EventSource};

/// Name of the directory malformed input is moved to.
pub const QUARANTINE_DIR: &str = "quarantine";

/// A source of normalized events.
pub trait EventProducer: Send + Sync + fmt::Debug {
    /// Returns the name of this producer.
    fn name(&self) -> &str;

    /// Which source its events carry.
    fn source(&self) -> EventSource;

    /// Collects every event available now.
    ///
    /// # Errors
    ///
    /// Returns `IssueError::Persistence` if the spool cannot be read at all.
    /// Problems with single records never fail the call.
    fn produce_events(&self) -> Result<Vec<Event>>;
}

/// A spool directory of raw records.
#[derive(Debug, Clone)]
struct Spool {
    dir: PathBuf,
}

impl Spool {
    fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn quarantine_dir(&self) -> PathBuf {
        self.dir.join(QUARANTINE_DIR)
    }

    fn pending_files(&self) -> Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        files.sort();
        Ok(files)
    }

    /// Drains the spool through `accept`, which turns one raw record into
    /// an event, skips it (`Ok(None)`) or rejects it.
    fn drain(
        &self,
        producer: &str,
        mut accept: impl FnMut(&Value) -> Result<Option<Event>>,
    ) -> Result<Vec<Event>> {
        let mut events = Vec::new();

        for path in self.pending_files()? {
            let records = match read_records(&path) {
                Ok(records) => records,
                Err(reason) => {
                    warn!(producer, file = %path.display(), reason = %reason, "quarantining unreadable spool file");
                    self.quarantine_file(&path);
                    continue;
                }
            };

            for (index, record) in records.iter().enumerate() {
                match accept(record) {
                    Ok(Some(event)) => events.push(event),
                    Ok(None) => {}
                    Err(e) => {
                        warn!(producer, file = %path.display(), index, error = %e, "quarantining malformed record");
                        self.quarantine_record(&path, index, record);
                    }
                }
            }

            if let Err(e) = fs::remove_file(&path) {
                warn!(producer, file = %path.display(), error = %e, "failed to remove drained spool file");
            }
        }

        if !events.is_empty() {
            debug!(producer, count = events.len(), "drained spool");
        }
        Ok(events)
    }

    fn quarantine_file(&self, path: &Path) {
        let Some(file_name) = path.file_name() else {
            return;
        };
        let target = self.quarantine_dir().join(file_name);
        let moved = fs::create_dir_all(self.quarantine_dir()).and_then(|()| fs::rename(path, &target));
        if let Err(e) = moved {
            warn!(file = %path.display(), error = %e, "failed to quarantine file, removing it");
            let _ = fs::remove_file(path);
        }
    }

    fn quarantine_record(&self, path: &Path, index: usize, record: &Value) {
        let stem = path
            .file_stem()
            .map_or_else(|| "record".into(), |s| s.to_string_lossy());
        let target = self.quarantine_dir().join(format!("{stem}-{index}.json"));

        let written = fs::create_dir_all(self.quarantine_dir()).and_then(|()| {
            let bytes = serde_json::to_vec_pretty(record)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            fs::write(&target, bytes)
        });
        if let Err(e) = written {
            warn!(file = %target.display(), error = %e, "failed to write quarantined record");
        }
    }
}

fn read_records(path: &Path) -> std::result::Result<Vec<Value>, String> {
    let bytes = fs::read(path).map_err(|e| e.to_string())?;
    match serde_json::from_slice::<Value>(&bytes).map_err(|e| e.to_string())? {
        Value::Array(records) => Ok(records),
        record @ Value::Object(_) => Ok(vec![record]),
        other => Err(format!("expected an object or array, found {other}")),
    }
}

/// How many pipeline run keys are remembered for deduplication.
const SEEN_RUNS_CAPACITY: usize = 10_000;

/// Drains GitHub Actions run records.
///
/// A run already seen (same `run_id` and `run_attempt`) is skipped, so a
/// poller that re-reports recent runs does not inflate occurrence counts.
#[derive(Debug)]
pub struct PipelineMonitor {
    name: String,
    spool: Spool,
    seen: Mutex<SeenRuns>,
}

#[derive(Debug, Default)]
struct SeenRuns {
    keys: HashSet<String>,
    order: VecDeque<String>,
}

impl SeenRuns {
    /// Remembers `key`, returning false if it was already known.
    fn insert(&mut self, key: String) -> bool {
        if !self.keys.insert(key.clone()) {
            return false;
        }
        self.order.push_back(key);
        while self.order.len() > SEEN_RUNS_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.keys.remove(&oldest);
            }
        }
        true
    }
}

impl PipelineMonitor {
    /// Creates a monitor over a spool directory.
    #[must_use]
    pub fn new(spool_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: "pipeline".to_string(),
            spool: Spool::new(spool_dir),
            seen: Mutex::new(SeenRuns::default()),
        }
    }

    /// Returns the spool directory.
    #[must_use]
    pub fn spool_dir(&self) -> &Path {
        &self.spool.dir
    }

    fn run_key(record: &Value) -> Option<String> {
        let id = match record.get("run_id")? {
            Value::String(s) if !s.is_empty() => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        let attempt = record
            .get("run_attempt")
            .and_then(Value::as_u64)
            .unwrap_or(1);
        Some(format!("{id}#{attempt}"))
    }
}

impl EventProducer for PipelineMonitor {
    fn name(&self) -> &str {
        &self.name
    }

    fn source(&self) -> EventSource {
        EventSource::Pipeline
    }

    fn produce_events(&self) -> Result<Vec<Event>> {
        let now = Utc::now();
        let events = self.spool.drain(&self.name, |record| {
            let event = normalizer::normalize_at(record, EventSource::Pipeline, now)?;
            if let Some(key) = Self::run_key(record) {
                if !self.seen.lock().insert(key.clone()) {
                    debug!(run = %key, "skipping pipeline run already seen");
                    return Ok(None);
                }
            }
            Ok(Some(event))
        })?;

        if !events.is_empty() {
            info!(monitor = %self.name, events = events.len(), "pipeline events collected");
        }
        Ok(events)
    }
}

/// Drains Kubernetes deployment health reports.
#[derive(Debug)]
pub struct DeploymentMonitor {
    name: String,
    spool: Spool,
}

impl DeploymentMonitor {
    /// Creates a monitor over a spool directory.
    #[must_use]
    pub fn new(spool_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: "deployment".to_string(),
            spool: Spool::new(spool_dir),
        }
    }

    /// Returns the spool directory.
    #[must_use]
    pub fn spool_dir(&self) -> &Path {
        &self.spool.dir
    }
}

impl EventProducer for DeploymentMonitor {
    fn name(&self) -> &str {
        &self.name
    }

    fn source(&self) -> EventSource {
        EventSource::Deployment
    }

    fn produce_events(&self) -> Result<Vec<Event>> {
        let now = Utc::now();
        let events = self.spool.drain(&self.name, |record| {
            normalizer::normalize_at(record, EventSource::Deployment, now).map(Some)
        })?;

        if !events.is_empty() {
            info!(monitor = %self.name, events = events.len(), "deployment events collected");
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventKind, FailureClass};
    use serde_json::json;

    fn write(dir: &Path, name: &str, value: &Value) {
        fs::write(dir.join(name), serde_json::to_vec(value).unwrap()).unwrap();
    }

    fn quarantined(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir.join(QUARANTINE_DIR))
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    mod pipeline_tests {
        use super::*;

        #[test]
        fn drains_and_removes_files() {
            let dir = tempfile::tempdir().unwrap();
            write(
                dir.path(),
                "001.json",
                &json!({ "workflow_name": "ci", "branch": "main", "conclusion": "failure", "run_id": 1 }),
            );

            let monitor = PipelineMonitor::new(dir.path());
            let events = monitor.produce_events().unwrap();

            assert_eq!(events.len(), 1);
            assert_eq!(events[0].subject_key, "ci@main");
            assert_eq!(events[0].kind, EventKind::Failure);
            assert!(!dir.path().join("001.json").exists());
            assert!(monitor.produce_events().unwrap().is_empty());
        }

        #[test]
        fn skips_runs_already_seen() {
            let dir = tempfile::tempdir().unwrap();
            let run = json!({ "workflow_name": "ci", "conclusion": "failure", "run_id": 42 });
            let monitor = PipelineMonitor::new(dir.path());

            write(dir.path(), "a.json", &run);
            assert_eq!(monitor.produce_events().unwrap().len(), 1);

            write(dir.path(), "b.json", &run);
            assert!(monitor.produce_events().unwrap().is_empty());

            // A re-run attempt is a new observation.
            let rerun = json!({ "workflow_name": "ci", "conclusion": "failure", "run_id": 42, "run_attempt": 2 });
            write(dir.path(), "c.json", &rerun);
            assert_eq!(monitor.produce_events().unwrap().len(), 1);
        }

        #[test]
        fn arrays_and_malformed_records() {
            let dir = tempfile::tempdir().unwrap();
            write(
                dir.path(),
                "batch.json",
                &json!([
                    { "workflow_name": "ci", "conclusion": "failure" },
                    { "conclusion": "failure" },
                    { "workflow_name": "ci", "conclusion": "success" },
                ]),
            );

            let monitor = PipelineMonitor::new(dir.path());
            let events = monitor.produce_events().unwrap();

            assert_eq!(events.len(), 2);
            assert_eq!(events[1].kind, EventKind::Recovery);
            assert_eq!(quarantined(dir.path()), vec!["batch-1.json"]);
        }

        #[test]
        fn unparseable_file_is_quarantined() {
            let dir = tempfile::tempdir().unwrap();
            fs::write(dir.path().join("junk.json"), b"{ not json").unwrap();
            fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

            let monitor = PipelineMonitor::new(dir.path());
            assert!(monitor.produce_events().unwrap().is_empty());
            assert_eq!(quarantined(dir.path()), vec!["junk.json"]);
            assert!(dir.path().join("notes.txt").exists());
        }

        #[test]
        fn missing_spool_is_empty() {
            let dir = tempfile::tempdir().unwrap();
            let monitor = PipelineMonitor::new(dir.path().join("absent"));
            assert!(monitor.produce_events().unwrap().is_empty());
        }
    }

    mod deployment_tests {
        use super::*;

        #[test]
        fn crash_loop_report() {
            let dir = tempfile::tempdir().unwrap();
            write(
                dir.path(),
                "api.json",
                &json!({
                    "deployment_name": "api",
                    "namespace": "prod",
                    "status": "running",
                    "replicas": 3,
                    "available_replicas": 1,
                    "pod_events": [{ "type": "Warning", "reason": "CrashLoopBackOff", "message": "back-off restarting failed container" }],
                }),
            );

            let monitor = DeploymentMonitor::new(dir.path());
            let events = monitor.produce_events().unwrap();

            assert_eq!(monitor.source(), EventSource::Deployment);
            assert_eq!(events.len(), 1);
            assert_eq!(events[0].subject_key, "prod/api");
            assert_eq!(events[0].class, FailureClass::CrashLoop);
        }

        #[test]
        fn producers_are_interchangeable() {
            let dir = tempfile::tempdir().unwrap();
            let producers: Vec<Box<dyn EventProducer>> = vec![
                Box::new(PipelineMonitor::new(dir.path().join("pipeline"))),
                Box::new(DeploymentMonitor::new(dir.path().join("deployment"))),
            ];

            let names: Vec<&str> = producers.iter().map(|p| p.name()).collect();
            assert_eq!(names, vec!["pipeline", "deployment"]);
        }
    }
}
