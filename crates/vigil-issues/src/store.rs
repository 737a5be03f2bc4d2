//! Issue storage.
//!
//! The [`IssueStore`] trait is the only place issue state lives. Two
//! operations carry the concurrency contract:
//!
//! - [`IssueStore::insert`] is check-and-insert: it refuses to create a second
//!   unresolved issue for a signature.
//! - [`IssueStore::update`] is compare-and-swap on [`Issue::version`]: a writer
//!   that read a stale copy gets [`IssueError::StoreConflict`] and must re-read.
//!
//! Together they rule out double creation and lost updates for a signature
//! without callers holding any lock of their own.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, info, warn};
use vigil_persist::JsonStore;

use crate::error::{IssueError, Result};
use crate::types::{EventSource, Issue, IssueFilter};

/// Storage backend for issues.
pub trait IssueStore: Send + Sync + fmt::Debug {
    /// Gets an issue by ID.
    fn get(&self, id: &str) -> Result<Option<Issue>>;

    /// Gets the unresolved issue for a signature, if any.
    fn find_open(&self, signature: &str) -> Result<Option<Issue>>;

    /// Gets every unresolved issue for a subject.
    fn find_open_by_subject(&self, source: EventSource, subject_key: &str) -> Result<Vec<Issue>>;

    /// Inserts a new issue and returns the stored copy.
    ///
    /// # Errors
    ///
    /// Returns `IssueError::StoreConflict` if an unresolved issue with the same
    /// signature, or any issue with the same ID, already exists.
    fn insert(&self, issue: Issue) -> Result<Issue>;

    /// Replaces an issue if its version still matches, returning the stored
    /// copy with the version bumped.
    ///
    /// # Errors
    ///
    /// Returns `IssueError::IssueNotFound` if the issue does not exist and
    /// `IssueError::StoreConflict` if the stored version differs or the update
    /// would reopen a resolved issue.
    fn update(&self, issue: Issue) -> Result<Issue>;

    /// Lists issues matching a filter, most recently seen first.
    fn list(&self, filter: &IssueFilter) -> Result<Vec<Issue>>;

    /// Lists every unresolved issue.
    fn unresolved(&self) -> Result<Vec<Issue>> {
        self.list(&IssueFilter::new().unresolved())
    }

    /// Deletes resolved issues resolved before `cutoff`, returning how many.
    fn purge_resolved_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    /// Makes all accepted writes durable.
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Re-reads and re-applies `apply` to an issue until its compare-and-swap
/// update lands.
///
/// `apply` returns `None` when the issue needs no change, in which case
/// nothing is written and `None` is returned.
///
/// # Errors
///
/// Returns `IssueError::IssueNotFound` if the issue does not exist and
/// `IssueError::RetriesExhausted` if every attempt conflicted.
pub fn update_with_retry<T>(
    store: &dyn IssueStore,
    id: &str,
    max_attempts: u32,
    mut apply: impl FnMut(&mut Issue) -> Option<T>,
) -> Result<Option<(Issue, T)>> {
    let mut signature = String::new();
    for attempt in 1..=max_attempts.max(1) {
        let mut issue = store.get(id)?.ok_or_else(|| IssueError::IssueNotFound {
            id: id.to_string(),
        })?;
        signature.clone_from(&issue.signature);

        let Some(value) = apply(&mut issue) else {
            return Ok(None);
        };

        match store.update(issue) {
            Ok(stored) => return Ok(Some((stored, value))),
            Err(e) if e.is_conflict() => {
                debug!(issue_id = %id, attempt, "issue changed underneath us, retrying");
            }
            Err(e) => return Err(e),
        }
    }

    Err(IssueError::RetriesExhausted {
        signature,
        attempts: max_attempts.max(1),
    })
}

/// Issues plus the unresolved-by-signature index.
#[derive(Debug, Default)]
struct StoreState {
    issues: HashMap<String, Issue>,
    open_by_signature: HashMap<String, String>,
}

/// How to reverse a mutation whose persistence failed.
enum Undo {
    Inserted { id: String },
    Updated { previous: Issue },
    Purged { removed: Vec<Issue> },
}

impl StoreState {
    fn from_issues(issues: Vec<Issue>) -> Self {
        let mut state = Self::default();
        for issue in issues {
            if !issue.is_resolved() {
                if let Some(existing_id) = state.open_by_signature.get(&issue.signature) {
                    let keep_existing = state
                        .issues
                        .get(existing_id)
                        .is_some_and(|e| e.last_seen >= issue.last_seen);
                    warn!(
                        signature = %issue.signature,
                        issue_id = %issue.id,
                        "snapshot holds two unresolved issues for one signature"
                    );
                    if keep_existing {
                        state.issues.insert(issue.id.clone(), issue);
                        continue;
                    }
                }
                state
                    .open_by_signature
                    .insert(issue.signature.clone(), issue.id.clone());
            }
            state.issues.insert(issue.id.clone(), issue);
        }
        state
    }

    fn find_open(&self, signature: &str) -> Option<Issue> {
        self.open_by_signature
            .get(signature)
            .and_then(|id| self.issues.get(id))
            .cloned()
    }

    fn find_open_by_subject(&self, source: EventSource, subject_key: &str) -> Vec<Issue> {
        let mut found: Vec<Issue> = self
            .open_by_signature
            .values()
            .filter_map(|id| self.issues.get(id))
            .filter(|i| i.source == source && i.subject_key == subject_key)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.first_seen.cmp(&b.first_seen).then_with(|| a.id.cmp(&b.id)));
        found
    }

    fn insert(&mut self, mut issue: Issue) -> Result<(Issue, Undo)> {
        if self.issues.contains_key(&issue.id) {
            return Err(IssueError::StoreConflict {
                signature: issue.signature,
            });
        }
        if !issue.is_resolved() && self.open_by_signature.contains_key(&issue.signature) {
            return Err(IssueError::StoreConflict {
                signature: issue.signature,
            });
        }

        issue.version = 1;
        if !issue.is_resolved() {
            self.open_by_signature
                .insert(issue.signature.clone(), issue.id.clone());
        }
        self.issues.insert(issue.id.clone(), issue.clone());

        let undo = Undo::Inserted {
            id: issue.id.clone(),
        };
        Ok((issue, undo))
    }

    fn update(&mut self, mut issue: Issue) -> Result<(Issue, Undo)> {
        let stored = self
            .issues
            .get(&issue.id)
            .ok_or_else(|| IssueError::IssueNotFound {
                id: issue.id.clone(),
            })?;

        if stored.version != issue.version
            || (stored.is_resolved() && !issue.is_resolved())
            || stored.signature != issue.signature
        {
            return Err(IssueError::StoreConflict {
                signature: issue.signature,
            });
        }

        issue.version += 1;
        if issue.is_resolved() && self.open_by_signature.get(&issue.signature) == Some(&issue.id) {
            self.open_by_signature.remove(&issue.signature);
        }

        let previous = self
            .issues
            .insert(issue.id.clone(), issue.clone())
            .ok_or_else(|| IssueError::IssueNotFound {
                id: issue.id.clone(),
            })?;
        Ok((issue, Undo::Updated { previous }))
    }

    fn purge_resolved_before(&mut self, cutoff: DateTime<Utc>) -> (usize, Undo) {
        let doomed: Vec<String> = self
            .issues
            .values()
            .filter(|i| i.resolved_at.is_some_and(|at| at < cutoff))
            .map(|i| i.id.clone())
            .collect();

        let removed: Vec<Issue> = doomed
            .iter()
            .filter_map(|id| self.issues.remove(id))
            .collect();
        (removed.len(), Undo::Purged { removed })
    }

    fn undo(&mut self, undo: Undo) {
        match undo {
            Undo::Inserted { id } => {
                if let Some(issue) = self.issues.remove(&id) {
                    if self.open_by_signature.get(&issue.signature) == Some(&id) {
                        self.open_by_signature.remove(&issue.signature);
                    }
                }
            }
            Undo::Updated { previous } => {
                if !previous.is_resolved() {
                    self.open_by_signature
                        .insert(previous.signature.clone(), previous.id.clone());
                }
                self.issues.insert(previous.id.clone(), previous);
            }
            Undo::Purged { removed } => {
                for issue in removed {
                    self.issues.insert(issue.id.clone(), issue);
                }
            }
        }
    }

    fn list(&self, filter: &IssueFilter) -> Vec<Issue> {
        let mut issues: Vec<Issue> = self
            .issues
            .values()
            .filter(|i| filter.matches(i))
            .cloned()
            .collect();
        issues.sort_by(|a, b| b.last_seen.cmp(&a.last_seen).then_with(|| a.id.cmp(&b.id)));
        if let Some(limit) = filter.limit {
            issues.truncate(limit);
        }
        issues
    }

    fn snapshot(&self) -> Vec<&Issue> {
        let mut issues: Vec<&Issue> = self.issues.values().collect();
        issues.sort_by(|a, b| a.first_seen.cmp(&b.first_seen).then_with(|| a.id.cmp(&b.id)));
        issues
    }
}

/// In-memory issue store.
#[derive(Debug, Default)]
pub struct MemoryIssueStore {
    state: RwLock<StoreState>,
}

impl MemoryIssueStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored issues.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().issues.len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl IssueStore for MemoryIssueStore {
    fn get(&self, id: &str) -> Result<Option<Issue>> {
        Ok(self.state.read().issues.get(id).cloned())
    }

    fn find_open(&self, signature: &str) -> Result<Option<Issue>> {
        Ok(self.state.read().find_open(signature))
    }

    fn find_open_by_subject(&self, source: EventSource, subject_key: &str) -> Result<Vec<Issue>> {
        Ok(self.state.read().find_open_by_subject(source, subject_key))
    }

    fn insert(&self, issue: Issue) -> Result<Issue> {
        self.state.write().insert(issue).map(|(issue, _)| issue)
    }

    fn update(&self, issue: Issue) -> Result<Issue> {
        self.state.write().update(issue).map(|(issue, _)| issue)
    }

    fn list(&self, filter: &IssueFilter) -> Result<Vec<Issue>> {
        Ok(self.state.read().list(filter))
    }

    fn purge_resolved_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let (count, _) = self.state.write().purge_resolved_before(cutoff);
        Ok(count)
    }
}

/// Issue store persisted as a JSON snapshot in a state directory.
///
/// Every accepted write is saved before the call returns; if saving fails the
/// in-memory change is rolled back and the error surfaces.
#[derive(Debug)]
pub struct JsonIssueStore {
    state: RwLock<StoreState>,
    snapshot: JsonStore,
}

impl JsonIssueStore {
    /// Name of the snapshot collection.
    pub const COLLECTION: &'static str = "issues";

    /// Opens the store in `state_dir`, loading any existing snapshot.
    ///
    /// # Errors
    ///
    /// Returns `IssueError::Persistence` if an existing snapshot cannot be
    /// read or parsed.
    pub fn open(state_dir: &Path) -> Result<Self> {
        let snapshot = JsonStore::new(state_dir, Self::COLLECTION);
        let issues: Vec<Issue> = snapshot.try_load()?.unwrap_or_default();
        debug!(count = issues.len(), path = %snapshot.path().display(), "loaded issues from disk");

        Ok(Self {
            state: RwLock::new(StoreState::from_issues(issues)),
            snapshot,
        })
    }

    /// Returns the number of stored issues.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().issues.len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flushes and releases the store.
    ///
    /// # Errors
    ///
    /// Returns `IssueError::Persistence` if the final snapshot fails.
    pub fn close(self) -> Result<()> {
        self.flush()?;
        info!(path = %self.snapshot.path().display(), "issue store closed");
        Ok(())
    }

    fn persist<T>(
        &self,
        mutate: impl FnOnce(&mut StoreState) -> Result<(T, Undo)>,
    ) -> Result<T> {
        let mut state = self.state.write();
        let (value, undo) = mutate(&mut state)?;

        if let Err(e) = self.snapshot.save(&state.snapshot()) {
            warn!(error = %e, "failed to persist issue store, rolling back");
            state.undo(undo);
            return Err(e.into());
        }
        Ok(value)
    }
}

impl IssueStore for JsonIssueStore {
    fn get(&self, id: &str) -> Result<Option<Issue>> {
        Ok(self.state.read().issues.get(id).cloned())
    }

    fn find_open(&self, signature: &str) -> Result<Option<Issue>> {
        Ok(self.state.read().find_open(signature))
    }

    fn find_open_by_subject(&self, source: EventSource, subject_key: &str) -> Result<Vec<Issue>> {
        Ok(self.state.read().find_open_by_subject(source, subject_key))
    }

    fn insert(&self, issue: Issue) -> Result<Issue> {
        self.persist(|state| state.insert(issue))
    }

    fn update(&self, issue: Issue) -> Result<Issue> {
        self.persist(|state| state.update(issue))
    }

    fn list(&self, filter: &IssueFilter) -> Result<Vec<Issue>> {
        Ok(self.state.read().list(filter))
    }

    fn purge_resolved_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.persist(|state| Ok(state.purge_resolved_before(cutoff)))
    }

    fn flush(&self) -> Result<()> {
        let state = self.state.read();
        self.snapshot.save(&state.snapshot())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Event, EventKind, FailureClass, IssueStatus, Severity};
    use chrono::Duration;

    fn test_issue(subject: &str) -> Issue {
        let event = Event::new(
            EventSource::Pipeline,
            subject,
            EventKind::Failure,
            FailureClass::Test,
            Utc::now(),
            serde_json::json!({}),
        );
        Issue::open(&event, Severity::Medium)
    }

    mod memory_store_tests {
        use super::*;

        #[test]
        fn insert_and_find() {
            let store = MemoryIssueStore::new();
            let issue = test_issue("ci@main");
            let signature = issue.signature.clone();

            let stored = store.insert(issue).unwrap();
            assert_eq!(stored.version, 1);
            assert_eq!(store.len(), 1);

            let found = store.find_open(&signature).unwrap().unwrap();
            assert_eq!(found.id, stored.id);
            assert_eq!(store.get(&stored.id).unwrap().unwrap().id, stored.id);
        }

        #[test]
        fn second_open_issue_for_signature_conflicts() {
            let store = MemoryIssueStore::new();
            store.insert(test_issue("ci@main")).unwrap();

            let err = store.insert(test_issue("ci@main")).unwrap_err();
            assert!(err.is_conflict());
            assert_eq!(store.len(), 1);
        }

        #[test]
        fn stale_update_conflicts() {
            let store = MemoryIssueStore::new();
            let stored = store.insert(test_issue("ci@main")).unwrap();

            let mut first = stored.clone();
            first.occurrence_count += 1;
            let updated = store.update(first).unwrap();
            assert_eq!(updated.version, 2);

            let mut stale = stored;
            stale.occurrence_count += 1;
            assert!(store.update(stale).unwrap_err().is_conflict());
            assert_eq!(store.get(&updated.id).unwrap().unwrap().occurrence_count, 2);
        }

        #[test]
        fn update_missing_issue() {
            let store = MemoryIssueStore::new();
            let err = store.update(test_issue("ci@main")).unwrap_err();
            assert!(matches!(err, IssueError::IssueNotFound { .. }));
        }

        #[test]
        fn resolving_frees_signature() {
            let store = MemoryIssueStore::new();
            let mut stored = store.insert(test_issue("ci@main")).unwrap();
            let signature = stored.signature.clone();

            stored.resolve(Utc::now());
            store.update(stored.clone()).unwrap();
            assert!(store.find_open(&signature).unwrap().is_none());

            let fresh = store.insert(test_issue("ci@main")).unwrap();
            assert_ne!(fresh.id, stored.id);
        }

        #[test]
        fn resolved_issue_cannot_be_reopened() {
            let store = MemoryIssueStore::new();
            let mut stored = store.insert(test_issue("ci@main")).unwrap();
            stored.resolve(Utc::now());
            let mut resolved = store.update(stored).unwrap();

            resolved.status = IssueStatus::Open;
            resolved.resolved_at = None;
            assert!(store.update(resolved).unwrap_err().is_conflict());
        }

        #[test]
        fn find_open_by_subject() {
            let store = MemoryIssueStore::new();
            store.insert(test_issue("ci@main")).unwrap();
            store.insert(test_issue("ci@dev")).unwrap();

            let found = store
                .find_open_by_subject(EventSource::Pipeline, "ci@main")
                .unwrap();
            assert_eq!(found.len(), 1);
            assert!(
                store
                    .find_open_by_subject(EventSource::Deployment, "ci@main")
                    .unwrap()
                    .is_empty()
            );
        }

        #[test]
        fn list_orders_by_last_seen_and_limits() {
            let store = MemoryIssueStore::new();
            let mut older = test_issue("a");
            older.last_seen = Utc::now() - Duration::hours(1);
            let newer = test_issue("b");
            store.insert(older).unwrap();
            store.insert(newer).unwrap();

            let all = store.list(&IssueFilter::new()).unwrap();
            assert_eq!(all[0].subject_key, "b");
            assert_eq!(all[1].subject_key, "a");

            let limited = store.list(&IssueFilter::new().limit(1)).unwrap();
            assert_eq!(limited.len(), 1);
        }

        #[test]
        fn purge_only_removes_old_resolved() {
            let store = MemoryIssueStore::new();
            let now = Utc::now();

            let mut old = store.insert(test_issue("old")).unwrap();
            old.resolve(now - Duration::days(40));
            store.update(old).unwrap();

            let mut recent = store.insert(test_issue("recent")).unwrap();
            recent.resolve(now);
            store.update(recent).unwrap();

            store.insert(test_issue("open")).unwrap();

            let purged = store.purge_resolved_before(now - Duration::days(30)).unwrap();
            assert_eq!(purged, 1);
            assert_eq!(store.len(), 2);
        }
    }

    mod retry_tests {
        use super::*;

        #[test]
        fn update_with_retry_applies_change() {
            let store = MemoryIssueStore::new();
            let stored = store.insert(test_issue("ci@main")).unwrap();

            let (updated, ()) = update_with_retry(&store, &stored.id, 3, |issue| {
                issue.occurrence_count += 1;
                Some(())
            })
            .unwrap()
            .unwrap();
            assert_eq!(updated.occurrence_count, 2);
            assert_eq!(updated.version, 2);
        }

        #[test]
        fn update_with_retry_recovers_from_conflict() {
            let store = MemoryIssueStore::new();
            let stored = store.insert(test_issue("ci@main")).unwrap();
            let mut interfered = false;

            let (updated, ()) = update_with_retry(&store, &stored.id, 3, |issue| {
                if !interfered {
                    // A concurrent writer lands first.
                    let mut other = issue.clone();
                    other.occurrence_count += 10;
                    store.update(other).unwrap();
                    interfered = true;
                }
                issue.occurrence_count += 1;
                Some(())
            })
            .unwrap()
            .unwrap();

            assert_eq!(updated.occurrence_count, 12);
        }

        #[test]
        fn update_with_retry_skips_when_unchanged() {
            let store = MemoryIssueStore::new();
            let stored = store.insert(test_issue("ci@main")).unwrap();

            let result = update_with_retry(&store, &stored.id, 3, |_| None::<()>).unwrap();
            assert!(result.is_none());
            assert_eq!(store.get(&stored.id).unwrap().unwrap().version, 1);
        }

        #[test]
        fn update_with_retry_gives_up() {
            let store = MemoryIssueStore::new();
            let stored = store.insert(test_issue("ci@main")).unwrap();

            let err = update_with_retry(&store, &stored.id, 2, |issue| {
                let mut other = issue.clone();
                other.occurrence_count += 1;
                store.update(other).unwrap();
                Some(())
            })
            .unwrap_err();
            assert!(matches!(err, IssueError::RetriesExhausted { attempts: 2, .. }));
        }

        #[test]
        fn update_with_retry_missing_issue() {
            let store = MemoryIssueStore::new();
            let err = update_with_retry(&store, "missing", 2, |_| Some(())).unwrap_err();
            assert!(matches!(err, IssueError::IssueNotFound { .. }));
        }
    }

    mod json_store_tests {
        use super::*;

        #[test]
        fn persists_across_reopen() {
            let dir = tempfile::tempdir().expect("tempdir");
            let signature;
            {
                let store = JsonIssueStore::open(dir.path()).unwrap();
                let issue = store.insert(test_issue("ci@main")).unwrap();
                signature = issue.signature.clone();
                store.close().unwrap();
            }

            let store = JsonIssueStore::open(dir.path()).unwrap();
            assert_eq!(store.len(), 1);
            let found = store.find_open(&signature).unwrap().unwrap();
            assert_eq!(found.version, 1);

            // The dedup index is rebuilt on load.
            assert!(store.insert(test_issue("ci@main")).unwrap_err().is_conflict());
        }

        #[test]
        fn corrupt_snapshot_fails_open() {
            let dir = tempfile::tempdir().expect("tempdir");
            std::fs::write(dir.path().join("issues.json"), b"[{").unwrap();
            assert!(JsonIssueStore::open(dir.path()).is_err());
        }

        #[test]
        fn failed_save_rolls_back() {
            let dir = tempfile::tempdir().expect("tempdir");
            let state_dir = dir.path().join("state");
            let store = JsonIssueStore::open(&state_dir).unwrap();
            // A regular file where the state directory should be makes saving fail.
            std::fs::write(&state_dir, b"not a directory").unwrap();

            assert!(store.insert(test_issue("ci@main")).is_err());
            assert!(store.is_empty());
        }
    }
}
