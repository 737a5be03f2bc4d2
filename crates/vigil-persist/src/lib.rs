//! JSON file-backed persistence for Vigil issue state.
//!
//! [`JsonStore`] keeps one named collection per file inside a state
//! directory. Writes go to a temporary sibling first and are renamed into
//! place, so a crash mid-write leaves the previous snapshot intact.

#![forbid(unsafe_code)]

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

/// A named JSON snapshot file inside a state directory.
#[derive(Debug, Clone)]
pub struct JsonStore {
    path: PathBuf,
}

impl JsonStore {
    /// Create a store for the collection `name` under `state_dir`.
    ///
    /// The directory is created lazily on the first save.
    pub fn new(state_dir: &Path, name: &str) -> Self {
        Self {
            path: state_dir.join(format!("{name}.json")),
        }
    }

    /// Path of the snapshot file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the snapshot, reporting read and parse failures.
    ///
    /// Returns `Ok(None)` when no snapshot exists yet.
    pub fn try_load<T>(&self) -> io::Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        let value = serde_json::from_slice(&bytes)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(Some(value))
    }

    /// Atomically replace the snapshot with `value`.
    pub fn save<T>(&self, value: &T) -> io::Result<()>
    where
        T: Serialize + ?Sized,
    {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let bytes = serde_json::to_vec_pretty(value)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, &self.path)?;

        debug!(path = %self.path.display(), bytes = bytes.len(), "snapshot saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_load_missing_returns_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonStore::new(dir.path(), "issues");

        let loaded: Option<HashMap<String, u32>> = store.try_load().expect("load");
        assert!(loaded.is_none());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonStore::new(dir.path(), "issues");

        let mut data = HashMap::new();
        data.insert("build-main".to_string(), 3_u32);
        store.save(&data).expect("save");

        let loaded: HashMap<String, u32> = store.try_load().expect("load").unwrap_or_default();
        assert_eq!(loaded.get("build-main"), Some(&3));
        assert!(store.path().ends_with("issues.json"));
    }

    #[test]
    fn test_save_creates_nested_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let nested = dir.path().join("state").join("vigil");
        let store = JsonStore::new(&nested, "issues");

        store.save(&vec![1, 2, 3]).expect("save");
        assert!(nested.join("issues.json").exists());
        assert!(!nested.join("issues.json.tmp").exists());
    }

    #[test]
    fn test_corrupt_snapshot() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonStore::new(dir.path(), "issues");
        fs::write(store.path(), b"{not json").expect("write");

        let result: io::Result<Option<HashMap<String, u32>>> = store.try_load();
        assert_eq!(result.map(|_| ()).unwrap_err().kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_save_overwrites_previous_snapshot() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonStore::new(dir.path(), "issues");
        store.save(&1_u8).expect("save");
        store.save(&2_u8).expect("save");

        let loaded: Option<u8> = store.try_load().expect("load");
        assert_eq!(loaded, Some(2));
    }
}
