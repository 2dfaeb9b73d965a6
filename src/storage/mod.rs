//! # Flat-File JSON Storage
//!
//! A small key-value layer over the data directory. Every durable document in
//! the system (rounds, chunk manifests, the queue document, transcripts) is a
//! JSON file addressed by a relative key such as `rounds/<id>.json`.
//!
//! Writes go to a sibling temp file and are moved into place with `rename`,
//! so a crash mid-write can never leave a half-written document behind.
//! Callers only see keys and typed values; swapping this layer for an
//! embedded store would not change any component contract.

use crate::error::{AppError, AppResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::PathBuf;

/// Key-value store mapping relative string keys to JSON documents on disk.
#[derive(Debug)]
pub struct JsonKv {
    root: PathBuf,
}

impl JsonKv {
    /// Open (and create if needed) a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> AppResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|e| AppError::Persistence(format!("create {}: {}", root.display(), e)))?;
        Ok(Self { root })
    }

    /// Absolute path for a key. Exposed so stores that keep non-JSON data
    /// (chunk payloads, assembled artifacts) can share the same root.
    pub fn path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    /// Read and deserialize the document at `key`, or None if absent.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> AppResult<Option<T>> {
        let path = self.path(key);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(AppError::Persistence(format!(
                    "read {}: {}",
                    path.display(),
                    e
                )))
            }
        };
        let value = serde_json::from_str(&raw).map_err(|e| {
            AppError::Persistence(format!("parse {}: {}", path.display(), e))
        })?;
        Ok(Some(value))
    }

    /// Serialize `value` and atomically replace the document at `key`.
    ///
    /// The write lands in `<key>.tmp` first and is renamed over the target,
    /// so observers see either the old document or the new one, never a
    /// torn write.
    pub fn put<T: Serialize>(&self, key: &str, value: &T) -> AppResult<()> {
        let path = self.path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                AppError::Persistence(format!("create {}: {}", parent.display(), e))
            })?;
        }

        let raw = serde_json::to_string_pretty(value)
            .map_err(|e| AppError::Persistence(format!("serialize {}: {}", key, e)))?;

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, raw)
            .map_err(|e| AppError::Persistence(format!("write {}: {}", tmp.display(), e)))?;
        fs::rename(&tmp, &path).map_err(|e| {
            AppError::Persistence(format!("rename {} -> {}: {}", tmp.display(), path.display(), e))
        })?;
        Ok(())
    }

    /// Delete the document at `key`. Deleting a missing key is not an error.
    pub fn delete(&self, key: &str) -> AppResult<()> {
        let path = self.path(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::Persistence(format!(
                "delete {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Whether a document exists at `key`.
    pub fn exists(&self, key: &str) -> bool {
        self.path(key).is_file()
    }

    /// Names of the immediate subdirectories under `prefix` (used to
    /// enumerate per-round staging directories).
    pub fn list_subdirs(&self, prefix: &str) -> AppResult<Vec<String>> {
        let dir = self.path(prefix);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&dir)
            .map_err(|e| AppError::Persistence(format!("list {}: {}", dir.display(), e)))?
        {
            let entry =
                entry.map_err(|e| AppError::Persistence(format!("list {}: {}", dir.display(), e)))?;
            if entry.path().is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Doc {
        name: String,
        count: u32,
    }

    #[test]
    fn test_put_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let kv = JsonKv::new(dir.path()).unwrap();

        let doc = Doc {
            name: "round-1".to_string(),
            count: 3,
        };
        kv.put("rounds/round-1.json", &doc).unwrap();

        let loaded: Option<Doc> = kv.get("rounds/round-1.json").unwrap();
        assert_eq!(loaded, Some(doc));
    }

    #[test]
    fn test_get_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let kv = JsonKv::new(dir.path()).unwrap();
        let loaded: Option<Doc> = kv.get("rounds/nope.json").unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_put_replaces_and_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let kv = JsonKv::new(dir.path()).unwrap();

        kv.put("doc.json", &Doc { name: "a".into(), count: 1 }).unwrap();
        kv.put("doc.json", &Doc { name: "b".into(), count: 2 }).unwrap();

        let loaded: Doc = kv.get("doc.json").unwrap().unwrap();
        assert_eq!(loaded.name, "b");
        assert!(!kv.path("doc.json.tmp").exists());
        assert!(!kv.path("doc").with_extension("json.tmp").exists());
    }

    #[test]
    fn test_delete_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let kv = JsonKv::new(dir.path()).unwrap();
        assert!(kv.delete("never-there.json").is_ok());
    }

    #[test]
    fn test_list_subdirs() {
        let dir = tempfile::tempdir().unwrap();
        let kv = JsonKv::new(dir.path()).unwrap();
        std::fs::create_dir_all(kv.path("streams/r2/chunks")).unwrap();
        std::fs::create_dir_all(kv.path("streams/r1")).unwrap();

        let names = kv.list_subdirs("streams").unwrap();
        assert_eq!(names, vec!["r1".to_string(), "r2".to_string()]);
        assert!(kv.list_subdirs("absent").unwrap().is_empty());
    }
}
