//! Shared build status records: a best-effort JSON bulletin board on
//! network storage, written by many concurrent build agents with no
//! locking.
//!
//! All I/O tolerates the realities of flaky network filesystems: files
//! that momentarily appear absent, partially-written or corrupt records,
//! and directory-creation races. Updates are lossy-but-eventually-visible
//! by design; this store is a coordination signal, not a ledger.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::warn;

use crate::error::Result;

/// Retry counts and pauses for status-record I/O.
#[derive(Debug, Clone)]
pub struct StoreTiming {
    /// Pause before re-checking a file that appears absent (filesystem
    /// visibility lag).
    pub visibility_pause: Duration,
    /// Attempts to read and parse the record before treating it as empty.
    pub read_attempts: u32,
    pub read_pause: Duration,
    /// Attempts when blocking on a key another process may still write.
    pub block_attempts: u32,
    pub block_pause: Duration,
    /// Attempts to create the record's directory tree.
    pub mkdir_attempts: u32,
    pub mkdir_pause: Duration,
}

impl Default for StoreTiming {
    fn default() -> Self {
        Self {
            visibility_pause: Duration::from_millis(200),
            read_attempts: 5,
            read_pause: Duration::from_secs(5),
            block_attempts: 10,
            block_pause: Duration::from_secs(1),
            mkdir_attempts: 20,
            mkdir_pause: Duration::from_secs(10),
        }
    }
}

impl StoreTiming {
    /// All pauses zeroed; for tests and local tooling.
    pub fn immediate() -> Self {
        Self {
            visibility_pause: Duration::ZERO,
            read_pause: Duration::ZERO,
            block_pause: Duration::ZERO,
            mkdir_pause: Duration::ZERO,
            ..Self::default()
        }
    }
}

/// One build slot's status record.
pub struct StatusStore {
    path: PathBuf,
    timing: StoreTiming,
}

impl StatusStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_timing(path, StoreTiming::default())
    }

    pub fn with_timing(path: impl Into<PathBuf>, timing: StoreTiming) -> Self {
        Self {
            path: path.into(),
            timing,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the whole record, tolerantly. Absent files and records that
    /// stay unparseable through the retry budget both read as empty.
    pub fn read_record(&self) -> Map<String, Value> {
        if !self.path.exists() {
            thread::sleep(self.timing.visibility_pause);
            if !self.path.exists() {
                return Map::new();
            }
            warn!(path = %self.path.display(), "network hiccup detected");
        }

        for attempt in 0..self.timing.read_attempts {
            if attempt > 0 {
                thread::sleep(self.timing.read_pause);
            }
            match std::fs::read_to_string(&self.path) {
                Ok(text) => match serde_json::from_str::<Map<String, Value>>(&text) {
                    Ok(record) => return record,
                    Err(e) => {
                        warn!(path = %self.path.display(), error = %e, "status record unparseable");
                    }
                },
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "status record unreadable");
                }
            }
        }
        // failed to parse several times; concurrent writers may have
        // clobbered it, treat as empty
        Map::new()
    }

    fn write_record(&self, record: &Map<String, Value>) -> Result<()> {
        self.ensure_parent_dir();
        let text = serde_json::to_string(record)?;
        std::fs::write(&self.path, text)?;
        Ok(())
    }

    /// Create the record's directory tree with bounded retries. Creation
    /// errors are tolerated when another writer got there first; a
    /// genuinely missing tree surfaces as the subsequent write failure.
    fn ensure_parent_dir(&self) {
        let dir = match self.path.parent() {
            Some(d) if !d.as_os_str().is_empty() => d,
            _ => return,
        };
        let mut tries = 0;
        while !dir.exists() && tries < self.timing.mkdir_attempts {
            tries += 1;
            if tries > 1 {
                warn!(path = %dir.display(), "failed to make status directory, retrying");
                thread::sleep(self.timing.mkdir_pause);
            }
            if let Err(e) = std::fs::create_dir_all(dir) {
                if dir.exists() {
                    // race with another build agent
                    return;
                }
                warn!(path = %dir.display(), error = %e, "could not create status directory");
            }
        }
    }

    /// Read one key. With `block`, retries a bounded number of times in
    /// case another process has not flushed the record yet; without it,
    /// absence is reported immediately.
    pub fn get(&self, key: &str, block: bool) -> Option<Value> {
        let attempts = if block { self.timing.block_attempts } else { 1 };
        for attempt in 0..attempts {
            if attempt > 0 {
                thread::sleep(self.timing.block_pause);
            }
            let record = self.read_record();
            if let Some(value) = record.get(key) {
                return Some(value.clone());
            }
        }
        None
    }

    /// Merge one key into the record and rewrite it whole. Concurrent
    /// writers may race and one update may be lost; callers treat the
    /// store as eventually visible, not atomically applied.
    pub fn set(&self, key: impl Into<String>, value: Value) -> Result<()> {
        let mut record = self.read_record();
        record.insert(key.into(), value);
        self.write_record(&record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_store(dir: &Path) -> StatusStore {
        StatusStore::with_timing(
            dir.join("results/mesa/x86_64/debug/tgl/_build_info.txt"),
            StoreTiming::immediate(),
        )
    }

    #[test]
    fn test_set_then_get_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = make_store(tmp.path());
        // backing file does not exist at the first read attempt
        store.set("state", json!("running")).unwrap();
        assert_eq!(store.get("state", true), Some(json!("running")));
    }

    #[test]
    fn test_get_missing_key_without_block() {
        let tmp = tempfile::tempdir().unwrap();
        let store = make_store(tmp.path());
        store.set("state", json!("running")).unwrap();
        assert_eq!(store.get("score", false), None);
    }

    #[test]
    fn test_get_missing_key_with_block_gives_up() {
        let tmp = tempfile::tempdir().unwrap();
        let store = make_store(tmp.path());
        assert_eq!(store.get("state", true), None);
    }

    #[test]
    fn test_set_merges_existing_keys() {
        let tmp = tempfile::tempdir().unwrap();
        let store = make_store(tmp.path());
        store.set("state", json!("running")).unwrap();
        store.set("score", json!(42)).unwrap();
        assert_eq!(store.get("state", false), Some(json!("running")));
        assert_eq!(store.get("score", false), Some(json!(42)));
    }

    #[test]
    fn test_corrupt_record_reads_as_empty_and_recovers() {
        let tmp = tempfile::tempdir().unwrap();
        let store = make_store(tmp.path());
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(store.path(), b"{ not json").unwrap();

        assert_eq!(store.get("state", false), None);
        store.set("state", json!("done")).unwrap();
        assert_eq!(store.get("state", false), Some(json!("done")));
    }

    #[test]
    fn test_record_is_plain_json_object() {
        let tmp = tempfile::tempdir().unwrap();
        let store = make_store(tmp.path());
        store.set("state", json!("running")).unwrap();
        let text = std::fs::read_to_string(store.path()).unwrap();
        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["state"], json!("running"));
    }
}
