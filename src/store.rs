use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::durable::{self, WriteError, WriteReceipt};
use crate::models::DailyLedger;

/// Run-local view of the flat-file store.
///
/// Each file is parsed at most once per run. Every read hands out a fresh
/// deep copy of the cached document, so a stage that mutates what it read
/// cannot leak that mutation into a later stage before it is committed.
/// Unreadable, oversized or malformed files read as absent.
#[derive(Debug)]
pub struct JsonStore {
    max_file_bytes: u64,
    cache: HashMap<PathBuf, Value>,
}

impl JsonStore {
    pub fn new(max_file_bytes: u64) -> Self {
        Self {
            max_file_bytes,
            cache: HashMap::new(),
        }
    }

    pub fn read<T: DeserializeOwned>(&mut self, path: &Path) -> Option<T> {
        let value = self.read_value(path)?;
        match serde_json::from_value(value) {
            Ok(parsed) => Some(parsed),
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "unexpected document shape; using default"
                );
                None
            }
        }
    }

    pub fn read_or_default<T: DeserializeOwned + Default>(&mut self, path: &Path) -> T {
        self.read(path).unwrap_or_default()
    }

    pub fn write<T: Serialize>(
        &mut self,
        path: &Path,
        value: &T,
    ) -> Result<WriteReceipt, WriteError> {
        let receipt = durable::write_json(path, value)?;
        match serde_json::to_value(value) {
            Ok(cached) => {
                self.cache.insert(path.to_path_buf(), cached);
            }
            Err(_) => {
                self.cache.remove(path);
            }
        }
        Ok(receipt)
    }

    /// Loads every `YYYY-MM-DD.json` ledger under `dir`, oldest first.
    pub fn daily_history(&mut self, dir: &Path) -> BTreeMap<NaiveDate, DailyLedger> {
        let mut history = BTreeMap::new();
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                info!(dir = %dir.display(), "no daily ledgers yet");
                return history;
            }
            Err(err) => {
                warn!(dir = %dir.display(), error = %err, "failed to list daily ledgers");
                return history;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let Some(date) = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| NaiveDate::parse_from_str(stem, "%Y-%m-%d").ok())
            else {
                debug!(path = %path.display(), "skipping non-ledger file");
                continue;
            };
            let ledger: DailyLedger = self.read_or_default(&path);
            debug!(%date, count = ledger.count, "loaded daily ledger");
            history.insert(date, ledger);
        }

        info!(dir = %dir.display(), files = history.len(), "loaded daily ledgers");
        history
    }

    fn read_value(&mut self, path: &Path) -> Option<Value> {
        if let Some(cached) = self.cache.get(path) {
            return Some(cached.clone());
        }

        let metadata = match fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return None,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to stat file");
                return None;
            }
        };
        if metadata.len() > self.max_file_bytes {
            warn!(
                path = %path.display(),
                size = metadata.len(),
                max = self.max_file_bytes,
                "file too large; treating as absent"
            );
            return None;
        }

        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to read file");
                return None;
            }
        };
        match serde_json::from_str::<Value>(&raw) {
            Ok(parsed) => {
                self.cache.insert(path.to_path_buf(), parsed.clone());
                Some(parsed)
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "corrupt JSON; treating as absent");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserStreakRecord;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn reads_are_deep_copies() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("2024-01-01.json");
        fs::write(&path, r#"{"count":1,"users":{"0xaa":true}}"#).unwrap();
        let mut store = JsonStore::new(1024);

        let mut first: DailyLedger = store.read(&path).unwrap();
        first.mark("0xbb");
        let second: DailyLedger = store.read(&path).unwrap();

        assert_eq!(second.count, 1);
        assert!(!second.contains("0xbb"));
    }

    #[test]
    fn corrupt_and_oversized_files_read_as_absent() {
        let dir = tempdir().unwrap();
        let corrupt = dir.path().join("corrupt.json");
        let large = dir.path().join("large.json");
        fs::write(&corrupt, "{not json").unwrap();
        fs::write(&large, json!({"padding": "x".repeat(64)}).to_string()).unwrap();
        let mut store = JsonStore::new(32);

        let record: UserStreakRecord = store.read_or_default(&corrupt);
        assert_eq!(record, UserStreakRecord::default());
        assert!(store.read::<Value>(&large).is_none());
        assert!(store.read::<Value>(&dir.path().join("missing.json")).is_none());
    }

    #[test]
    fn writes_refresh_the_cache() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("summary.json");
        let mut store = JsonStore::new(1024);
        store.write(&path, &json!({"totalCheckIns": 1})).unwrap();
        store.write(&path, &json!({"totalCheckIns": 2})).unwrap();

        let value: Value = store.read(&path).unwrap();
        assert_eq!(value, json!({"totalCheckIns": 2}));
    }

    #[test]
    fn history_is_ordered_and_skips_foreign_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("2024-01-03.json"), r#"{"count":0,"users":{}}"#).unwrap();
        fs::write(dir.path().join("2024-01-01.json"), r#"{"count":1,"users":{"0xaa":true}}"#)
            .unwrap();
        fs::write(dir.path().join("2024-01-02.json"), "garbage").unwrap();
        fs::write(dir.path().join("2024-01-01.json.bak"), "{}").unwrap();
        fs::write(dir.path().join("notes.json"), "{}").unwrap();
        let mut store = JsonStore::new(1024);

        let history = store.daily_history(dir.path());

        let dates: Vec<String> = history.keys().map(|d| d.to_string()).collect();
        assert_eq!(dates, vec!["2024-01-01", "2024-01-02", "2024-01-03"]);
        assert_eq!(history.values().next().unwrap().count, 1);
        assert_eq!(history.values().nth(1).unwrap(), &DailyLedger::default());
    }

    #[test]
    fn missing_history_dir_is_empty() {
        let dir = tempdir().unwrap();
        let mut store = JsonStore::new(1024);
        assert!(store.daily_history(&dir.path().join("daily")).is_empty());
    }
}
