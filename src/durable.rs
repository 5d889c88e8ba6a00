//! Crash-safe JSON persistence.
//!
//! A write stages the encoded value in a `<path>.tmp` sibling, re-parses the
//! staged bytes, keeps a `<path>.bak` copy of whatever was there before and
//! renames the staged file over the target. A reader of `<path>` sees either
//! the old document or the new one, never a torn write.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("failed to encode {}: {source}", path.display())]
    Serialize {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("io error while writing {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("staged file {} is not valid JSON: {source}", path.display())]
    Validation {
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupStatus {
    /// Nothing was at the target path.
    NotNeeded,
    Created,
    /// The previous content could not be copied aside; the write still went ahead.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReceipt {
    pub path: PathBuf,
    pub bytes: usize,
    pub backup: BackupStatus,
}

pub fn write_json<T: Serialize + ?Sized>(
    path: &Path,
    value: &T,
) -> Result<WriteReceipt, WriteError> {
    let staged = staging_path(path);
    let result = stage_and_swap(path, &staged, value);
    if result.is_err() && staged.exists() {
        if let Err(err) = fs::remove_file(&staged) {
            error!(path = %staged.display(), error = %err, "failed to clean up staged file");
        }
    }
    result
}

pub fn backup_path(path: &Path) -> PathBuf {
    sibling(path, "bak")
}

pub fn staging_path(path: &Path) -> PathBuf {
    sibling(path, "tmp")
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

fn stage_and_swap<T: Serialize + ?Sized>(
    path: &Path,
    staged: &Path,
    value: &T,
) -> Result<WriteReceipt, WriteError> {
    let io_err = |source: io::Error| WriteError::Io {
        path: path.to_path_buf(),
        source,
    };

    let encoded = serde_json::to_vec_pretty(value).map_err(|source| WriteError::Serialize {
        path: path.to_path_buf(),
        source,
    })?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }

    let mut file = File::create(staged).map_err(io_err)?;
    file.write_all(&encoded).map_err(io_err)?;
    file.sync_all().map_err(io_err)?;
    drop(file);

    let reread = fs::read(staged).map_err(io_err)?;
    serde_json::from_slice::<serde_json::Value>(&reread).map_err(|source| {
        WriteError::Validation {
            path: staged.to_path_buf(),
            source,
        }
    })?;

    let backup = if path.exists() {
        match fs::copy(path, backup_path(path)) {
            Ok(_) => BackupStatus::Created,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to back up previous content");
                BackupStatus::Failed
            }
        }
    } else {
        BackupStatus::NotNeeded
    };

    // rename replaces the target in one step, so it is never left missing.
    fs::rename(staged, path).map_err(io_err)?;

    Ok(WriteReceipt {
        path: path.to_path_buf(),
        bytes: encoded.len(),
        backup,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn first_write_creates_parents_without_backup() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stats").join("daily").join("2024-01-01.json");

        let receipt = write_json(&path, &json!({"count": 0, "users": {}})).unwrap();

        assert_eq!(receipt.backup, BackupStatus::NotNeeded);
        assert!(!staging_path(&path).exists());
        let stored: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(stored, json!({"count": 0, "users": {}}));
    }

    #[test]
    fn overwrite_keeps_previous_content_as_backup() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("summary.json");
        write_json(&path, &json!({"totalCheckIns": 1})).unwrap();

        let receipt = write_json(&path, &json!({"totalCheckIns": 2})).unwrap();

        assert_eq!(receipt.backup, BackupStatus::Created);
        let backup: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(backup_path(&path)).unwrap()).unwrap();
        assert_eq!(backup, json!({"totalCheckIns": 1}));
        let current: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(current, json!({"totalCheckIns": 2}));
    }

    #[test]
    fn crash_before_rename_leaves_target_untouched() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("leaderboard.json");
        write_json(&path, &json!({"data": []})).unwrap();
        let before = fs::read_to_string(&path).unwrap();

        // A run that died after staging but before the rename.
        fs::write(staging_path(&path), b"{\"data\": [ {\"user\"").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), before);

        // The next run overwrites the stale staged file and completes.
        write_json(&path, &json!({"data": [1]})).unwrap();
        assert!(!staging_path(&path).exists());
        let after: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(after, json!({"data": [1]}));
    }

    #[test]
    fn encode_failure_reports_error_and_keeps_target() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("summary.json");
        write_json(&path, &json!({"ok": true})).unwrap();
        let before = fs::read_to_string(&path).unwrap();

        let mut bad = BTreeMap::new();
        bad.insert((1u8, 2u8), 3u8);
        let err = write_json(&path, &bad).unwrap_err();

        assert!(matches!(err, WriteError::Serialize { .. }));
        assert_eq!(fs::read_to_string(&path).unwrap(), before);
        assert!(!staging_path(&path).exists());
    }
}
