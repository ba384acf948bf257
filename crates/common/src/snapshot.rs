//! Whole-collection JSON snapshots.
//!
//! Every write goes to a temporary file in the target's directory and is then
//! renamed over the target, so a crash mid-write leaves the previous snapshot
//! intact.

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Serialize `value` as pretty JSON and atomically replace `path` with it
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create snapshot directory {}", dir.display()))?;

    let bytes = serde_json::to_vec_pretty(value).context("failed to serialize snapshot")?;

    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to create temp file in {}", dir.display()))?;
    tmp.write_all(&bytes)
        .context("failed to write snapshot to temp file")?;
    tmp.as_file()
        .sync_all()
        .context("failed to sync snapshot temp file")?;
    tmp.persist(path)
        .with_context(|| format!("failed to move snapshot into place at {}", path.display()))?;

    Ok(())
}

/// Load a snapshot. A missing file is `Ok(None)`; unreadable or corrupt
/// content is an error.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }

    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let value = serde_json::from_slice(&bytes)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(Some(value))
}

/// Load a snapshot, falling back to `T::default()` when the file is missing
/// or cannot be parsed. Failures are logged.
pub fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    match read_json(path) {
        Ok(Some(value)) => value,
        Ok(None) => T::default(),
        Err(e) => {
            tracing::error!(path = %path.display(), "Failed to load snapshot, starting empty: {:#}", e);
            T::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[test]
    fn test_write_creates_parent_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("students.json");

        let mut map = BTreeMap::new();
        map.insert("1".to_string(), "Alice".to_string());
        write_json(&path, &map).unwrap();

        let loaded: Option<BTreeMap<String, String>> = read_json(&path).unwrap();
        assert_eq!(loaded, Some(map));
    }

    #[test]
    fn test_write_replaces_previous_snapshot() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("attendance.json");

        write_json(&path, &vec![1, 2, 3]).unwrap();
        write_json(&path, &vec![4]).unwrap();

        let loaded: Option<Vec<i32>> = read_json(&path).unwrap();
        assert_eq!(loaded, Some(vec![4]));

        // No temp files are left behind next to the snapshot
        let entries = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_missing_file_is_none() {
        let dir = TempDir::new().unwrap();
        let loaded: Option<Vec<i32>> = read_json(&dir.path().join("absent.json")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_corrupt_file_falls_back_to_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("attendance.json");
        fs::write(&path, b"[{\"student_id\": ").unwrap();

        assert!(read_json::<Vec<i32>>(&path).is_err());
        let loaded: Vec<i32> = read_json_or_default(&path);
        assert!(loaded.is_empty());
    }
}
