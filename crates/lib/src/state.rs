//! Apply record persistence.
//!
//! One JSON file per resource id under a state directory:
//!
//! ```text
//! {state_dir}/
//! ├── storage.json
//! └── backend.json
//! ```
//!
//! Records are written atomically (temp file + rename). `last_applied` is
//! only ever advanced after a confirmed successful backend operation, so
//! planning always sees the last committed snapshot, never a partial one.
//! Writes for distinct ids are independent.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::backend::Outputs;
use crate::resource::ResourceId;

/// Errors from apply record storage.
#[derive(Debug, Error)]
pub enum StateError {
  #[error("failed to create state directory: {0}")]
  CreateDir(#[source] io::Error),

  #[error("failed to read apply record: {0}")]
  Read(#[source] io::Error),

  #[error("failed to write apply record: {0}")]
  Write(#[source] io::Error),

  #[error("failed to parse apply record: {0}")]
  Parse(#[source] serde_json::Error),

  #[error("failed to serialize apply record: {0}")]
  Serialize(#[source] serde_json::Error),
}

/// Status of the most recent apply attempt for a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplyStatus {
  Succeeded,
  Failed,
  Pending,
}

/// Snapshot committed by the last successful apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedState {
  /// Hash of the fully resolved parameter snapshot that was applied.
  pub params_hash: String,

  /// Outputs returned by the backend.
  pub outputs: Outputs,
}

/// Persisted per-resource record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyRecord {
  pub status: ApplyStatus,

  /// Unix timestamp of the last status change.
  pub updated_at: u64,

  /// Last successfully applied snapshot, if any. A record whose last apply
  /// attempt failed keeps the previous successful snapshot here.
  pub last_applied: Option<AppliedState>,
}

impl ApplyRecord {
  /// Record for a confirmed successful apply.
  pub fn succeeded(params_hash: String, outputs: Outputs) -> Self {
    Self {
      status: ApplyStatus::Succeeded,
      updated_at: unix_timestamp(),
      last_applied: Some(AppliedState { params_hash, outputs }),
    }
  }

  /// Outputs of the last successful apply, if any.
  pub fn outputs(&self) -> Option<&Outputs> {
    self.last_applied.as_ref().map(|a| &a.outputs)
  }
}

/// File-backed state recorder.
#[derive(Debug)]
pub struct StateStore {
  base_path: PathBuf,
}

impl StateStore {
  /// Create a store rooted at the given directory. The directory is created
  /// lazily on first write.
  pub fn new(base_path: impl Into<PathBuf>) -> Self {
    Self {
      base_path: base_path.into(),
    }
  }

  /// The directory this store writes into.
  pub fn base_path(&self) -> &PathBuf {
    &self.base_path
  }

  fn record_path(&self, id: &ResourceId) -> PathBuf {
    self.base_path.join(format!("{}.json", id.0))
  }

  /// Load the record for a resource, if one exists.
  pub fn get(&self, id: &ResourceId) -> Result<Option<ApplyRecord>, StateError> {
    let path = self.record_path(id);

    let content = match fs::read_to_string(&path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(StateError::Read(e)),
    };

    let record = serde_json::from_str(&content).map_err(StateError::Parse)?;
    Ok(Some(record))
  }

  /// Write the record for a resource atomically (temp file + rename).
  pub fn put(&self, id: &ResourceId, record: &ApplyRecord) -> Result<(), StateError> {
    fs::create_dir_all(&self.base_path).map_err(StateError::CreateDir)?;

    let path = self.record_path(id);
    let temp_path = self.base_path.join(format!("{}.json.tmp", id.0));

    let content = serde_json::to_string_pretty(record).map_err(StateError::Serialize)?;
    fs::write(&temp_path, &content).map_err(StateError::Write)?;
    fs::rename(&temp_path, &path).map_err(StateError::Write)?;

    debug!(resource = %id, status = ?record.status, "apply record written");
    Ok(())
  }

  /// Flip a resource's status to failed, keeping any previously committed
  /// snapshot intact.
  pub fn mark_failed(&self, id: &ResourceId) -> Result<(), StateError> {
    let record = ApplyRecord {
      status: ApplyStatus::Failed,
      updated_at: unix_timestamp(),
      last_applied: self.get(id)?.and_then(|r| r.last_applied),
    };
    self.put(id, &record)
  }

  /// Load every record in the store.
  pub fn all(&self) -> Result<BTreeMap<ResourceId, ApplyRecord>, StateError> {
    let mut records = BTreeMap::new();

    let entries = match fs::read_dir(&self.base_path) {
      Ok(entries) => entries,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(records),
      Err(e) => return Err(StateError::Read(e)),
    };

    for entry in entries {
      let entry = entry.map_err(StateError::Read)?;
      let path = entry.path();
      let Some(stem) = path.file_name().and_then(|n| n.to_str()).and_then(|n| n.strip_suffix(".json")) else {
        continue;
      };

      let id = ResourceId(stem.to_string());
      if let Some(record) = self.get(&id)? {
        records.insert(id, record);
      }
    }

    Ok(records)
  }
}

fn unix_timestamp() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_secs())
    .unwrap_or(0)
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn outputs(pairs: &[(&str, &str)]) -> Outputs {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
  }

  #[test]
  fn get_returns_none_for_unknown_resource() {
    let dir = TempDir::new().unwrap();
    let store = StateStore::new(dir.path());

    assert!(store.get(&"storage".into()).unwrap().is_none());
  }

  #[test]
  fn put_then_get_roundtrips() {
    let dir = TempDir::new().unwrap();
    let store = StateStore::new(dir.path());

    let record = ApplyRecord::succeeded("abc123".to_string(), outputs(&[("endpoint", "https://blob")]));
    store.put(&"storage".into(), &record).unwrap();

    let loaded = store.get(&"storage".into()).unwrap().unwrap();
    assert_eq!(loaded, record);
  }

  #[test]
  fn mark_failed_keeps_last_snapshot() {
    let dir = TempDir::new().unwrap();
    let store = StateStore::new(dir.path());

    let record = ApplyRecord::succeeded("abc123".to_string(), outputs(&[("endpoint", "https://blob")]));
    store.put(&"storage".into(), &record).unwrap();
    store.mark_failed(&"storage".into()).unwrap();

    let loaded = store.get(&"storage".into()).unwrap().unwrap();
    assert_eq!(loaded.status, ApplyStatus::Failed);
    assert_eq!(loaded.last_applied, record.last_applied);
  }

  #[test]
  fn mark_failed_without_prior_record() {
    let dir = TempDir::new().unwrap();
    let store = StateStore::new(dir.path());

    store.mark_failed(&"fresh".into()).unwrap();

    let loaded = store.get(&"fresh".into()).unwrap().unwrap();
    assert_eq!(loaded.status, ApplyStatus::Failed);
    assert!(loaded.last_applied.is_none());
  }

  #[test]
  fn all_lists_every_record() {
    let dir = TempDir::new().unwrap();
    let store = StateStore::new(dir.path());

    store
      .put(&"a".into(), &ApplyRecord::succeeded("h1".to_string(), Outputs::new()))
      .unwrap();
    store
      .put(&"b".into(), &ApplyRecord::succeeded("h2".to_string(), Outputs::new()))
      .unwrap();

    let all = store.all().unwrap();
    assert_eq!(all.len(), 2);
    assert!(all.contains_key(&ResourceId::from("a")));
    assert!(all.contains_key(&ResourceId::from("b")));
  }

  #[test]
  fn all_on_missing_directory_is_empty() {
    let dir = TempDir::new().unwrap();
    let store = StateStore::new(dir.path().join("never-created"));

    assert!(store.all().unwrap().is_empty());
  }
}
