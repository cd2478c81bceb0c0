//! File-backed backend: one JSON document per resource.
//!
//! Stands in for a real provider so `strato apply` works end to end without
//! cloud credentials. A created resource is a JSON file under the backend
//! directory; its outputs are a synthesized `resource_id` plus every scalar
//! parameter echoed back, which is what downstream refs resolve against.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::resource::{ParamValue, ResourceId};

use super::{BackendError, Outputs, ResourceBackend};

#[derive(Debug, Serialize, Deserialize)]
struct StoredResource {
  kind: String,
  parameters: BTreeMap<String, ParamValue>,
  outputs: Outputs,
}

/// Local [`ResourceBackend`] writing resources to a directory.
#[derive(Debug)]
pub struct LocalBackend {
  base_path: PathBuf,
}

impl LocalBackend {
  pub fn new(base_path: impl Into<PathBuf>) -> Self {
    Self {
      base_path: base_path.into(),
    }
  }

  fn resource_path(&self, id: &ResourceId) -> PathBuf {
    self.base_path.join(format!("{}.json", id.0))
  }

  fn write(&self, kind: &str, id: &ResourceId, parameters: &BTreeMap<String, ParamValue>) -> Result<Outputs, BackendError> {
    let outputs = synthesize_outputs(kind, id, parameters);

    let stored = StoredResource {
      kind: kind.to_string(),
      parameters: parameters.clone(),
      outputs: outputs.clone(),
    };

    fs::create_dir_all(&self.base_path).map_err(permanent_io)?;

    let path = self.resource_path(id);
    let temp_path = self.base_path.join(format!("{}.json.tmp", id.0));
    let content = serde_json::to_string_pretty(&stored).map_err(|e| BackendError::Permanent(e.to_string()))?;
    fs::write(&temp_path, &content).map_err(permanent_io)?;
    fs::rename(&temp_path, &path).map_err(permanent_io)?;

    debug!(resource = %id, kind, path = %path.display(), "local resource written");
    Ok(outputs)
  }
}

fn permanent_io(e: io::Error) -> BackendError {
  BackendError::Permanent(e.to_string())
}

/// Outputs for a locally "provisioned" resource: a stable id plus every
/// scalar parameter, stringified.
fn synthesize_outputs(kind: &str, id: &ResourceId, parameters: &BTreeMap<String, ParamValue>) -> Outputs {
  let mut outputs = Outputs::from([("resource_id".to_string(), format!("{kind}/{id}"))]);

  for (name, value) in parameters {
    let rendered = match value {
      ParamValue::String(s) => s.clone(),
      ParamValue::Int(i) => i.to_string(),
      ParamValue::Float(f) => f.to_string(),
      ParamValue::Bool(b) => b.to_string(),
      ParamValue::Ref(_) | ParamValue::List(_) | ParamValue::Map(_) => continue,
    };
    outputs.insert(name.clone(), rendered);
  }

  outputs
}

#[async_trait]
impl ResourceBackend for LocalBackend {
  async fn create(
    &self,
    kind: &str,
    id: &ResourceId,
    parameters: &BTreeMap<String, ParamValue>,
  ) -> Result<Outputs, BackendError> {
    self.write(kind, id, parameters)
  }

  async fn read(&self, _kind: &str, id: &ResourceId) -> Result<Option<Outputs>, BackendError> {
    let content = match fs::read_to_string(self.resource_path(id)) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(permanent_io(e)),
    };

    let stored: StoredResource = serde_json::from_str(&content).map_err(|e| BackendError::Permanent(e.to_string()))?;
    Ok(Some(stored.outputs))
  }

  async fn update(
    &self,
    kind: &str,
    id: &ResourceId,
    parameters: &BTreeMap<String, ParamValue>,
  ) -> Result<Outputs, BackendError> {
    self.write(kind, id, parameters)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[tokio::test]
  async fn create_persists_and_read_returns_outputs() {
    let dir = TempDir::new().unwrap();
    let backend = LocalBackend::new(dir.path());
    let id = ResourceId::from("storage");

    let parameters = BTreeMap::from([
      ("sku".to_string(), ParamValue::String("Standard_LRS".to_string())),
      ("endpoint".to_string(), ParamValue::String("https://blob".to_string())),
      ("replicas".to_string(), ParamValue::Int(3)),
    ]);

    let outputs = backend.create("storage-account", &id, &parameters).await.unwrap();
    assert_eq!(outputs["resource_id"], "storage-account/storage");
    assert_eq!(outputs["endpoint"], "https://blob");
    assert_eq!(outputs["replicas"], "3");

    let read_back = backend.read("storage-account", &id).await.unwrap().unwrap();
    assert_eq!(read_back, outputs);
  }

  #[tokio::test]
  async fn read_missing_resource_is_none() {
    let dir = TempDir::new().unwrap();
    let backend = LocalBackend::new(dir.path());

    let outputs = backend.read("storage-account", &"ghost".into()).await.unwrap();
    assert!(outputs.is_none());
  }
}
