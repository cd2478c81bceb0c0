//! Declaration set loading.
//!
//! The input boundary is a TOML file with one table per resource:
//!
//! ```toml
//! [resources.storage]
//! kind = "storage-account"
//!
//! [resources.storage.parameters]
//! sku = "Standard_LRS"
//!
//! [resources.backend]
//! kind = "compute-service"
//! depends_on = ["storage"]
//!
//! [resources.backend.parameters]
//! blob_url = { ref = "storage", output = "endpoint" }
//! ```
//!
//! `deploy = false` marks a resource as "reuse existing": it is an explicit
//! per-resource choice, defaulting to deploy.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::resource::{DeclarationSet, ParamValue, ResourceId, ResourceSpec};

/// Errors that can occur while loading a declaration set.
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read declarations: {0}")]
  Io(#[from] std::io::Error),

  #[error("failed to parse declarations: {0}")]
  Parse(#[from] toml::de::Error),

  #[error("declaration set contains no resources")]
  Empty,

  #[error("invalid resource id '{0}': ids must be non-empty and use only [A-Za-z0-9._-]")]
  InvalidId(String),
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
  #[serde(default)]
  resources: BTreeMap<String, RawResource>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawResource {
  kind: String,

  #[serde(default = "default_deploy")]
  deploy: bool,

  #[serde(default)]
  parameters: BTreeMap<String, ParamValue>,

  #[serde(default)]
  depends_on: Vec<String>,
}

fn default_deploy() -> bool {
  true
}

/// Load a declaration set from a TOML file.
pub fn load_declarations(path: &Path) -> Result<DeclarationSet, ConfigError> {
  let content = fs::read_to_string(path)?;
  let specs = parse_declarations(&content)?;
  debug!(path = %path.display(), resources = specs.len(), "loaded declarations");
  Ok(specs)
}

/// Parse a declaration set from TOML text.
pub fn parse_declarations(content: &str) -> Result<DeclarationSet, ConfigError> {
  let file: ConfigFile = toml::from_str(content)?;

  if file.resources.is_empty() {
    return Err(ConfigError::Empty);
  }

  let mut specs = DeclarationSet::new();
  for (id, raw) in file.resources {
    validate_id(&id)?;
    let id = ResourceId(id);
    specs.insert(
      id.clone(),
      ResourceSpec {
        id,
        kind: raw.kind,
        deploy: raw.deploy,
        parameters: raw.parameters,
        depends_on: raw.depends_on.into_iter().map(ResourceId).collect(),
      },
    );
  }

  Ok(specs)
}

/// Resource ids become state file names, so keep them path-safe.
fn validate_id(id: &str) -> Result<(), ConfigError> {
  let valid = !id.is_empty()
    && id
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

  if valid { Ok(()) } else { Err(ConfigError::InvalidId(id.to_string())) }
}
