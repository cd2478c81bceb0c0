//! Resource backend boundary.
//!
//! The engine never talks to a cloud API directly; it drives a
//! [`ResourceBackend`] exposing create/read/update per resource kind. Every
//! call is idempotent-safe to retry on a transient failure, and every failure
//! carries a transient-or-permanent classification that the executor uses to
//! decide whether to retry.

pub mod local;
pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::resource::{ParamValue, ResourceId};

pub use local::LocalBackend;
pub use memory::MemoryBackend;

/// Outputs produced by applying a resource (output name -> value).
pub type Outputs = BTreeMap<String, String>;

/// Backend failure, classified for retry handling.
#[derive(Debug, Error)]
pub enum BackendError {
  /// Expected to succeed on retry (throttling, timeout).
  #[error("transient backend failure: {0}")]
  Transient(String),

  /// Will not succeed on retry (validation, permissions).
  #[error("permanent backend failure: {0}")]
  Permanent(String),
}

impl BackendError {
  pub fn is_transient(&self) -> bool {
    matches!(self, BackendError::Transient(_))
  }
}

/// External resource provider.
///
/// Parameters handed to the backend contain no unresolved refs; the executor
/// resolves them before calling. The trait is object-safe so the executor can
/// run against any provider behind `Arc<dyn ResourceBackend>`.
#[async_trait]
pub trait ResourceBackend: Send + Sync {
  /// Create a resource, returning its outputs.
  async fn create(
    &self,
    kind: &str,
    id: &ResourceId,
    parameters: &BTreeMap<String, ParamValue>,
  ) -> Result<Outputs, BackendError>;

  /// Read a resource's current outputs, if it exists.
  async fn read(&self, kind: &str, id: &ResourceId) -> Result<Option<Outputs>, BackendError>;

  /// Update a resource in place, returning its new outputs.
  async fn update(
    &self,
    kind: &str,
    id: &ResourceId,
    parameters: &BTreeMap<String, ParamValue>,
  ) -> Result<Outputs, BackendError>;
}
