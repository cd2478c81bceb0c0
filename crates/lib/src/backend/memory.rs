//! In-memory backend with scripted outputs and failure injection.
//!
//! Used by executor tests and useful for dry experiments: outputs per
//! resource can be scripted ahead of time, and failures (a number of
//! transient errors, or a permanent one) can be injected per resource.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::resource::{ParamValue, ResourceId};

use super::{BackendError, Outputs, ResourceBackend};

#[derive(Debug, Default)]
struct Inner {
  /// Applied resources and their outputs.
  resources: BTreeMap<ResourceId, Outputs>,

  /// Scripted outputs returned on create/update.
  scripted: BTreeMap<ResourceId, Outputs>,

  /// Remaining transient failures to inject per resource.
  transient: BTreeMap<ResourceId, u32>,

  /// Resources that always fail permanently.
  permanent: BTreeSet<ResourceId>,

  /// Log of (operation, resource) calls, in order.
  calls: Vec<(String, ResourceId)>,

  /// Last parameters seen per resource, for assertions.
  last_parameters: BTreeMap<ResourceId, BTreeMap<String, ParamValue>>,
}

/// Scripted in-memory [`ResourceBackend`].
#[derive(Debug, Default)]
pub struct MemoryBackend {
  inner: Mutex<Inner>,
}

impl MemoryBackend {
  pub fn new() -> Self {
    Self::default()
  }

  /// Script the outputs returned when `id` is created or updated.
  pub fn script_outputs(&self, id: &ResourceId, outputs: Outputs) {
    self.lock().scripted.insert(id.clone(), outputs);
  }

  /// Inject `times` transient failures before `id` succeeds.
  pub fn fail_transient(&self, id: &ResourceId, times: u32) {
    self.lock().transient.insert(id.clone(), times);
  }

  /// Make every operation on `id` fail permanently.
  pub fn fail_permanent(&self, id: &ResourceId) {
    self.lock().permanent.insert(id.clone());
  }

  /// All (operation, resource) calls made so far.
  pub fn calls(&self) -> Vec<(String, ResourceId)> {
    self.lock().calls.clone()
  }

  /// Whether `id` currently exists in the backend.
  pub fn contains(&self, id: &ResourceId) -> bool {
    self.lock().resources.contains_key(id)
  }

  /// The parameters most recently passed for `id`.
  pub fn last_parameters(&self, id: &ResourceId) -> Option<BTreeMap<String, ParamValue>> {
    self.lock().last_parameters.get(id).cloned()
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
    self.inner.lock().expect("memory backend mutex poisoned")
  }

  fn apply(
    &self,
    op: &str,
    kind: &str,
    id: &ResourceId,
    parameters: &BTreeMap<String, ParamValue>,
  ) -> Result<Outputs, BackendError> {
    let mut inner = self.lock();
    inner.calls.push((op.to_string(), id.clone()));
    inner.last_parameters.insert(id.clone(), parameters.clone());

    if inner.permanent.contains(id) {
      return Err(BackendError::Permanent(format!("validation rejected {kind} '{id}'")));
    }

    if let Some(remaining) = inner.transient.get_mut(id) {
      if *remaining > 0 {
        *remaining -= 1;
        return Err(BackendError::Transient(format!("throttled while applying '{id}'")));
      }
    }

    let outputs = inner
      .scripted
      .get(id)
      .cloned()
      .unwrap_or_else(|| Outputs::from([("resource_id".to_string(), format!("{kind}/{id}"))]));

    inner.resources.insert(id.clone(), outputs.clone());
    Ok(outputs)
  }
}

#[async_trait]
impl ResourceBackend for MemoryBackend {
  async fn create(
    &self,
    kind: &str,
    id: &ResourceId,
    parameters: &BTreeMap<String, ParamValue>,
  ) -> Result<Outputs, BackendError> {
    self.apply("create", kind, id, parameters)
  }

  async fn read(&self, _kind: &str, id: &ResourceId) -> Result<Option<Outputs>, BackendError> {
    let mut inner = self.lock();
    inner.calls.push(("read".to_string(), id.clone()));
    Ok(inner.resources.get(id).cloned())
  }

  async fn update(
    &self,
    kind: &str,
    id: &ResourceId,
    parameters: &BTreeMap<String, ParamValue>,
  ) -> Result<Outputs, BackendError> {
    self.apply("update", kind, id, parameters)
  }
}
