//! Plan computation: desired declarations vs. recorded state.
//!
//! Planning is pure. It never calls a backend; it compares each declaration
//! against the last committed apply record and classifies the resource as
//! create, update, reuse, or noop. Refs into resources that are not changing
//! in this run are substituted from their recorded outputs; refs into
//! resources that will change stay symbolic and are resolved during
//! execution, after the referenced resource has actually been applied.

use std::collections::BTreeMap;

use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use crate::graph::{GraphError, ResourceGraph};
use crate::resource::{DeclarationSet, ParamValue, ParameterRef, ResourceId};
use crate::state::ApplyRecord;

/// Errors from plan computation.
#[derive(Debug, Error)]
pub enum PlanError {
  #[error(transparent)]
  Graph(#[from] GraphError),

  /// A resource is declared `deploy = false` but has no committed apply
  /// record to reuse.
  #[error("resource '{resource}' is declared deploy = false but has never been applied")]
  MissingReuseTarget { resource: ResourceId },

  /// A ref points at an output that the referenced resource's apply record
  /// does not contain.
  #[error("resource '{referrer}' references output '{output}' of '{resource}', which its apply record does not provide")]
  MissingReuseOutput {
    resource: ResourceId,
    output: String,
    referrer: ResourceId,
  },

  #[error("failed to serialize parameter snapshot: {0}")]
  Snapshot(#[from] serde_json::Error),
}

/// What the executor will do for one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanAction {
  /// No apply record exists; the backend will create the resource.
  Create,

  /// The parameter snapshot differs from the record, or a referenced
  /// resource is changing in this run.
  Update,

  /// Record and snapshot match; nothing to do.
  Noop,

  /// Declared `deploy = false`; outputs come from the existing record and
  /// the backend is never called.
  Reuse,
}

impl std::fmt::Display for PlanAction {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      PlanAction::Create => "create",
      PlanAction::Update => "update",
      PlanAction::Noop => "noop",
      PlanAction::Reuse => "reuse",
    };
    write!(f, "{s}")
  }
}

/// One planned step.
#[derive(Debug, Clone, Serialize)]
pub struct PlanStep {
  pub id: ResourceId,
  pub kind: String,
  pub action: PlanAction,

  /// Parameter snapshot with refs into unchanging resources already
  /// substituted. Refs into changing resources remain symbolic.
  pub parameters: BTreeMap<String, ParamValue>,

  /// Hash of the snapshot above.
  pub params_hash: String,
}

/// An ordered reconciliation plan: one step per declared resource, in
/// deterministic dependency order.
#[derive(Debug, Serialize)]
pub struct Plan {
  steps: Vec<PlanStep>,
}

impl Plan {
  /// All steps, in execution order.
  pub fn steps(&self) -> &[PlanStep] {
    &self.steps
  }

  /// The step for a resource, if it is part of this plan.
  pub fn get(&self, id: &ResourceId) -> Option<&PlanStep> {
    self.steps.iter().find(|s| &s.id == id)
  }

  /// Steps that will call the backend.
  pub fn changes(&self) -> impl Iterator<Item = &PlanStep> {
    self
      .steps
      .iter()
      .filter(|s| matches!(s.action, PlanAction::Create | PlanAction::Update))
  }

  pub fn change_count(&self) -> usize {
    self.changes().count()
  }

  pub fn has_changes(&self) -> bool {
    self.changes().next().is_some()
  }
}

/// Hash of a parameter snapshot: SHA-256 over the canonical JSON rendering.
/// `BTreeMap` keys keep the rendering stable across runs.
pub(crate) fn hash_params(parameters: &BTreeMap<String, ParamValue>) -> Result<String, serde_json::Error> {
  let canonical = serde_json::to_string(parameters)?;
  Ok(hex::encode(Sha256::digest(canonical.as_bytes())))
}

/// Compute the plan for a declaration set against recorded state.
///
/// Steps come out in deterministic topological order, so a resource is
/// always classified before anything that references it.
pub fn compute_plan(
  specs: &DeclarationSet,
  records: &BTreeMap<ResourceId, ApplyRecord>,
) -> Result<Plan, PlanError> {
  let graph = ResourceGraph::build(specs)?;

  let mut actions: BTreeMap<ResourceId, PlanAction> = BTreeMap::new();
  let mut steps = Vec::with_capacity(specs.len());

  for id in graph.topo_order() {
    let spec = &specs[&id];
    let mut depends_on_changing = false;

    let mut parameters = BTreeMap::new();
    for (name, value) in &spec.parameters {
      let resolved = value.resolve_refs(&mut |r: &ParameterRef| {
        if matches!(actions.get(&r.resource), Some(PlanAction::Create | PlanAction::Update)) {
          // Target is changing this run; its outputs are only known after
          // it has been applied.
          depends_on_changing = true;
          return Ok(None);
        }

        let recorded = records
          .get(&r.resource)
          .and_then(|rec| rec.outputs())
          .and_then(|outputs| outputs.get(&r.output));

        match recorded {
          Some(v) => Ok(Some(ParamValue::String(v.clone()))),
          None => Err(PlanError::MissingReuseOutput {
            resource: r.resource.clone(),
            output: r.output.clone(),
            referrer: id.clone(),
          }),
        }
      })?;
      parameters.insert(name.clone(), resolved);
    }

    let params_hash = hash_params(&parameters)?;
    let last_applied = records.get(&id).and_then(|r| r.last_applied.as_ref());

    let action = if !spec.deploy {
      if last_applied.is_none() {
        return Err(PlanError::MissingReuseTarget { resource: id.clone() });
      }
      PlanAction::Reuse
    } else if last_applied.is_none() {
      PlanAction::Create
    } else if depends_on_changing {
      PlanAction::Update
    } else if last_applied.map(|a| a.params_hash.as_str()) != Some(params_hash.as_str()) {
      PlanAction::Update
    } else {
      PlanAction::Noop
    };

    debug!(resource = %id, action = %action, "resource classified");

    actions.insert(id.clone(), action);
    steps.push(PlanStep {
      id,
      kind: spec.kind.clone(),
      action,
      parameters,
      params_hash,
    });
  }

  Ok(Plan { steps })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::backend::Outputs;
  use crate::resource::ResourceSpec;

  fn spec(id: &str, parameters: &[(&str, ParamValue)]) -> ResourceSpec {
    ResourceSpec {
      id: id.into(),
      kind: "compute-service".to_string(),
      deploy: true,
      parameters: parameters.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
      depends_on: vec![],
    }
  }

  fn declarations(specs: Vec<ResourceSpec>) -> DeclarationSet {
    specs.into_iter().map(|s| (s.id.clone(), s)).collect()
  }

  fn reference(resource: &str, output: &str) -> ParamValue {
    ParamValue::Ref(ParameterRef {
      resource: resource.into(),
      output: output.to_string(),
    })
  }

  fn no_records() -> BTreeMap<ResourceId, ApplyRecord> {
    BTreeMap::new()
  }

  #[test]
  fn fresh_declarations_plan_as_creates_in_dependency_order() {
    let mut backend = spec("backend", &[("blob_url", reference("storage", "endpoint"))]);
    backend.depends_on.push("env".into());

    let specs = declarations(vec![
      spec("env", &[]),
      spec("storage", &[("sku", ParamValue::String("Standard_LRS".to_string()))]),
      backend,
    ]);

    let plan = compute_plan(&specs, &no_records()).unwrap();

    let order: Vec<&ResourceId> = plan.steps().iter().map(|s| &s.id).collect();
    assert_eq!(order, vec![&"env".into(), &"storage".into(), &"backend".into()]);
    assert!(plan.steps().iter().all(|s| s.action == PlanAction::Create));
    assert_eq!(plan.change_count(), 3);
  }

  #[test]
  fn replanning_after_success_is_all_noops() {
    let specs = declarations(vec![
      spec("storage", &[("sku", ParamValue::String("Standard_LRS".to_string()))]),
      spec("env", &[("tier", ParamValue::String("dev".to_string()))]),
    ]);

    let first = compute_plan(&specs, &no_records()).unwrap();

    // Simulate a successful apply of every step.
    let records: BTreeMap<ResourceId, ApplyRecord> = first
      .steps()
      .iter()
      .map(|s| (s.id.clone(), ApplyRecord::succeeded(s.params_hash.clone(), Outputs::new())))
      .collect();

    let second = compute_plan(&specs, &records).unwrap();
    assert!(!second.has_changes());
    assert!(second.steps().iter().all(|s| s.action == PlanAction::Noop));
  }

  #[test]
  fn planning_twice_on_unchanged_inputs_yields_an_identical_plan() {
    let mut backend = spec("backend", &[("blob_url", reference("storage", "endpoint"))]);
    backend.depends_on.push("env".into());

    let specs = declarations(vec![
      spec("env", &[("tier", ParamValue::String("dev".to_string()))]),
      spec("storage", &[("sku", ParamValue::String("Standard_LRS".to_string()))]),
      backend,
    ]);

    let records = BTreeMap::from([(
      ResourceId::from("env"),
      ApplyRecord::succeeded("stale-hash".to_string(), Outputs::new()),
    )]);

    let first = compute_plan(&specs, &records).unwrap();
    let second = compute_plan(&specs, &records).unwrap();

    assert_eq!(first.steps().len(), second.steps().len());
    for (a, b) in first.steps().iter().zip(second.steps()) {
      assert_eq!(a.id, b.id);
      assert_eq!(a.action, b.action);
      assert_eq!(a.parameters, b.parameters);
      assert_eq!(a.params_hash, b.params_hash);
    }
  }

  #[test]
  fn changed_parameter_plans_an_update() {
    let specs = declarations(vec![spec("storage", &[("sku", ParamValue::String("Premium_LRS".to_string()))])]);

    let records = BTreeMap::from([(
      ResourceId::from("storage"),
      ApplyRecord::succeeded("stale-hash".to_string(), Outputs::new()),
    )]);

    let plan = compute_plan(&specs, &records).unwrap();
    assert_eq!(plan.get(&"storage".into()).unwrap().action, PlanAction::Update);
  }

  #[test]
  fn ref_into_changing_resource_forces_update_and_stays_symbolic() {
    let specs = declarations(vec![
      spec("storage", &[("sku", ParamValue::String("Premium_LRS".to_string()))]),
      spec("backend", &[("blob_url", reference("storage", "endpoint"))]),
    ]);

    // storage's record is stale, so it plans as update; backend's own record
    // would otherwise be a noop.
    let backend_params: BTreeMap<String, ParamValue> =
      [("blob_url".to_string(), reference("storage", "endpoint"))].into_iter().collect();
    let records = BTreeMap::from([
      (
        ResourceId::from("storage"),
        ApplyRecord::succeeded("stale-hash".to_string(), Outputs::new()),
      ),
      (
        ResourceId::from("backend"),
        ApplyRecord::succeeded(hash_params(&backend_params).unwrap(), Outputs::new()),
      ),
    ]);

    let plan = compute_plan(&specs, &records).unwrap();
    assert_eq!(plan.get(&"storage".into()).unwrap().action, PlanAction::Update);

    let backend = plan.get(&"backend".into()).unwrap();
    assert_eq!(backend.action, PlanAction::Update);
    assert_eq!(backend.parameters["blob_url"], reference("storage", "endpoint"));
  }

  #[test]
  fn ref_into_unchanging_resource_is_substituted_from_its_record() {
    let storage_params: BTreeMap<String, ParamValue> =
      [("sku".to_string(), ParamValue::String("Standard_LRS".to_string()))]
        .into_iter()
        .collect();

    let specs = declarations(vec![
      spec("storage", &[("sku", ParamValue::String("Standard_LRS".to_string()))]),
      spec("backend", &[("blob_url", reference("storage", "endpoint"))]),
    ]);

    let records = BTreeMap::from([(
      ResourceId::from("storage"),
      ApplyRecord::succeeded(
        hash_params(&storage_params).unwrap(),
        Outputs::from([("endpoint".to_string(), "https://blob".to_string())]),
      ),
    )]);

    let plan = compute_plan(&specs, &records).unwrap();
    assert_eq!(plan.get(&"storage".into()).unwrap().action, PlanAction::Noop);

    let backend = plan.get(&"backend".into()).unwrap();
    assert_eq!(backend.action, PlanAction::Create);
    assert_eq!(
      backend.parameters["blob_url"],
      ParamValue::String("https://blob".to_string())
    );
  }

  #[test]
  fn reuse_without_record_is_an_error() {
    let mut storage = spec("storage", &[]);
    storage.deploy = false;

    let err = compute_plan(&declarations(vec![storage]), &no_records()).unwrap_err();
    assert!(matches!(err, PlanError::MissingReuseTarget { resource } if resource == "storage".into()));
  }

  #[test]
  fn reuse_with_record_serves_outputs_to_dependents() {
    let mut storage = spec("storage", &[]);
    storage.deploy = false;

    let specs = declarations(vec![storage, spec("backend", &[("blob_url", reference("storage", "endpoint"))])]);

    let records = BTreeMap::from([(
      ResourceId::from("storage"),
      ApplyRecord::succeeded(
        "h".to_string(),
        Outputs::from([("endpoint".to_string(), "https://blob".to_string())]),
      ),
    )]);

    let plan = compute_plan(&specs, &records).unwrap();
    assert_eq!(plan.get(&"storage".into()).unwrap().action, PlanAction::Reuse);
    assert_eq!(
      plan.get(&"backend".into()).unwrap().parameters["blob_url"],
      ParamValue::String("https://blob".to_string())
    );
  }

  #[test]
  fn missing_reuse_output_is_an_error() {
    let mut storage = spec("storage", &[]);
    storage.deploy = false;

    let specs = declarations(vec![storage, spec("backend", &[("blob_url", reference("storage", "endpoint"))])]);

    let records = BTreeMap::from([(
      ResourceId::from("storage"),
      ApplyRecord::succeeded("h".to_string(), Outputs::new()),
    )]);

    let err = compute_plan(&specs, &records).unwrap_err();
    match err {
      PlanError::MissingReuseOutput { resource, output, referrer } => {
        assert_eq!(resource, "storage".into());
        assert_eq!(output, "endpoint");
        assert_eq!(referrer, "backend".into());
      }
      other => panic!("expected missing reuse output, got {other:?}"),
    }
  }

  #[test]
  fn cycles_surface_as_graph_errors() {
    let mut a = spec("a", &[]);
    a.depends_on.push("b".into());
    let mut b = spec("b", &[]);
    b.depends_on.push("a".into());

    let err = compute_plan(&declarations(vec![a, b]), &no_records()).unwrap_err();
    assert!(matches!(err, PlanError::Graph(GraphError::Cycle(_))));
  }
}
