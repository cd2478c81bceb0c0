//! Plan execution over the dependency graph.
//!
//! Resources run wave by wave: each wave holds resources whose dependencies
//! all completed in earlier waves, and independent resources within a wave
//! run in parallel under a semaphore. Failures never abort the run; they
//! fail the resource, and everything downstream of it is skipped with a
//! pointer at the dependency that failed. Transient backend failures are
//! retried with exponential backoff before counting as failures.

pub mod types;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::backend::{Outputs, ResourceBackend};
use crate::graph::ResourceGraph;
use crate::plan::{Plan, PlanAction, PlanStep, hash_params};
use crate::resource::{ParamValue, ParameterRef, ResourceId};
use crate::state::{ApplyRecord, StateStore};

pub use types::{CancelToken, ExecuteConfig, ExecuteError, RetryPolicy, RunResult, StepOutcome};

/// Execute a plan against a backend, recording results in the state store.
///
/// Apply records are only advanced after the backend confirms success; a
/// failed resource keeps its previous committed snapshot with its status
/// flipped to failed.
pub async fn execute_plan(
  plan: &Plan,
  graph: &ResourceGraph,
  backend: Arc<dyn ResourceBackend>,
  state: Arc<StateStore>,
  config: &ExecuteConfig,
  cancel: &CancelToken,
) -> Result<RunResult, ExecuteError> {
  info!(
    resources = plan.steps().len(),
    changes = plan.change_count(),
    "starting apply"
  );

  let records = state.all()?;
  let waves = graph.waves();

  let mut result = RunResult::default();

  // Outputs of every resource completed so far, keyed by id. Tasks resolve
  // their remaining refs against a snapshot of this map.
  let mut completed_outputs: BTreeMap<ResourceId, Outputs> = BTreeMap::new();

  // Resources whose outputs will not become available this run: failed,
  // skipped, or cancelled.
  let mut unavailable: BTreeSet<ResourceId> = BTreeSet::new();

  let semaphore = Arc::new(Semaphore::new(config.parallelism));

  for (wave_idx, wave) in waves.iter().enumerate() {
    debug!(wave = wave_idx, resources = wave.len(), "executing wave");

    let mut join_set = JoinSet::new();

    for id in wave {
      let Some(step) = plan.get(id) else {
        continue;
      };

      if cancel.is_cancelled() {
        warn!(resource = %id, "run cancelled, resource not scheduled");
        result.outcomes.insert(id.clone(), StepOutcome::Cancelled);
        unavailable.insert(id.clone());
        continue;
      }

      if let Some(dep) = graph.dependencies(id).into_iter().find(|d| unavailable.contains(d)) {
        warn!(resource = %id, failed_dependency = %dep, "skipping resource, dependency did not complete");
        result.outcomes.insert(
          id.clone(),
          StepOutcome::SkippedDueToDependencyFailure { failed_dependency: dep },
        );
        unavailable.insert(id.clone());
        continue;
      }

      match step.action {
        PlanAction::Noop | PlanAction::Reuse => {
          // Nothing to apply; serve outputs from the committed record.
          let outputs = records.get(id).and_then(|r| r.outputs()).cloned().unwrap_or_default();
          completed_outputs.insert(id.clone(), outputs.clone());
          result.outcomes.insert(
            id.clone(),
            StepOutcome::Succeeded {
              action: step.action,
              outputs,
            },
          );
        }
        PlanAction::Create | PlanAction::Update => {
          let step = step.clone();
          let outputs_so_far = completed_outputs.clone();
          let backend = backend.clone();
          let retry = config.retry.clone();
          let semaphore = semaphore.clone();

          join_set.spawn(async move {
            let _permit = semaphore.acquire().await.unwrap();
            let outcome = apply_step(&step, &outputs_so_far, backend.as_ref(), &retry).await;
            (step.id.clone(), step.action, outcome)
          });
        }
      }
    }

    while let Some(join_result) = join_set.join_next().await {
      match join_result {
        Ok((id, action, Ok((params_hash, outputs)))) => {
          info!(resource = %id, action = %action, "apply succeeded");
          state.put(&id, &ApplyRecord::succeeded(params_hash, outputs.clone()))?;
          completed_outputs.insert(id.clone(), outputs.clone());
          result.outcomes.insert(id, StepOutcome::Succeeded { action, outputs });
        }
        Ok((id, action, Err(message))) => {
          error!(resource = %id, action = %action, error = %message, "apply failed");
          state.mark_failed(&id)?;
          unavailable.insert(id.clone());
          result.outcomes.insert(id, StepOutcome::Failed { error: message });
        }
        Err(e) => {
          error!(error = %e, "apply task panicked");
        }
      }
    }
  }

  info!(
    succeeded = result.succeeded(),
    failed = result.failed(),
    skipped = result.skipped(),
    cancelled = result.cancelled(),
    "apply complete"
  );

  Ok(result)
}

/// Resolve a step's remaining refs and drive the backend call, retrying
/// transient failures. Returns the hash of the fully resolved snapshot and
/// the outputs on success, or a failure message.
async fn apply_step(
  step: &PlanStep,
  completed: &BTreeMap<ResourceId, Outputs>,
  backend: &dyn ResourceBackend,
  retry: &RetryPolicy,
) -> Result<(String, Outputs), String> {
  let mut parameters = BTreeMap::new();
  for (name, value) in &step.parameters {
    let resolved = value.resolve_refs(&mut |r: &ParameterRef| {
      match completed.get(&r.resource).and_then(|o| o.get(&r.output)) {
        Some(v) => Ok(Some(ParamValue::String(v.clone()))),
        None => Err(format!("output '{}' of '{}' is not available", r.output, r.resource)),
      }
    })?;
    parameters.insert(name.clone(), resolved);
  }

  // Hash the snapshot the backend will actually see, so an unchanged
  // declaration plans as a noop on the next run.
  let params_hash = hash_params(&parameters).map_err(|e| e.to_string())?;

  let mut attempt = 0u32;
  loop {
    let call = match step.action {
      PlanAction::Create => backend.create(&step.kind, &step.id, &parameters).await,
      _ => backend.update(&step.kind, &step.id, &parameters).await,
    };

    match call {
      Ok(outputs) => return Ok((params_hash, outputs)),
      Err(e) if e.is_transient() && attempt + 1 < retry.max_attempts => {
        let delay = retry.delay(attempt);
        warn!(
          resource = %step.id,
          attempt = attempt + 1,
          delay_ms = delay.as_millis() as u64,
          error = %e,
          "transient backend failure, retrying"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
      }
      Err(e) => return Err(e.to_string()),
    }
  }
}
