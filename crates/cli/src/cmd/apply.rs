//! Implementation of the `strato apply` command.
//!
//! Plans against recorded state, then executes the plan against the local
//! backend. Ctrl-C stops scheduling further resources; in-flight backend
//! operations finish and are recorded before the run ends.

use std::path::Path;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::warn;

use strato_lib::backend::LocalBackend;
use strato_lib::execute::{CancelToken, ExecuteConfig, StepOutcome, execute_plan};
use strato_lib::graph::ResourceGraph;
use strato_lib::state::StateStore;

use crate::output;

use super::load_and_plan;

pub fn cmd_apply(
  config: &Path,
  state_dir: &Path,
  backend_dir: &Path,
  parallelism: Option<usize>,
) -> Result<()> {
  let (specs, plan) = load_and_plan(config, state_dir);

  if !plan.has_changes() {
    println!("No changes. Declarations match recorded state.");
    return Ok(());
  }

  // The plan already validated the declarations, so this cannot fail; the
  // executor needs the graph for wave scheduling.
  let graph = match ResourceGraph::build(&specs) {
    Ok(graph) => graph,
    Err(e) => {
      output::print_error(&e.to_string());
      process::exit(2);
    }
  };

  println!("Applying {} change(s)", plan.change_count());
  println!();

  let mut exec_config = ExecuteConfig::default();
  if let Some(parallelism) = parallelism {
    exec_config.parallelism = parallelism;
  }

  let state = Arc::new(StateStore::new(state_dir));
  let backend = Arc::new(LocalBackend::new(backend_dir));
  let cancel = CancelToken::new();

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let result = rt.block_on(async {
    let handler_token = cancel.clone();
    tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        warn!("interrupt received, letting in-flight resources finish");
        handler_token.cancel();
      }
    });

    execute_plan(&plan, &graph, backend, state, &exec_config, &cancel).await
  })?;

  for (id, outcome) in &result.outcomes {
    match outcome {
      StepOutcome::Succeeded { action, .. } => output::print_success(&format!("{id} ({action})")),
      StepOutcome::Failed { error } => output::print_error(&format!("{id}: {error}")),
      StepOutcome::SkippedDueToDependencyFailure { failed_dependency } => {
        output::print_warning(&format!("{id} skipped: dependency '{failed_dependency}' did not complete"));
      }
      StepOutcome::Cancelled => output::print_warning(&format!("{id} cancelled")),
    }
  }

  println!();
  println!(
    "Apply complete: {} succeeded, {} failed, {} skipped, {} cancelled",
    result.succeeded(),
    result.failed(),
    result.skipped(),
    result.cancelled()
  );

  if !result.is_success() {
    process::exit(1);
  }

  Ok(())
}
