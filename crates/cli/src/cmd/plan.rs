//! Implementation of the `strato plan` command.
//!
//! Loads the declaration file, compares it against recorded state, and
//! prints the resulting plan without calling the backend.

use std::path::Path;

use anyhow::Result;
use owo_colors::{OwoColorize, Stream};

use strato_lib::plan::{Plan, PlanAction};

use crate::output::{OutputFormat, symbols};

use super::load_and_plan;

pub fn cmd_plan(config: &Path, state_dir: &Path, format: OutputFormat) -> Result<()> {
  let (_specs, plan) = load_and_plan(config, state_dir);

  if format.is_json() {
    println!("{}", serde_json::to_string_pretty(&plan)?);
    return Ok(());
  }

  print_plan(&plan);

  println!();
  if plan.has_changes() {
    println!("Plan: {} change(s)", plan.change_count());
  } else {
    println!("No changes. Declarations match recorded state.");
  }

  Ok(())
}

fn print_plan(plan: &Plan) {
  for step in plan.steps() {
    let symbol = match step.action {
      PlanAction::Create => format!("{}", symbols::ADD.if_supports_color(Stream::Stdout, |s| s.green())),
      PlanAction::Update => format!("{}", symbols::MODIFY.if_supports_color(Stream::Stdout, |s| s.yellow())),
      PlanAction::Reuse => format!("{}", symbols::REUSE.if_supports_color(Stream::Stdout, |s| s.dimmed())),
      PlanAction::Noop => symbols::UNCHANGED.to_string(),
    };

    println!("  {symbol} {}  {} ({})", step.id, step.kind, step.action);
  }
}
