//! Implementation of the `strato state` command.

use std::path::Path;

use anyhow::{Context, Result};

use strato_lib::state::{ApplyStatus, StateStore};

use crate::output;

pub fn cmd_state(state_dir: &Path) -> Result<()> {
  let store = StateStore::new(state_dir);
  let records = store.all().context("Failed to read state directory")?;

  if records.is_empty() {
    println!("No recorded state under {}", state_dir.display());
    return Ok(());
  }

  for (id, record) in &records {
    let status = match record.status {
      ApplyStatus::Succeeded => "succeeded",
      ApplyStatus::Failed => "failed",
      ApplyStatus::Pending => "pending",
    };

    match &record.last_applied {
      Some(applied) => println!("{id}  {status}  {}", output::truncate_hash(&applied.params_hash)),
      None => println!("{id}  {status}  -"),
    }
  }

  Ok(())
}
