mod apply;
mod plan;
mod state;

use std::path::Path;
use std::process;

use strato_lib::config::load_declarations;
use strato_lib::plan::{Plan, compute_plan};
use strato_lib::resource::DeclarationSet;
use strato_lib::state::StateStore;

use crate::output;

pub use apply::cmd_apply;
pub use plan::cmd_plan;
pub use state::cmd_state;

/// Load declarations and compute a plan, exiting with code 2 when the
/// declarations are invalid (unparseable, unknown references, cycles).
fn load_and_plan(config: &Path, state_dir: &Path) -> (DeclarationSet, Plan) {
  let specs = match load_declarations(config) {
    Ok(specs) => specs,
    Err(e) => {
      output::print_error(&format!("failed to load {}: {e}", config.display()));
      process::exit(2);
    }
  };

  let records = match StateStore::new(state_dir).all() {
    Ok(records) => records,
    Err(e) => {
      output::print_error(&format!("failed to read state: {e}"));
      process::exit(2);
    }
  };

  let plan = match compute_plan(&specs, &records) {
    Ok(plan) => plan,
    Err(e) => {
      output::print_error(&e.to_string());
      process::exit(2);
    }
  };

  (specs, plan)
}
