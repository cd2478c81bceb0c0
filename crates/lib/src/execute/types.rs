//! Executor configuration, cancellation, and result types.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::backend::Outputs;
use crate::plan::PlanAction;
use crate::resource::ResourceId;
use crate::state::StateError;

/// Errors from the executor itself. Backend failures are not errors at this
/// level; they become [`StepOutcome::Failed`] entries in the run result.
#[derive(Debug, Error)]
pub enum ExecuteError {
  #[error(transparent)]
  State(#[from] StateError),
}

/// What happened to one resource during a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum StepOutcome {
  Succeeded {
    action: PlanAction,
    outputs: Outputs,
  },

  Failed {
    error: String,
  },

  /// Not attempted because a dependency did not complete.
  SkippedDueToDependencyFailure {
    failed_dependency: ResourceId,
  },

  /// Not attempted because the run was cancelled before this resource was
  /// scheduled.
  Cancelled,
}

/// Outcome of a full run, one entry per resource in the plan.
#[derive(Debug, Default, Serialize)]
pub struct RunResult {
  pub outcomes: BTreeMap<ResourceId, StepOutcome>,
}

impl RunResult {
  /// True when every resource succeeded.
  pub fn is_success(&self) -> bool {
    self.outcomes.values().all(|o| matches!(o, StepOutcome::Succeeded { .. }))
  }

  pub fn succeeded(&self) -> usize {
    self.count(|o| matches!(o, StepOutcome::Succeeded { .. }))
  }

  pub fn failed(&self) -> usize {
    self.count(|o| matches!(o, StepOutcome::Failed { .. }))
  }

  pub fn skipped(&self) -> usize {
    self.count(|o| matches!(o, StepOutcome::SkippedDueToDependencyFailure { .. }))
  }

  pub fn cancelled(&self) -> usize {
    self.count(|o| matches!(o, StepOutcome::Cancelled))
  }

  /// Outputs of a resource that succeeded in this run.
  pub fn outputs(&self, id: &ResourceId) -> Option<&Outputs> {
    match self.outcomes.get(id) {
      Some(StepOutcome::Succeeded { outputs, .. }) => Some(outputs),
      _ => None,
    }
  }

  fn count(&self, predicate: impl Fn(&StepOutcome) -> bool) -> usize {
    self.outcomes.values().filter(|o| predicate(o)).count()
  }
}

/// Retry policy for transient backend failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
  /// Total attempts per resource, including the first.
  pub max_attempts: u32,

  /// Delay before the first retry; doubles per attempt.
  pub base_delay: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 3,
      base_delay: Duration::from_millis(200),
    }
  }
}

impl RetryPolicy {
  /// Delay before retrying after the given zero-based attempt.
  pub fn delay(&self, attempt: u32) -> Duration {
    self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
  }
}

/// Executor configuration.
#[derive(Debug, Clone)]
pub struct ExecuteConfig {
  /// Maximum concurrently running backend operations.
  pub parallelism: usize,

  pub retry: RetryPolicy,
}

impl Default for ExecuteConfig {
  fn default() -> Self {
    Self {
      parallelism: thread::available_parallelism().map(|n| n.get()).unwrap_or(4),
      retry: RetryPolicy::default(),
    }
  }
}

/// Sticky cancellation flag shared between the executor and a signal handler.
///
/// Cancellation never interrupts an in-flight backend call; it only stops
/// further resources from being scheduled. Once set it stays set.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    self.0.store(true, Ordering::SeqCst);
  }

  pub fn is_cancelled(&self) -> bool {
    self.0.load(Ordering::SeqCst)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn retry_delay_doubles_per_attempt() {
    let policy = RetryPolicy {
      max_attempts: 4,
      base_delay: Duration::from_millis(100),
    };

    assert_eq!(policy.delay(0), Duration::from_millis(100));
    assert_eq!(policy.delay(1), Duration::from_millis(200));
    assert_eq!(policy.delay(2), Duration::from_millis(400));
  }

  #[test]
  fn cancel_token_is_sticky_across_clones() {
    let token = CancelToken::new();
    let clone = token.clone();

    assert!(!token.is_cancelled());
    clone.cancel();
    assert!(token.is_cancelled());
  }
}
