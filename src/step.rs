//! The `Step` interface: a named unit of work with optional
//! retry/timeout/compensation capabilities, probed for at call sites rather
//! than modeled through a base class.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::OrchestratorError;
use crate::state::WorkflowState;
use crate::types::{WorkflowId, WorkflowResult};

/// The slice of a running workflow a step body needs to behave cooperatively:
/// who it's running for, and whether the caller has asked to stop. Kept
/// narrower than the middleware chain's own `RunContext` so step
/// implementations outside this crate don't need to depend on the
/// middleware module.
#[derive(Clone)]
pub struct StepContext {
    pub workflow_id: WorkflowId,
    pub cancellation: CancellationToken,
}

/// A named unit of work in the pipeline.
#[async_trait]
pub trait Step: Send + Sync {
    /// Stable identifier, unique within the workflow.
    fn name(&self) -> &str;

    /// Execute the step's effect against the shared workflow state. A step
    /// whose own work can take a while (polling a build, waiting on a
    /// rollout) should race it against `ctx.cancellation.cancelled()` with
    /// `tokio::select!` rather than only relying on the orchestrator's
    /// between-steps check.
    async fn execute(&self, state: &mut WorkflowState, ctx: &StepContext) -> Result<(), OrchestratorError>;

    /// Maximum retry count; 0 means no retry. Default: no retry.
    fn max_retries(&self) -> u32 {
        0
    }

    /// Per-step timeout override; `None` means inherit the middleware
    /// default.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Whether this step can undo its own side effect.
    fn can_compensate(&self) -> bool {
        false
    }

    /// Undo the step's externally visible effect, if any. Only called when
    /// `can_compensate` returns true and the step previously completed.
    /// Takes the artifacts captured in the run's result (image ref,
    /// endpoint, namespace) rather than the full mutable execution state,
    /// since compensation runs after the run has already finished.
    async fn compensate(&self, _result: &WorkflowResult) -> Result<(), OrchestratorError> {
        Ok(())
    }
}

/// Shared-ownership handle to a step, as stored in `WorkflowState::all_steps`
/// and returned by `StepProvider`.
pub type ArcStep = Arc<dyn Step>;

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// A step whose outcomes are scripted: it fails with the given error for
    /// the first `fail_count` calls, then succeeds.
    pub struct ScriptedStep {
        name: String,
        max_retries: u32,
        fail_count: u32,
        calls: AtomicU32,
        compensated: Mutex<bool>,
        compensatable: bool,
    }

    impl ScriptedStep {
        pub fn new(name: &str, max_retries: u32, fail_count: u32, compensatable: bool) -> Self {
            Self {
                name: name.to_string(),
                max_retries,
                fail_count,
                calls: AtomicU32::new(0),
                compensated: Mutex::new(false),
                compensatable,
            }
        }

        pub fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn was_compensated(&self) -> bool {
            *self.compensated.lock().unwrap()
        }
    }

    #[async_trait]
    impl Step for ScriptedStep {
        fn name(&self) -> &str {
            &self.name
        }

        async fn execute(&self, _state: &mut WorkflowState, _ctx: &StepContext) -> Result<(), OrchestratorError> {
            let attempt = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt <= self.fail_count {
                Err(OrchestratorError::Transient {
                    step: self.name.clone(),
                    attempts: attempt,
                    cause: "temporary registry error".to_string(),
                })
            } else {
                Ok(())
            }
        }

        fn max_retries(&self) -> u32 {
            self.max_retries
        }

        fn can_compensate(&self) -> bool {
            self.compensatable
        }

        async fn compensate(&self, _result: &WorkflowResult) -> Result<(), OrchestratorError> {
            *self.compensated.lock().unwrap() = true;
            Ok(())
        }
    }
}
