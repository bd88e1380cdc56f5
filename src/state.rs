//! `WorkflowState`: the single carrier of step inputs/outputs threaded
//! through the middleware chain.
//!
//! Ownership follows a single-writer convention: the orchestrator task is
//! the sole writer during step execution, so the mutable fields need no
//! internal locking.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value as JsonValue;

use crate::error::OrchestratorError;
use crate::step::ArcStep;
use crate::types::{WorkflowArgs, WorkflowId, WorkflowResult};

/// Typed per-step outputs produced by the fixed pipeline. Downstream steps
/// read these through the `require_*` accessors; a missing value is a hard
/// error rather than a silent default.
#[derive(Debug, Default, Clone)]
pub struct PipelineOutputs {
    pub analyze_result: Option<String>,
    pub dockerfile_result: Option<String>,
    pub build_result: Option<String>,
    pub k8s_result: Option<String>,
    pub scan_report: Option<HashMap<String, JsonValue>>,
}

#[derive(Clone)]
pub struct WorkflowState {
    // Immutable for the lifetime of the run.
    pub workflow_id: WorkflowId,
    pub args: WorkflowArgs,
    pub total_steps: usize,
    pub all_steps: Vec<ArcStep>,

    // Mutable, single-writer (the orchestrator loop).
    pub current_step: usize,
    pub result: WorkflowResult,
    pub outputs: PipelineOutputs,
    pub optimization: Option<JsonValue>,

    /// Attempts used by `RetryMiddleware` for the step currently (or most
    /// recently) running. Reset at the start of each step; read by the
    /// orchestrator once the middleware chain returns to populate
    /// `StepRecord::retries`.
    pub last_attempts: u32,
}

impl WorkflowState {
    pub fn new(workflow_id: WorkflowId, args: WorkflowArgs, all_steps: Vec<ArcStep>) -> Self {
        let total_steps = all_steps.len();
        Self {
            workflow_id,
            args,
            total_steps,
            all_steps,
            current_step: 0,
            result: WorkflowResult::default(),
            outputs: PipelineOutputs::default(),
            optimization: None,
            last_attempts: 0,
        }
    }

    /// Derive a workflow id from the repo identifier and the current unix
    /// timestamp.
    pub fn derive_id(args: &WorkflowArgs) -> WorkflowId {
        let repo = args.repo_identifier();
        let unix_secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        WorkflowId(format!("{}-{}", repo, unix_secs))
    }

    pub fn require_analyze_result(&self) -> Result<&str, OrchestratorError> {
        self.outputs.analyze_result.as_deref().ok_or_else(|| missing("analyze"))
    }

    pub fn require_dockerfile_result(&self) -> Result<&str, OrchestratorError> {
        self.outputs.dockerfile_result.as_deref().ok_or_else(|| missing("dockerfile"))
    }

    pub fn require_build_result(&self) -> Result<&str, OrchestratorError> {
        self.outputs.build_result.as_deref().ok_or_else(|| missing("build"))
    }

    pub fn require_k8s_result(&self) -> Result<&str, OrchestratorError> {
        self.outputs.k8s_result.as_deref().ok_or_else(|| missing("deploy"))
    }
}

fn missing(step: &str) -> OrchestratorError {
    OrchestratorError::Internal {
        step: step.to_string(),
        cause: format!("downstream step consumed '{step}' output before it was produced"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_id_uses_repo_identifier() {
        let args = WorkflowArgs {
            repo_url: "https://github.com/acme/svc.git".to_string(),
            ..Default::default()
        };
        let id = WorkflowState::derive_id(&args);
        assert!(id.0.starts_with("svc-"));
    }

    #[test]
    fn missing_output_is_hard_error() {
        let state = WorkflowState::new(WorkflowId("w".to_string()), WorkflowArgs::default(), vec![]);
        assert!(state.require_build_result().is_err());
    }
}
