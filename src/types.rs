//! Core data types shared across the orchestration engine.
//!
//! Small `String`-backed newtypes for every identifier, each `Display`-able
//! and built deterministically rather than from a random UUID, plus the
//! request/response contract of the `containerize_and_deploy` entry point.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Stable identifier for a single workflow execution.
///
/// Deterministic rather than random: derived from the repository identifier
/// plus a unix-second timestamp (see `WorkflowState::derive_id`), so two
/// runs against the same repo in the same second collide by design-note
/// rather than accident.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowId(pub String);

impl std::fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for a saga execution, derived from its workflow id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SagaId(pub String);

impl std::fmt::Display for SagaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for a learned adaptation strategy, built deterministically as
/// `category:index` (see `adaptation::pattern_id_for`) so the same candidate
/// adaptation accumulates stats across runs instead of scattering under a
/// fresh id each time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PatternId(pub String);

impl std::fmt::Display for PatternId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tri-state deploy flag: unset means "auto-decide", otherwise force on/off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeployMode {
    Auto,
    Force,
    Skip,
}

impl Default for DeployMode {
    fn default() -> Self {
        DeployMode::Auto
    }
}

impl From<Option<bool>> for DeployMode {
    fn from(value: Option<bool>) -> Self {
        match value {
            None => DeployMode::Auto,
            Some(true) => DeployMode::Force,
            Some(false) => DeployMode::Skip,
        }
    }
}

/// An adjustment `WithAdaptive` applies to the next run's retry/timeout
/// behavior after recommending an adaptation for the category a failure
/// fell into. Threaded through `WorkflowArgs` rather than `MiddlewareConfig`
/// directly since that config is built fresh per run inside the
/// orchestrator, not something a caller constructs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MiddlewareAdjustment {
    #[serde(default)]
    pub backoff_multiplier: Option<f64>,
    #[serde(default)]
    pub timeout_multiplier: Option<f64>,
}

/// Input arguments for a single orchestrator run.
///
/// Either `repo_url` or `repo_path` must be non-empty; validated by
/// `WorkflowArgs::validate` before any side effect runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowArgs {
    #[serde(default)]
    pub repo_url: String,
    #[serde(default)]
    pub repo_path: String,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub scan: bool,
    #[serde(default)]
    pub deploy: DeployMode,
    #[serde(default)]
    pub strict_mode: bool,
    #[serde(default)]
    pub test_mode: bool,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub middleware_adjustment: Option<MiddlewareAdjustment>,
}

impl WorkflowArgs {
    pub fn validate(&self) -> Result<(), crate::error::OrchestratorError> {
        if self.repo_url.trim().is_empty() && self.repo_path.trim().is_empty() {
            return Err(crate::error::OrchestratorError::Validation {
                field: "repo_url/repo_path".to_string(),
                cause: "either repo_url or repo_path must be non-empty".to_string(),
            });
        }
        Ok(())
    }

    /// Derive the repo identifier used to build the deterministic workflow id:
    /// last path segment of `repo_url`, `.git` stripped, lowercased, `_` -> `-`.
    pub fn repo_identifier(&self) -> String {
        let source = if !self.repo_url.trim().is_empty() {
            &self.repo_url
        } else {
            &self.repo_path
        };

        let last_segment = source
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or("");

        let stripped = last_segment.strip_suffix(".git").unwrap_or(last_segment);
        let normalized = stripped.to_lowercase().replace('_', "-");

        if normalized.is_empty() {
            "unknown".to_string()
        } else {
            normalized
        }
    }
}

/// Status of a single pipeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepStatus::Pending => write!(f, "pending"),
            StepStatus::Running => write!(f, "running"),
            StepStatus::Completed => write!(f, "completed"),
            StepStatus::Failed => write!(f, "failed"),
            StepStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Append-only record of one executed step. Once pushed onto
/// `WorkflowResult::steps` it is never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    pub status: StepStatus,
    pub duration: Duration,
    pub retries: u32,
    pub progress: String,
    pub message: String,
    #[serde(default)]
    pub error: String,
}

impl StepRecord {
    pub fn new(name: impl Into<String>, total_steps: usize, index: usize) -> Self {
        Self {
            name: name.into(),
            status: StepStatus::Pending,
            duration: Duration::default(),
            retries: 0,
            progress: format!("{}/{}", index, total_steps),
            message: String::new(),
            error: String::new(),
        }
    }
}

/// Final result of an orchestrator run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub success: bool,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub image_ref: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub scan_report: Option<HashMap<String, serde_json::Value>>,
    #[serde(default)]
    pub steps: Vec<StepRecord>,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub duration: Duration,
}

impl WorkflowResult {
    /// `result.success` and an empty `result.error` must always agree.
    pub fn is_consistent(&self) -> bool {
        self.success == self.error.is_empty()
    }
}
