//! Best-effort, reverse-order, at-most-once compensation for a workflow run,
//! grounded in the registered-execution / step-status-tracking shape of
//! `SagaOrchestrator` / `SagaExecution` in the `jagadeesh32-cello` example,
//! adapted from a general multi-saga registry down to compensating a single
//! fixed pipeline run.

pub mod compensators;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::step::ArcStep;
use crate::types::{SagaId, WorkflowResult};

#[derive(Debug, Clone)]
pub struct SagaConfig {
    /// Upper bound on how many steps get a compensation attempt, even if
    /// more completed before the failure. `None` means no cap.
    pub max_compensations: Option<usize>,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self { max_compensations: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompensationStatus {
    Pending,
    Compensating,
    Compensated,
    /// The step had no compensation to run, or compensation itself failed;
    /// either way at most one attempt is ever made.
    Skipped,
}

impl std::fmt::Display for CompensationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CompensationStatus::Pending => "pending",
            CompensationStatus::Compensating => "compensating",
            CompensationStatus::Compensated => "compensated",
            CompensationStatus::Skipped => "skipped",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SagaStatus {
    Running,
    Compensating,
    Compensated,
    /// No steps needed compensation, or compensation finished with at least
    /// one step skipped.
    PartiallyCompensated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaStepOutcome {
    pub name: String,
    pub status: CompensationStatus,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaExecution {
    pub id: SagaId,
    pub workflow_id: String,
    pub status: SagaStatus,
    pub steps: Vec<SagaStepOutcome>,
    pub started_at: u64,
    pub completed_at: Option<u64>,
}

impl SagaExecution {
    fn new(id: SagaId, workflow_id: String) -> Self {
        Self {
            id,
            workflow_id,
            status: SagaStatus::Running,
            steps: Vec::new(),
            started_at: unix_now(),
            completed_at: None,
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

/// Tracks saga executions for the process and runs compensation for a
/// failed workflow over the steps that had already completed.
pub struct SagaCoordinator {
    config: SagaConfig,
    executions: RwLock<HashMap<String, SagaExecution>>,
}

impl SagaCoordinator {
    pub fn new(config: SagaConfig) -> Self {
        Self {
            config,
            executions: RwLock::new(HashMap::new()),
        }
    }

    /// Compensate every completed, compensatable step in `completed` in
    /// reverse order. Each step gets at most one compensation attempt
    /// regardless of outcome; a failing compensator does not stop the rest
    /// from running (best-effort).
    pub async fn compensate(
        &self,
        workflow_id: &str,
        completed: &[ArcStep],
        result: &WorkflowResult,
    ) -> SagaExecution {
        let saga_id = SagaId(format!("{workflow_id}-saga"));
        let mut execution = SagaExecution::new(saga_id.clone(), workflow_id.to_string());
        execution.status = SagaStatus::Compensating;

        let cap = self.config.max_compensations.unwrap_or(completed.len());
        let mut any_skipped = false;

        for step in completed.iter().rev().take(cap) {
            if !step.can_compensate() {
                execution.steps.push(SagaStepOutcome {
                    name: step.name().to_string(),
                    status: CompensationStatus::Skipped,
                    error: None,
                });
                any_skipped = true;
                continue;
            }

            tracing::info!(step = step.name(), "compensating step");
            match step.compensate(result).await {
                Ok(()) => execution.steps.push(SagaStepOutcome {
                    name: step.name().to_string(),
                    status: CompensationStatus::Compensated,
                    error: None,
                }),
                Err(error) => {
                    tracing::warn!(step = step.name(), error = %error, "compensation failed, continuing with remaining steps");
                    execution.steps.push(SagaStepOutcome {
                        name: step.name().to_string(),
                        status: CompensationStatus::Skipped,
                        error: Some(error.summary()),
                    });
                    any_skipped = true;
                }
            }
        }

        execution.status = if any_skipped {
            SagaStatus::PartiallyCompensated
        } else {
            SagaStatus::Compensated
        };
        execution.completed_at = Some(unix_now());

        self.executions.write().insert(saga_id.0.clone(), execution.clone());
        execution
    }

    pub fn get(&self, saga_id: &str) -> Option<SagaExecution> {
        self.executions.read().get(saga_id).cloned()
    }
}

pub type SharedSagaCoordinator = Arc<SagaCoordinator>;
