//! Decorator that runs reverse-order compensation when the inner
//! orchestrator's run fails after at least one compensatable step
//! completed.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::Orchestrator;
use crate::collaborators::StepProvider;
use crate::saga::SagaCoordinator;
use crate::step::ArcStep;
use crate::types::{StepStatus, WorkflowArgs, WorkflowResult};

pub struct WithSaga {
    inner: Arc<dyn Orchestrator>,
    step_provider: Arc<dyn StepProvider>,
    coordinator: Arc<SagaCoordinator>,
}

impl WithSaga {
    pub fn new(inner: Arc<dyn Orchestrator>, step_provider: Arc<dyn StepProvider>, coordinator: Arc<SagaCoordinator>) -> Self {
        Self {
            inner,
            step_provider,
            coordinator,
        }
    }
}

#[async_trait]
impl Orchestrator for WithSaga {
    async fn run(&self, args: WorkflowArgs, cancellation: CancellationToken) -> WorkflowResult {
        let result = self.inner.run(args, cancellation).await;

        if result.success {
            return result;
        }

        let by_name: HashMap<&str, ArcStep> = self
            .step_provider
            .all_steps()
            .iter()
            .map(|step| (step.name(), step.clone()))
            .collect::<Vec<_>>()
            .into_iter()
            .collect();

        let completed: Vec<ArcStep> = result
            .steps
            .iter()
            .filter(|record| record.status == StepStatus::Completed)
            .filter_map(|record| by_name.get(record.name.as_str()).cloned())
            .collect();

        if completed.is_empty() {
            return result;
        }

        // `WorkflowResult` carries no workflow id of its own; the saga
        // registry key only needs to be unique per compensation run.
        let saga_key = uuid::Uuid::new_v4().to_string();
        let _execution = self.coordinator.compensate(&saga_key, &completed, &result).await;

        result
    }
}
