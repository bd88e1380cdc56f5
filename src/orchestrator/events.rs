//! Decorator publishing `WorkflowStarted` / one `WorkflowStepCompleted` per
//! recorded step / `WorkflowCompleted` around an inner orchestrator run,
//! kept as the outermost wrapper so every decorator nested inside it is
//! covered by the start/complete pair.
//!
//! The inner run only hands back a `WorkflowResult` once it's entirely
//! done, so the per-step events are synthesized from `result.steps` after
//! the fact rather than streamed live; they still publish in the one order
//! that matters to a subscriber (`WorkflowStarted` -> `StepCompleted`* in
//! step order -> `WorkflowCompleted`).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use super::Orchestrator;
use crate::events::{EventBus, WorkflowEvent};
use crate::state::WorkflowState;
use crate::types::{WorkflowArgs, WorkflowResult};

pub struct WithEvents {
    inner: Arc<dyn Orchestrator>,
    bus: Arc<EventBus>,
}

impl WithEvents {
    pub fn new(inner: Arc<dyn Orchestrator>, bus: Arc<EventBus>) -> Self {
        Self { inner, bus }
    }
}

#[async_trait]
impl Orchestrator for WithEvents {
    async fn run(&self, args: WorkflowArgs, cancellation: CancellationToken) -> WorkflowResult {
        let workflow_id = WorkflowState::derive_id(&args);

        self.bus.publish(WorkflowEvent::WorkflowStarted {
            workflow_id: workflow_id.clone(),
            total_steps: 10,
            repo_url: args.repo_url.clone(),
            branch: args.branch.clone(),
            timestamp: Utc::now(),
            user_id: args.user_id.clone(),
        });

        let result = self.inner.run(args, cancellation).await;

        for step in &result.steps {
            self.bus.publish(WorkflowEvent::WorkflowStepCompleted {
                workflow_id: workflow_id.clone(),
                step: step.name.clone(),
                status: step.status,
                duration: step.duration,
            });
        }

        self.bus.publish(WorkflowEvent::WorkflowCompleted {
            workflow_id,
            result: result.clone(),
        });

        result
    }
}
