//! Innermost layer: emits started/completed/failed progress updates around
//! a single attempt of the step body, and feeds failures into the error
//! budget via `ProgressEmitter::update_with_error_handling`.

use std::collections::HashMap;
use std::sync::Arc;

use super::{Middleware, RunContext, StepFuture, StepHandler};
use crate::progress::{ProgressStatus, ProgressUpdate};
use crate::step::ArcStep;
use crate::state::WorkflowState;

pub struct ProgressMiddleware;

impl Middleware for ProgressMiddleware {
    fn wrap(&self, next: StepHandler) -> StepHandler {
        Arc::new(move |step: ArcStep, state: WorkflowState, ctx: RunContext| -> StepFuture {
            let next = next.clone();
            Box::pin(async move {
                let step_num = state.current_step;
                let total = state.total_steps;
                let name = step.name().to_string();

                ctx.progress.update(ProgressUpdate {
                    step: step_num,
                    total,
                    stage: name.clone(),
                    message: format!("{name} started"),
                    status: ProgressStatus::Started,
                    metadata: HashMap::new(),
                });

                ctx.progress.update(ProgressUpdate {
                    step: step_num,
                    total,
                    stage: name.clone(),
                    message: format!("{name} running"),
                    status: ProgressStatus::Running,
                    metadata: HashMap::new(),
                });

                let (state, result) = next(step, state, ctx.clone()).await;

                match &result {
                    Ok(()) => {
                        ctx.progress.update(ProgressUpdate {
                            step: step_num,
                            total,
                            stage: name.clone(),
                            message: format!("{name} completed"),
                            status: ProgressStatus::Completed,
                            metadata: HashMap::new(),
                        });
                    }
                    Err(error) => {
                        let update = ProgressUpdate {
                            step: step_num,
                            total,
                            stage: name.clone(),
                            message: format!("{name} failed: {error}"),
                            status: ProgressStatus::Failed,
                            metadata: HashMap::new(),
                        };
                        ctx.progress.update_with_error_handling(update, Some(error.summary())).await;
                    }
                }

                (state, result)
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{KeywordErrorPatternRecognizer, NoopMetricsCollector, TracingTracer};
    use crate::config::{ErrorContextConfig, MiddlewareConfig};
    use crate::error_context::ProgressiveErrorContext;
    use crate::progress::{ProgressEmitter, RecordingProgressSink};
    use crate::step::test_support::ScriptedStep;
    use crate::types::{WorkflowArgs, WorkflowId};

    fn base() -> StepHandler {
        std::sync::Arc::new(|step: ArcStep, mut state: WorkflowState, ctx: RunContext| {
            Box::pin(async move {
                let step_ctx = crate::step::StepContext {
                    workflow_id: ctx.workflow_id.clone(),
                    cancellation: ctx.cancellation.clone(),
                };
                let result = step.execute(&mut state, &step_ctx).await;
                (state, result)
            })
        })
    }

    #[tokio::test]
    async fn emits_started_and_completed_on_success() {
        let sink = Arc::new(RecordingProgressSink::default());
        let workflow_id = WorkflowId("wf".to_string());
        let progress = ProgressEmitter::new(workflow_id.clone(), 1, crate::config::ProgressConfig::default(), sink.clone());

        let ctx = RunContext {
            workflow_id: workflow_id.clone(),
            tracer: Arc::new(TracingTracer),
            metrics: Arc::new(NoopMetricsCollector),
            error_recognizer: Arc::new(KeywordErrorPatternRecognizer),
            progress,
            error_context: Arc::new(ProgressiveErrorContext::new(ErrorContextConfig::default())),
            config: Arc::new(MiddlewareConfig::default()),
            cancellation: tokio_util::sync::CancellationToken::new(),
        };

        let handler = ProgressMiddleware.wrap(base());
        let step: ArcStep = Arc::new(ScriptedStep::new("analyze", 0, 0, false));
        let state = WorkflowState::new(workflow_id.clone(), WorkflowArgs::default(), vec![step.clone()]);

        let (_, result) = handler(step, state, ctx.clone()).await;
        assert!(result.is_ok());
        ctx.progress.close().await;

        let emitted = sink.emitted.lock();
        assert!(emitted.iter().any(|p| p["status"] == "started"));
        assert!(emitted.iter().any(|p| p["status"] == "running"));
        assert!(emitted.iter().any(|p| p["status"] == "completed"));
    }
}
