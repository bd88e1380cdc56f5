//! Enriches the upcoming attempt with recent failure context before handing
//! off to retry, and flags steps whose errors keep recurring so an injected
//! `Analyzer`-backed step body can change its own behavior rather than
//! repeat a doomed attempt.

use std::sync::Arc;

use serde_json::{json, Map, Value as JsonValue};

use super::{Middleware, RunContext, StepFuture, StepHandler};
use crate::step::ArcStep;
use crate::state::WorkflowState;

pub struct EnhancementMiddleware;

impl Middleware for EnhancementMiddleware {
    fn wrap(&self, next: StepHandler) -> StepHandler {
        Arc::new(move |step: ArcStep, mut state: WorkflowState, ctx: RunContext| -> StepFuture {
            let next = next.clone();
            Box::pin(async move {
                let name = step.name().to_string();

                if state.current_step == 1 {
                    let plan = optimize_workflow(&state.all_steps);
                    merge_optimization(&mut state, "workflow_optimization", plan);
                }

                let context_block = ctx.error_context.ai_context(&name);
                if !context_block.is_empty() {
                    merge_optimization(&mut state, "error_context", JsonValue::String(context_block));
                    ctx.error_context.record_fix(&name, 1, "injected recent-failure context into next attempt");
                }

                let (mut state, result) = next(step, state, ctx.clone()).await;

                if let Err(error) = &result {
                    ctx.error_context.add_error(&name, error.summary(), state.last_attempts.max(1));
                    if ctx.error_context.should_escalate(&name) {
                        tracing::warn!(step = %name, "repeated distinct failures, escalating instead of further auto-remediation");
                        merge_optimization(&mut state, "escalate", json!({ "step": name }));
                    }
                }

                (state, result)
            })
        })
    }
}

/// Inspects the whole pipeline once, before the first step runs, and records
/// a workflow-wide plan (step count, retry budgets, which steps can
/// compensate) for later steps to consult through `state.optimization`.
fn optimize_workflow(steps: &[ArcStep]) -> JsonValue {
    let step_plan: Vec<JsonValue> = steps
        .iter()
        .map(|s| {
            json!({
                "name": s.name(),
                "max_retries": s.max_retries(),
                "can_compensate": s.can_compensate(),
            })
        })
        .collect();
    json!({ "step_count": steps.len(), "steps": step_plan })
}

/// `state.optimization` accumulates contributions from several middleware
/// concerns (workflow-wide plan, error context, escalation flag) across one
/// step's run, so each writer merges a key in rather than overwriting the
/// whole value.
fn merge_optimization(state: &mut WorkflowState, key: &str, value: JsonValue) {
    let mut object = match state.optimization.take() {
        Some(JsonValue::Object(object)) => object,
        _ => Map::new(),
    };
    object.insert(key.to_string(), value);
    state.optimization = Some(JsonValue::Object(object));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{KeywordErrorPatternRecognizer, NoopMetricsCollector, TracingTracer};
    use crate::config::{ErrorContextConfig, MiddlewareConfig};
    use crate::error::OrchestratorError;
    use crate::error_context::ProgressiveErrorContext;
    use crate::progress::ProgressEmitter;
    use crate::types::{WorkflowArgs, WorkflowId};

    fn failing_next() -> StepHandler {
        Arc::new(|_step: ArcStep, state: WorkflowState, _ctx: RunContext| {
            Box::pin(async move {
                (
                    state,
                    Err(OrchestratorError::Transient {
                        step: "deploy".to_string(),
                        attempts: 1,
                        cause: "timeout waiting for rollout".to_string(),
                    }),
                )
            })
        })
    }

    fn context(error_context: Arc<ProgressiveErrorContext>) -> RunContext {
        let workflow_id = WorkflowId("wf".to_string());
        RunContext {
            workflow_id: workflow_id.clone(),
            tracer: Arc::new(TracingTracer),
            metrics: Arc::new(NoopMetricsCollector),
            error_recognizer: Arc::new(KeywordErrorPatternRecognizer),
            progress: ProgressEmitter::noop(workflow_id, 1),
            error_context,
            config: Arc::new(MiddlewareConfig::default()),
            cancellation: tokio_util::sync::CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn records_failures_into_error_context() {
        let error_context = Arc::new(ProgressiveErrorContext::new(ErrorContextConfig::default()));
        let handler = EnhancementMiddleware.wrap(failing_next());
        let step: ArcStep = Arc::new(crate::step::test_support::ScriptedStep::new("deploy", 0, 0, false));
        let state = WorkflowState::new(WorkflowId("wf".to_string()), WorkflowArgs::default(), vec![step.clone()]);

        let (_, result) = handler(step, state, context(error_context.clone())).await;
        assert!(result.is_err());
        assert_eq!(error_context.step_errors("deploy").len(), 1);
    }

    fn succeeding_next() -> StepHandler {
        Arc::new(|step: ArcStep, mut state: WorkflowState, _ctx: RunContext| {
            Box::pin(async move {
                let step_ctx = crate::step::StepContext {
                    workflow_id: state.workflow_id.clone(),
                    cancellation: tokio_util::sync::CancellationToken::new(),
                };
                let result = step.execute(&mut state, &step_ctx).await;
                (state, result)
            })
        })
    }

    #[tokio::test]
    async fn first_step_records_a_workflow_wide_optimization_plan() {
        let error_context = Arc::new(ProgressiveErrorContext::new(ErrorContextConfig::default()));
        let handler = EnhancementMiddleware.wrap(succeeding_next());

        let step: ArcStep = Arc::new(crate::step::test_support::ScriptedStep::new("analyze", 0, 0, false));
        let mut state = WorkflowState::new(WorkflowId("wf".to_string()), WorkflowArgs::default(), vec![step.clone()]);
        state.current_step = 1;

        let (state, result) = handler(step, state, context(error_context)).await;
        assert!(result.is_ok());
        let optimization = state.optimization.expect("first step records a plan");
        assert!(optimization["workflow_optimization"]["step_count"].is_number());
    }
}
