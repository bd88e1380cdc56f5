//! Retries a step's (timeout + progress + body) inner handler according to
//! `step.max_retries()` and the configured backoff strategy.

use std::sync::Arc;

use super::{Middleware, RunContext, StepFuture, StepHandler};
use crate::config::BackoffStrategy;
use crate::step::ArcStep;
use crate::state::WorkflowState;

pub struct RetryMiddleware;

impl Middleware for RetryMiddleware {
    fn wrap(&self, next: StepHandler) -> StepHandler {
        Arc::new(move |step: ArcStep, mut state: WorkflowState, ctx: RunContext| -> StepFuture {
            let next = next.clone();
            Box::pin(async move {
                // A step already flagged for escalation by the error context
                // gets at most one retry instead of its full configured
                // budget, rather than grinding through every attempt again.
                let max_retries = if ctx.error_context.should_escalate(step.name()) {
                    step.max_retries().min(1)
                } else {
                    step.max_retries()
                };
                let retry_config = ctx.config.retry.clone();
                let mut attempt: u32 = 0;

                loop {
                    attempt += 1;
                    let (returned_state, result) = next(step.clone(), state, ctx.clone()).await;
                    state = returned_state;

                    match &result {
                        Ok(()) => {
                            state.last_attempts = attempt;
                            return (state, result);
                        }
                        Err(error) if error.is_retryable() && attempt <= max_retries => {
                            ctx.error_context.add_error(step.name(), error.summary(), attempt);
                            let delay = backoff_delay(&retry_config, attempt);
                            tokio::select! {
                                _ = tokio::time::sleep(delay) => {}
                                _ = ctx.cancellation.cancelled() => {
                                    state.last_attempts = attempt;
                                    return (state, Err(crate::error::OrchestratorError::Cancelled {
                                        reason: "cancelled during retry backoff".to_string(),
                                    }));
                                }
                            }
                        }
                        Err(last_error) => {
                            state.last_attempts = attempt;
                            let cause = last_error.summary();
                            ctx.error_context.add_error(step.name(), cause.clone(), attempt);
                            let wrapped = crate::error::OrchestratorError::RetriesExhausted {
                                step: step.name().to_string(),
                                attempts: attempt,
                                cause,
                            };
                            return (state, Err(wrapped));
                        }
                    }
                }
            })
        })
    }
}

fn backoff_delay(config: &crate::config::RetryConfig, attempt: u32) -> std::time::Duration {
    let computed = match config.strategy {
        BackoffStrategy::Linear => config.base_delay * attempt,
        BackoffStrategy::Exponential { multiplier } => {
            let factor = multiplier.powi(attempt as i32 - 1);
            config.base_delay.mul_f64(factor)
        }
    };
    computed.min(config.max_delay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{KeywordErrorPatternRecognizer, NoopMetricsCollector, TracingTracer};
    use crate::config::{ErrorContextConfig, MiddlewareConfig, RetryConfig};
    use crate::error_context::ProgressiveErrorContext;
    use crate::progress::ProgressEmitter;
    use crate::step::test_support::ScriptedStep;
    use crate::types::{WorkflowArgs, WorkflowId};
    use std::time::Duration;

    fn context(retry: RetryConfig) -> RunContext {
        let workflow_id = WorkflowId("wf".to_string());
        RunContext {
            workflow_id: workflow_id.clone(),
            tracer: Arc::new(TracingTracer),
            metrics: Arc::new(NoopMetricsCollector),
            error_recognizer: Arc::new(KeywordErrorPatternRecognizer),
            progress: ProgressEmitter::noop(workflow_id, 1),
            error_context: Arc::new(ProgressiveErrorContext::new(ErrorContextConfig::default())),
            config: Arc::new(MiddlewareConfig {
                retry,
                ..MiddlewareConfig::default()
            }),
            cancellation: tokio_util::sync::CancellationToken::new(),
        }
    }

    fn inner_from_step() -> StepHandler {
        Arc::new(|step: ArcStep, mut state: WorkflowState, ctx: RunContext| {
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
    async fn retries_until_success_within_max_retries() {
        let handler = RetryMiddleware.wrap(inner_from_step());
        let step: ArcStep = Arc::new(ScriptedStep::new("push", 3, 2, false));
        let state = WorkflowState::new(WorkflowId("wf".to_string()), WorkflowArgs::default(), vec![step.clone()]);

        let ctx = context(RetryConfig {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            ..RetryConfig::default()
        });

        let (state, result) = handler(step.clone(), state, ctx).await;
        assert!(result.is_ok());
        assert_eq!(state.last_attempts, 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries_exhausted() {
        let handler = RetryMiddleware.wrap(inner_from_step());
        let step: ArcStep = Arc::new(ScriptedStep::new("deploy", 1, 5, false));
        let state = WorkflowState::new(WorkflowId("wf".to_string()), WorkflowArgs::default(), vec![step.clone()]);

        let ctx = context(RetryConfig {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            ..RetryConfig::default()
        });

        let (_, result) = handler(step, state, ctx).await;
        assert!(result.is_err());
    }
}
