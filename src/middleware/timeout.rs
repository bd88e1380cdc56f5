//! Bounds a single attempt's execution time and turns an elapsed deadline
//! into `OrchestratorError::Timeout`, distinct from a step's own transient
//! failures.

use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{Middleware, RunContext, StepFuture, StepHandler};
use crate::error::OrchestratorError;
use crate::step::ArcStep;
use crate::state::WorkflowState;

pub struct TimeoutMiddleware;

impl Middleware for TimeoutMiddleware {
    fn wrap(&self, next: StepHandler) -> StepHandler {
        Arc::new(move |step: ArcStep, state: WorkflowState, ctx: RunContext| -> StepFuture {
            let next = next.clone();
            Box::pin(async move {
                let duration = effective_timeout(&ctx, step.as_ref());
                let name = step.name().to_string();
                let started = Instant::now();

                // `state` must still be returnable if the sleep wins the race,
                // so a cheap fallback copy is kept outside the inner future.
                let fallback_state = state.clone();

                tokio::select! {
                    outcome = next(step, state, ctx.clone()) => outcome,
                    _ = tokio::time::sleep(duration) => {
                        let elapsed = started.elapsed();
                        (fallback_state, Err(OrchestratorError::Timeout {
                            step: name,
                            elapsed,
                            cause: format!("exceeded {duration:?} budget"),
                        }))
                    }
                }
            })
        })
    }
}

fn effective_timeout(ctx: &RunContext, step: &dyn crate::step::Step) -> Duration {
    let configured = step.timeout().unwrap_or(ctx.config.timeout.default_timeout);
    configured.clamp(ctx.config.timeout.min_timeout, ctx.config.timeout.max_timeout)
}
