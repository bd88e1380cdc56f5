//! Outermost layer: opens a span for the whole step (including retries) via
//! the injected `Tracer`, and mirrors the same information through
//! `tracing` macros so the binary has usable structured logs without any
//! collaborator configured.

use std::sync::Arc;

use super::{Middleware, RunContext, StepFuture, StepHandler};
use crate::step::ArcStep;
use crate::state::WorkflowState;

pub struct TracingMiddleware;

impl Middleware for TracingMiddleware {
    fn wrap(&self, next: StepHandler) -> StepHandler {
        Arc::new(move |step: ArcStep, state: WorkflowState, ctx: RunContext| -> StepFuture {
            let next = next.clone();
            Box::pin(async move {
                let span = ctx.tracer.start_span(step.name());
                span.set_attribute("workflow_id", &ctx.workflow_id.0);
                span.set_attribute("step", step.name());

                tracing::info!(step = step.name(), workflow_id = %ctx.workflow_id, "step started");

                let (state, result) = next(step.clone(), state, ctx.clone()).await;

                match &result {
                    Ok(()) => {
                        tracing::info!(step = step.name(), "step completed");
                    }
                    Err(error) => {
                        span.record_error(&error.summary());
                        tracing::warn!(step = step.name(), error = %error, "step failed");
                    }
                }

                span.end();
                (state, result)
            })
        })
    }
}
