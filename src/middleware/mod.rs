//! The middleware chain that wraps every step execution: tracing, metrics,
//! enhancement, retry, timeout and progress, composed around the step's own
//! `execute` body.
//!
//! Composition happens once, at chain-build time: each `Middleware::wrap`
//! takes the already-built inner `StepHandler` and returns a new one, the
//! same onion-layering a `tower::Layer` stack uses. `WorkflowState` is
//! threaded through by value rather than by `&mut` reference so the chain's
//! handler type can stay `'static` and boxed without borrowing across an
//! await point owned by an outer caller.

pub mod enhancement;
pub mod metrics;
pub mod progress;
pub mod retry;
pub mod timeout;
pub mod tracing_mw;

use std::sync::Arc;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::collaborators::{ErrorPatternRecognizer, MetricsCollector, Tracer};
use crate::config::MiddlewareConfig;
use crate::error::OrchestratorError;
use crate::error_context::ProgressiveErrorContext;
use crate::progress::ProgressEmitter;
use crate::step::ArcStep;
use crate::state::WorkflowState;
use crate::types::WorkflowId;

/// Outcome of one step handler invocation: the state is always handed back,
/// whether the step succeeded or failed, so later middleware layers and the
/// orchestrator can continue using it.
pub type StepOutcome = (WorkflowState, Result<(), OrchestratorError>);
pub type StepFuture = BoxFuture<'static, StepOutcome>;

/// A fully composed (or partially composed) step handler.
pub type StepHandler = Arc<dyn Fn(ArcStep, WorkflowState, RunContext) -> StepFuture + Send + Sync>;

/// Shared, cloneable context passed alongside the state to every layer.
#[derive(Clone)]
pub struct RunContext {
    pub workflow_id: WorkflowId,
    pub tracer: Arc<dyn Tracer>,
    pub metrics: Arc<dyn MetricsCollector>,
    pub error_recognizer: Arc<dyn ErrorPatternRecognizer>,
    pub progress: Arc<ProgressEmitter>,
    pub error_context: Arc<ProgressiveErrorContext>,
    pub config: Arc<MiddlewareConfig>,
    pub cancellation: CancellationToken,
}

/// One layer of the chain. `wrap` receives the handler representing
/// "everything inside this layer" and returns a new handler representing
/// "this layer plus everything inside it".
pub trait Middleware: Send + Sync {
    fn wrap(&self, next: StepHandler) -> StepHandler;
}

/// The innermost handler: just calls the step's own `execute`.
fn base_handler() -> StepHandler {
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

/// Fold a list of middleware into a single handler, outermost first. The
/// order given is the order they run on the way in; they unwind in reverse
/// on the way out, producing the canonical
/// tracing → metrics → enhancement → retry → timeout → progress → body chain.
pub fn build_chain(layers: Vec<Arc<dyn Middleware>>) -> StepHandler {
    layers.into_iter().rev().fold(base_handler(), |inner, layer| layer.wrap(inner))
}

/// Convenience constructor for the default layer order.
pub fn default_chain() -> StepHandler {
    let layers: Vec<Arc<dyn Middleware>> = vec![
        Arc::new(tracing_mw::TracingMiddleware),
        Arc::new(metrics::MetricsMiddleware),
        Arc::new(enhancement::EnhancementMiddleware),
        Arc::new(retry::RetryMiddleware),
        Arc::new(timeout::TimeoutMiddleware),
        Arc::new(progress::ProgressMiddleware),
    ];
    build_chain(layers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{KeywordErrorPatternRecognizer, NoopMetricsCollector, TracingTracer};
    use crate::config::{ErrorContextConfig, MiddlewareConfig};
    use crate::step::test_support::ScriptedStep;
    use crate::types::{WorkflowArgs, WorkflowId};

    fn test_context() -> RunContext {
        let workflow_id = WorkflowId("wf-test".to_string());
        RunContext {
            workflow_id: workflow_id.clone(),
            tracer: Arc::new(TracingTracer),
            metrics: Arc::new(NoopMetricsCollector),
            error_recognizer: Arc::new(KeywordErrorPatternRecognizer),
            progress: ProgressEmitter::noop(workflow_id, 1),
            error_context: Arc::new(ProgressiveErrorContext::new(ErrorContextConfig::default())),
            config: Arc::new(MiddlewareConfig::default()),
            cancellation: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn chain_runs_step_body_through_every_layer() {
        let chain = default_chain();
        let step: ArcStep = Arc::new(ScriptedStep::new("build", 0, 0, false));
        let state = WorkflowState::new(WorkflowId("wf-test".to_string()), WorkflowArgs::default(), vec![step.clone()]);

        let (_, result) = chain(step, state, test_context()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn chain_retries_transient_failures_before_succeeding() {
        let chain = default_chain();
        let step: ArcStep = Arc::new(ScriptedStep::new("push", 3, 2, false));
        let state = WorkflowState::new(WorkflowId("wf-test".to_string()), WorkflowArgs::default(), vec![step.clone()]);

        let (_, result) = chain(step.clone(), state, test_context()).await;
        assert!(result.is_ok());
    }
}
