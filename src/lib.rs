//! Workflow orchestrator for a fixed ten-step containerize-and-deploy
//! pipeline: a composable middleware chain (tracing, metrics, enhancement,
//! retry, timeout, progress) wraps each step, with optional event
//! publishing, saga compensation and adaptive retry learning layered on top
//! as decorators over a single base orchestrator.

pub mod adaptation;
pub mod collaborators;
pub mod config;
pub mod dag;
pub mod error;
pub mod error_context;
pub mod events;
pub mod middleware;
pub mod orchestrator;
pub mod progress;
pub mod saga;
pub mod state;
pub mod step;
pub mod types;

pub use collaborators::{
    Analyzer, ErrorCategory, ErrorPatternRecognizer, KeywordErrorPatternRecognizer, MetricsCollector,
    NoopMetricsCollector, Span, StateStore, StepProvider, Tracer, TracingTracer,
};
pub use config::{
    AdaptationConfig, BackoffStrategy, ErrorContextConfig, MiddlewareConfig, OrchestratorConfig, ProgressConfig,
    RetryConfig, TimeoutConfig,
};
pub use error::OrchestratorError;
pub use events::{EventBus, EventSubscriber, WorkflowEvent};
pub use orchestrator::adaptive::WithAdaptive;
pub use orchestrator::base::BaseOrchestrator;
pub use orchestrator::events::WithEvents;
pub use orchestrator::saga::WithSaga;
pub use orchestrator::Orchestrator;
pub use progress::{NoopProgressSink, ProgressEmitter, ProgressSink, ProgressUpdate, StdoutProgressSink};
pub use saga::{SagaCoordinator, SagaConfig, SagaExecution, SharedSagaCoordinator};
pub use state::{PipelineOutputs, WorkflowState};
pub use step::{ArcStep, Step, StepContext};
pub use types::{
    DeployMode, MiddlewareAdjustment, PatternId, SagaId, StepRecord, StepStatus, WorkflowArgs, WorkflowId, WorkflowResult,
};
