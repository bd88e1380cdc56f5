//! Optional alternate engine that groups steps into dependency levels and
//! runs each level's steps concurrently, instead of the one-at-a-time
//! `BaseOrchestrator` walk. Kept behind an explicit opt-in: the canonical
//! ten-step pipeline is linear and the default engine stays
//! `BaseOrchestrator`.
//!
//! Steps within a level run over independent clones of `WorkflowState`
//! (cheap: `Arc` fields only), then their outputs are folded back into one
//! state before the next level starts — `WorkflowState`'s single-writer
//! policy only needs to hold within a level, not across the whole run.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::collaborators::{ErrorPatternRecognizer, MetricsCollector, StepProvider, Tracer};
use crate::config::{BackoffStrategy, ErrorContextConfig, OrchestratorConfig};
use crate::error_context::ProgressiveErrorContext;
use crate::middleware::{default_chain, RunContext};
use crate::orchestrator::Orchestrator;
use crate::progress::{ProgressEmitter, ProgressSink};
use crate::state::WorkflowState;
use crate::step::ArcStep;
use crate::types::{StepRecord, StepStatus, WorkflowArgs, WorkflowResult};

/// Step name -> names of steps that must complete before it can start. A
/// name missing from the map is assumed to depend only on declaration order
/// (i.e. behaves like the linear pipeline).
pub type DependencyGraph = HashMap<String, Vec<String>>;

/// The default graph: each step depends on the one immediately before it,
/// reproducing `BaseOrchestrator`'s ordering with zero parallelism.
pub fn linear_graph(steps: &[ArcStep]) -> DependencyGraph {
    let mut graph = DependencyGraph::new();
    for window in steps.windows(2) {
        graph.insert(window[1].name().to_string(), vec![window[0].name().to_string()]);
    }
    if let Some(first) = steps.first() {
        graph.entry(first.name().to_string()).or_default();
    }
    graph
}

fn topological_levels(steps: &[ArcStep], graph: &DependencyGraph) -> Vec<Vec<ArcStep>> {
    let by_name: HashMap<&str, ArcStep> = steps.iter().map(|s| (s.name(), s.clone())).collect();
    let mut remaining_deps: HashMap<&str, HashSet<&str>> = steps
        .iter()
        .map(|s| {
            let deps = graph
                .get(s.name())
                .map(|d| d.iter().map(String::as_str).collect())
                .unwrap_or_default();
            (s.name(), deps)
        })
        .collect();

    let mut levels = Vec::new();
    let mut remaining: VecDeque<&str> = steps.iter().map(|s| s.name()).collect();

    while !remaining.is_empty() {
        let ready: Vec<&str> = remaining
            .iter()
            .filter(|name| remaining_deps.get(*name).map(|d| d.is_empty()).unwrap_or(true))
            .copied()
            .collect();

        if ready.is_empty() {
            // Cyclic or unsatisfiable graph: fall back to running whatever is
            // left sequentially rather than deadlocking.
            let leftover: Vec<ArcStep> = remaining.iter().filter_map(|n| by_name.get(n).cloned()).collect();
            levels.push(leftover);
            break;
        }

        for name in &ready {
            remaining.retain(|n| n != name);
            for deps in remaining_deps.values_mut() {
                deps.remove(name);
            }
        }

        levels.push(ready.iter().filter_map(|n| by_name.get(n).cloned()).collect());
    }

    levels
}

pub struct DagOrchestrator {
    step_provider: Arc<dyn StepProvider>,
    config: Arc<OrchestratorConfig>,
    tracer: Arc<dyn Tracer>,
    metrics: Arc<dyn MetricsCollector>,
    error_recognizer: Arc<dyn ErrorPatternRecognizer>,
    sink: Arc<dyn ProgressSink>,
    graph: Option<DependencyGraph>,
}

impl DagOrchestrator {
    pub fn new(
        step_provider: Arc<dyn StepProvider>,
        config: Arc<OrchestratorConfig>,
        tracer: Arc<dyn Tracer>,
        metrics: Arc<dyn MetricsCollector>,
        error_recognizer: Arc<dyn ErrorPatternRecognizer>,
        sink: Arc<dyn ProgressSink>,
        graph: Option<DependencyGraph>,
    ) -> Self {
        Self {
            step_provider,
            config,
            tracer,
            metrics,
            error_recognizer,
            sink,
            graph,
        }
    }
}

#[async_trait]
impl Orchestrator for DagOrchestrator {
    async fn run(&self, args: WorkflowArgs, cancellation: CancellationToken) -> WorkflowResult {
        let run_started = Instant::now();

        if let Err(error) = args.validate() {
            return WorkflowResult {
                success: false,
                error: error.summary(),
                duration: run_started.elapsed(),
                ..WorkflowResult::default()
            };
        }

        let workflow_id = WorkflowState::derive_id(&args);
        let all_steps = self.step_provider.all_steps();
        let total_steps = all_steps.len();
        let graph = self.graph.clone().unwrap_or_else(|| linear_graph(&all_steps));
        let levels = topological_levels(&all_steps, &graph);

        let progress = ProgressEmitter::new(workflow_id.clone(), total_steps, self.config.progress.clone(), self.sink.clone());
        let error_context = Arc::new(ProgressiveErrorContext::new(ErrorContextConfig::default()));
        let middleware_config = Arc::new(apply_adjustment(self.config.middleware.clone(), args.middleware_adjustment.as_ref()));

        let mut base_state = WorkflowState::new(workflow_id.clone(), args.clone(), all_steps.clone());
        let mut completed_count = 0usize;

        for level in levels {
            if cancellation.is_cancelled() {
                base_state.result.success = false;
                base_state.result.error = "workflow cancelled".to_string();
                break;
            }

            let chain = default_chain();
            let mut handles = Vec::new();

            for step in level {
                let skip_optional = (step.name() == crate::orchestrator::SCAN_STEP_NAME && !args.scan)
                    || (step.name() == crate::orchestrator::DEPLOY_STEP_NAME && args.deploy == crate::types::DeployMode::Skip);
                if skip_optional {
                    completed_count += 1;
                    base_state.result.steps.push(StepRecord {
                        name: step.name().to_string(),
                        status: StepStatus::Skipped,
                        duration: Duration::default(),
                        retries: 0,
                        progress: format!("{completed_count}/{total_steps}"),
                        message: format!("{} skipped (not requested)", step.name()),
                        error: String::new(),
                    });
                    continue;
                }

                let chain = chain.clone();
                let mut level_state = base_state.clone();
                level_state.current_step = completed_count + 1;
                let ctx = RunContext {
                    workflow_id: workflow_id.clone(),
                    tracer: self.tracer.clone(),
                    metrics: self.metrics.clone(),
                    error_recognizer: self.error_recognizer.clone(),
                    progress: progress.clone(),
                    error_context: error_context.clone(),
                    config: middleware_config.clone(),
                    cancellation: cancellation.clone(),
                };
                let started = Instant::now();
                handles.push(tokio::spawn(async move {
                    let (state, result) = chain(step.clone(), level_state, ctx).await;
                    (step, state, result, started.elapsed())
                }));
            }

            let mut level_failed = false;
            for handle in handles {
                let Ok((step, returned_state, result, duration)) = handle.await else {
                    continue;
                };
                completed_count += 1;

                match result {
                    Ok(()) => {
                        base_state.outputs = returned_state.outputs;
                        base_state.result.steps.push(StepRecord {
                            name: step.name().to_string(),
                            status: StepStatus::Completed,
                            duration,
                            retries: returned_state.last_attempts.saturating_sub(1),
                            progress: format!("{completed_count}/{total_steps}"),
                            message: format!("{} completed", step.name()),
                            error: String::new(),
                        });
                    }
                    Err(error) => {
                        level_failed = true;
                        base_state.result.success = false;
                        base_state.result.error = error.summary();
                        base_state.result.steps.push(StepRecord {
                            name: step.name().to_string(),
                            status: StepStatus::Failed,
                            duration,
                            retries: returned_state.last_attempts.saturating_sub(1),
                            progress: format!("{completed_count}/{total_steps}"),
                            message: format!("{} failed", step.name()),
                            error: error.summary(),
                        });
                    }
                }
            }

            if level_failed {
                break;
            }
        }

        if base_state.result.error.is_empty() {
            base_state.result.success = true;
            base_state.result.endpoint = base_state.outputs.k8s_result.clone();
            base_state.result.image_ref = base_state.outputs.build_result.clone();
            base_state.result.scan_report = base_state.outputs.scan_report.clone();
        }

        base_state.result.duration = run_started.elapsed();
        progress.close().await;
        base_state.result
    }
}

/// Apply a learned adaptation's multipliers onto this run's own copy of the
/// middleware config, rather than onto the shared default `config.middleware`.
fn apply_adjustment(mut config: crate::config::MiddlewareConfig, adjustment: Option<&crate::types::MiddlewareAdjustment>) -> crate::config::MiddlewareConfig {
    let Some(adjustment) = adjustment else {
        return config;
    };
    if let Some(multiplier) = adjustment.backoff_multiplier {
        config.retry.strategy = BackoffStrategy::Exponential { multiplier };
    }
    if let Some(multiplier) = adjustment.timeout_multiplier {
        config.timeout.default_timeout = config.timeout.default_timeout.mul_f64(multiplier);
    }
    config
}
