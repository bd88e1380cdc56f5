//! Linear execution of the fixed pipeline through the middleware chain.
//! Owns the progress emitter and per-workflow error-context lifecycle.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{Orchestrator, DEPLOY_STEP_NAME, SCAN_STEP_NAME};
use crate::collaborators::{ErrorPatternRecognizer, MetricsCollector, StepProvider, Tracer};
use crate::config::{BackoffStrategy, ErrorContextConfig, OrchestratorConfig};
use crate::error_context::ProgressiveErrorContext;
use crate::middleware::{default_chain, RunContext};
use crate::progress::{ProgressEmitter, ProgressSink, ProgressStatus, ProgressUpdate};
use crate::state::WorkflowState;
use crate::step::ArcStep;
use crate::types::{DeployMode, StepRecord, StepStatus, WorkflowResult};

pub struct BaseOrchestrator {
    step_provider: Arc<dyn StepProvider>,
    config: Arc<OrchestratorConfig>,
    tracer: Arc<dyn Tracer>,
    metrics: Arc<dyn MetricsCollector>,
    error_recognizer: Arc<dyn ErrorPatternRecognizer>,
    sink: Arc<dyn ProgressSink>,
}

impl BaseOrchestrator {
    pub fn new(
        step_provider: Arc<dyn StepProvider>,
        config: Arc<OrchestratorConfig>,
        tracer: Arc<dyn Tracer>,
        metrics: Arc<dyn MetricsCollector>,
        error_recognizer: Arc<dyn ErrorPatternRecognizer>,
        sink: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            step_provider,
            config,
            tracer,
            metrics,
            error_recognizer,
            sink,
        }
    }
}

#[async_trait]
impl Orchestrator for BaseOrchestrator {
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

        let progress = ProgressEmitter::new(workflow_id.clone(), total_steps, self.config.progress.clone(), self.sink.clone());
        let error_context = Arc::new(ProgressiveErrorContext::new(self.config.error_context.clone()));
        let middleware_config = Arc::new(apply_adjustment(self.config.middleware.clone(), args.middleware_adjustment.as_ref()));

        let mut state = WorkflowState::new(workflow_id.clone(), args.clone(), all_steps.clone());
        let chain = default_chain();

        for (index, step) in all_steps.iter().enumerate() {
            if cancellation.is_cancelled() {
                state.result.success = false;
                state.result.error = "workflow cancelled".to_string();
                progress
                    .update_with_error_handling(
                        terminal_update(&state, "workflow cancelled"),
                        Some("cancelled".to_string()),
                    )
                    .await;
                break;
            }

            state.current_step = index + 1;

            let skip_optional = (step.name() == SCAN_STEP_NAME && !args.scan)
                || (step.name() == DEPLOY_STEP_NAME && args.deploy == DeployMode::Skip);
            if skip_optional {
                state.result.steps.push(StepRecord {
                    name: step.name().to_string(),
                    status: StepStatus::Skipped,
                    duration: Duration::default(),
                    retries: 0,
                    progress: format!("{}/{}", index + 1, total_steps),
                    message: format!("{} skipped (not requested)", step.name()),
                    error: String::new(),
                });
                continue;
            }

            let started = Instant::now();

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

            let (returned_state, result) = chain(step.clone(), state, ctx).await;
            state = returned_state;
            let duration = started.elapsed();

            match result {
                Ok(()) => {
                    state.result.steps.push(StepRecord {
                        name: step.name().to_string(),
                        status: StepStatus::Completed,
                        duration,
                        retries: state.last_attempts.saturating_sub(1),
                        progress: format!("{}/{}", index + 1, total_steps),
                        message: format!("{} completed", step.name()),
                        error: String::new(),
                    });
                }
                Err(error) => {
                    let lenient_scan = step.name() == SCAN_STEP_NAME && !args.strict_mode;
                    if lenient_scan {
                        state.result.steps.push(StepRecord {
                            name: step.name().to_string(),
                            status: StepStatus::Completed,
                            duration,
                            retries: state.last_attempts.saturating_sub(1),
                            progress: format!("{}/{}", index + 1, total_steps),
                            message: format!("scan warning (non-strict mode): {}", error.summary()),
                            error: String::new(),
                        });
                        continue;
                    }

                    state.result.steps.push(StepRecord {
                        name: step.name().to_string(),
                        status: StepStatus::Failed,
                        duration,
                        retries: state.last_attempts.saturating_sub(1),
                        progress: format!("{}/{}", index + 1, total_steps),
                        message: format!("{} failed", step.name()),
                        error: error.summary(),
                    });

                    state.result.success = false;
                    state.result.error = error.summary();
                    state.result.duration = run_started.elapsed();

                    let message = format!("Failed: {}", step.name());
                    progress
                        .update_with_error_handling(terminal_update(&state, &message), Some(error.summary()))
                        .await;

                    progress.close().await;
                    return state.result;
                }
            }
        }

        if state.result.error.is_empty() {
            state.result.success = true;
            state.result.endpoint = state.outputs.k8s_result.clone();
            state.result.image_ref = state.outputs.build_result.clone();
            state.result.scan_report = state.outputs.scan_report.clone();

            progress.update(ProgressUpdate {
                step: total_steps,
                total: total_steps,
                stage: "verify".to_string(),
                message: "workflow completed".to_string(),
                status: ProgressStatus::Completed,
                metadata: Default::default(),
            });
        }

        state.result.duration = run_started.elapsed();
        progress.close().await;
        state.result
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

fn terminal_update(state: &WorkflowState, message: &str) -> ProgressUpdate {
    ProgressUpdate {
        step: state.current_step,
        total: state.total_steps,
        stage: "orchestrator".to_string(),
        message: message.to_string(),
        status: ProgressStatus::Failed,
        metadata: Default::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{KeywordErrorPatternRecognizer, NoopMetricsCollector, TracingTracer};
    use crate::progress::NoopProgressSink;
    use crate::step::test_support::ScriptedStep;

    struct FixedStepProvider {
        steps: Vec<ArcStep>,
    }

    impl StepProvider for FixedStepProvider {
        fn get_analyze_step(&self) -> ArcStep {
            self.steps[0].clone()
        }
        fn get_dockerfile_step(&self) -> ArcStep {
            self.steps[1].clone()
        }
        fn get_build_step(&self) -> ArcStep {
            self.steps[2].clone()
        }
        fn get_scan_step(&self) -> ArcStep {
            self.steps[3].clone()
        }
        fn get_tag_step(&self) -> ArcStep {
            self.steps[4].clone()
        }
        fn get_push_step(&self) -> ArcStep {
            self.steps[5].clone()
        }
        fn get_manifests_step(&self) -> ArcStep {
            self.steps[6].clone()
        }
        fn get_cluster_setup_step(&self) -> ArcStep {
            self.steps[7].clone()
        }
        fn get_deploy_step(&self) -> ArcStep {
            self.steps[8].clone()
        }
        fn get_verify_step(&self) -> ArcStep {
            self.steps[9].clone()
        }
    }

    fn all_happy_steps() -> Vec<ArcStep> {
        let names = [
            "analyze", "dockerfile", "build", "scan", "tag", "push", "manifests", "cluster_setup", "deploy", "verify",
        ];
        names.iter().map(|n| Arc::new(ScriptedStep::new(n, 0, 0, false)) as ArcStep).collect()
    }

    fn orchestrator(steps: Vec<ArcStep>) -> BaseOrchestrator {
        BaseOrchestrator::new(
            Arc::new(FixedStepProvider { steps }),
            Arc::new(OrchestratorConfig::default()),
            Arc::new(TracingTracer),
            Arc::new(NoopMetricsCollector),
            Arc::new(KeywordErrorPatternRecognizer),
            Arc::new(NoopProgressSink),
        )
    }

    #[tokio::test]
    async fn happy_path_completes_all_ten_steps() {
        let orchestrator = orchestrator(all_happy_steps());
        let args = crate::types::WorkflowArgs {
            repo_url: "https://github.com/acme/svc.git".to_string(),
            scan: true,
            ..Default::default()
        };

        let result = orchestrator.run(args, CancellationToken::new()).await;
        assert!(result.success);
        assert_eq!(result.steps.len(), 10);
        assert!(result.steps.iter().all(|s| s.status == StepStatus::Completed));
    }

    #[tokio::test]
    async fn scan_is_skipped_when_not_requested() {
        let orchestrator = orchestrator(all_happy_steps());
        let args = crate::types::WorkflowArgs {
            repo_url: "https://github.com/acme/svc.git".to_string(),
            ..Default::default()
        };

        let result = orchestrator.run(args, CancellationToken::new()).await;
        assert!(result.success);
        let scan_record = result.steps.iter().find(|s| s.name == "scan").unwrap();
        assert_eq!(scan_record.status, StepStatus::Skipped);
    }

    #[tokio::test]
    async fn deploy_is_skipped_when_deploy_mode_is_skip() {
        let orchestrator = orchestrator(all_happy_steps());
        let args = crate::types::WorkflowArgs {
            repo_url: "https://github.com/acme/svc.git".to_string(),
            deploy: crate::types::DeployMode::Skip,
            ..Default::default()
        };

        let result = orchestrator.run(args, CancellationToken::new()).await;
        assert!(result.success);
        let deploy_record = result.steps.iter().find(|s| s.name == "deploy").unwrap();
        assert_eq!(deploy_record.status, StepStatus::Skipped);
    }

    #[tokio::test]
    async fn build_failure_stops_the_pipeline() {
        let mut steps = all_happy_steps();
        steps[2] = Arc::new(ScriptedStep::new("build", 0, 99, false));
        let orchestrator = orchestrator(steps);
        let args = crate::types::WorkflowArgs {
            repo_url: "https://github.com/acme/svc.git".to_string(),
            ..Default::default()
        };

        let result = orchestrator.run(args, CancellationToken::new()).await;
        assert!(!result.success);
        assert!(!result.error.is_empty());
        assert_eq!(result.steps.len(), 3);
    }

    #[tokio::test]
    async fn scan_failure_is_non_fatal_outside_strict_mode() {
        let mut steps = all_happy_steps();
        steps[3] = Arc::new(ScriptedStep::new("scan", 0, 99, false));
        let orchestrator = orchestrator(steps);
        let args = crate::types::WorkflowArgs {
            repo_url: "https://github.com/acme/svc.git".to_string(),
            scan: true,
            ..Default::default()
        };

        let result = orchestrator.run(args, CancellationToken::new()).await;
        assert!(result.success);
        assert_eq!(result.steps.len(), 10);
    }

    #[tokio::test]
    async fn scan_failure_is_fatal_in_strict_mode() {
        let mut steps = all_happy_steps();
        steps[3] = Arc::new(ScriptedStep::new("scan", 0, 99, false));
        let orchestrator = orchestrator(steps);
        let args = crate::types::WorkflowArgs {
            repo_url: "https://github.com/acme/svc.git".to_string(),
            scan: true,
            strict_mode: true,
            ..Default::default()
        };

        let result = orchestrator.run(args, CancellationToken::new()).await;
        assert!(!result.success);
    }
}
