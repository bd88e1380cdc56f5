//! Decorator that learns from failures: on a failed run it classifies the
//! error, asks the `AdaptationEngine` for the best candidate adaptation for
//! that category, and actually applies it before retrying — both as a
//! `MiddlewareAdjustment` threaded through `WorkflowArgs` (backoff/timeout
//! multipliers the retry/timeout middleware reads back) and, where the fixed
//! pipeline exposes the knob directly, as the existing skip-scan/skip-deploy
//! adaptations. The outcome of each retry feeds back into the engine so
//! later runs in the same process recognize a pattern with a track record.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::Orchestrator;
use crate::adaptation::{Adaptation, AdaptationEngine};
use crate::collaborators::{classify_error_message, ErrorCategory};
use crate::state::WorkflowState;
use crate::types::{DeployMode, MiddlewareAdjustment, WorkflowArgs, WorkflowResult};

pub struct WithAdaptive {
    inner: Arc<dyn Orchestrator>,
    engine: Arc<AdaptationEngine>,
}

impl WithAdaptive {
    pub fn new(inner: Arc<dyn Orchestrator>, engine: Arc<AdaptationEngine>) -> Self {
        Self { inner, engine }
    }

    fn candidate_adaptations(&self, args: &WorkflowArgs) -> Vec<WorkflowArgs> {
        let mut candidates = Vec::new();

        if args.scan {
            candidates.push(WorkflowArgs {
                scan: false,
                ..args.clone()
            });
        }

        if args.deploy != DeployMode::Skip {
            candidates.push(WorkflowArgs {
                deploy: DeployMode::Skip,
                ..args.clone()
            });
        }

        candidates
    }
}

fn middleware_adjustment(adaptation: &Adaptation) -> MiddlewareAdjustment {
    MiddlewareAdjustment {
        backoff_multiplier: adaptation.backoff_multiplier,
        timeout_multiplier: adaptation.timeout_multiplier,
    }
}

#[async_trait]
impl Orchestrator for WithAdaptive {
    async fn run(&self, args: WorkflowArgs, cancellation: CancellationToken) -> WorkflowResult {
        let result = self.inner.run(args.clone(), cancellation.clone()).await;
        if result.success {
            return result;
        }

        let workflow_id = WorkflowState::derive_id(&args);
        let category: ErrorCategory = classify_error_message(&result.error);
        let recommendation = self.engine.recommend(&result.error);

        if let Some((pattern_id, adaptation)) = &recommendation {
            tracing::info!(
                category = %category,
                pattern_id = %pattern_id,
                adaptation = adaptation.description,
                "applying recommended adaptation for this retry"
            );
        }

        let adjustment = recommendation.as_ref().map(|(_, adaptation)| middleware_adjustment(adaptation));

        let mut candidates = self.candidate_adaptations(&args);
        if candidates.is_empty() {
            // No args-level knob (scan/deploy) differs from the failing run,
            // but a middleware adjustment might still help; give it one try.
            candidates.push(args.clone());
        }

        for mut adapted_args in candidates {
            if cancellation.is_cancelled() {
                break;
            }

            if let Some(adjustment) = adjustment.clone() {
                adapted_args.middleware_adjustment = Some(adjustment);
            }

            let retry_result = self.inner.run(adapted_args, cancellation.clone()).await;
            let succeeded = retry_result.success;

            if let Some((pattern_id, adaptation)) = recommendation.clone() {
                self.engine.record_outcome(&workflow_id, pattern_id, category, adaptation, succeeded);
            }

            if succeeded {
                return retry_result;
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AdaptationConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyOnScanOrchestrator {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Orchestrator for FlakyOnScanOrchestrator {
        async fn run(&self, args: WorkflowArgs, _cancellation: CancellationToken) -> WorkflowResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if args.scan {
                WorkflowResult {
                    success: false,
                    error: "build failed: scanner crashed".to_string(),
                    ..WorkflowResult::default()
                }
            } else {
                WorkflowResult {
                    success: true,
                    ..WorkflowResult::default()
                }
            }
        }
    }

    #[tokio::test]
    async fn retries_with_scan_disabled_after_a_failure() {
        let inner = Arc::new(FlakyOnScanOrchestrator { calls: AtomicUsize::new(0) });
        let decorator = WithAdaptive::new(inner.clone(), Arc::new(AdaptationEngine::new(AdaptationConfig::default())));

        let args = WorkflowArgs {
            repo_url: "https://github.com/acme/svc.git".to_string(),
            scan: true,
            ..Default::default()
        };

        let result = decorator.run(args, CancellationToken::new()).await;
        assert!(result.success);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn gives_up_once_adaptations_are_exhausted() {
        struct AlwaysFails;
        #[async_trait]
        impl Orchestrator for AlwaysFails {
            async fn run(&self, _args: WorkflowArgs, _cancellation: CancellationToken) -> WorkflowResult {
                WorkflowResult {
                    success: false,
                    error: "kubernetes pod crashloop".to_string(),
                    ..WorkflowResult::default()
                }
            }
        }

        let decorator = WithAdaptive::new(Arc::new(AlwaysFails), Arc::new(AdaptationEngine::new(AdaptationConfig::default())));
        let result = decorator.run(WorkflowArgs::default(), CancellationToken::new()).await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn applies_the_recommended_backoff_and_timeout_multipliers() {
        struct NetworkFlakeOrchestrator {
            seen_adjustment: Arc<parking_lot::Mutex<Option<MiddlewareAdjustment>>>,
        }

        #[async_trait]
        impl Orchestrator for NetworkFlakeOrchestrator {
            async fn run(&self, args: WorkflowArgs, _cancellation: CancellationToken) -> WorkflowResult {
                if let Some(adjustment) = &args.middleware_adjustment {
                    *self.seen_adjustment.lock() = Some(adjustment.clone());
                    return WorkflowResult {
                        success: true,
                        ..WorkflowResult::default()
                    };
                }
                WorkflowResult {
                    success: false,
                    error: "temporary network timeout".to_string(),
                    ..WorkflowResult::default()
                }
            }
        }

        let seen_adjustment = Arc::new(parking_lot::Mutex::new(None));
        let inner = Arc::new(NetworkFlakeOrchestrator { seen_adjustment: seen_adjustment.clone() });
        let decorator = WithAdaptive::new(inner, Arc::new(AdaptationEngine::new(AdaptationConfig::default())));

        let result = decorator.run(WorkflowArgs::default(), CancellationToken::new()).await;
        assert!(result.success);

        let adjustment = seen_adjustment.lock().clone().expect("retry carried an adjustment");
        assert_eq!(adjustment.backoff_multiplier, Some(2.0));
        assert_eq!(adjustment.timeout_multiplier, Some(3.0));
    }
}
