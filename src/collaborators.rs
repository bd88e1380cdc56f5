//! External collaborator contracts.
//!
//! Everything in this module is a trait the core depends on but never
//! implements for production use: concrete step bodies, the LLM-backed
//! analyzer, metrics backends, tracers and error-pattern recognizers all
//! live outside the core. A handful of no-op/in-memory implementations are
//! provided so the crate is runnable and testable on its own.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::OrchestratorError;
use crate::step::ArcStep;
use crate::types::WorkflowId;

/// Returns the ten fixed pipeline steps in execution order.
pub trait StepProvider: Send + Sync {
    fn get_analyze_step(&self) -> ArcStep;
    fn get_dockerfile_step(&self) -> ArcStep;
    fn get_build_step(&self) -> ArcStep;
    fn get_scan_step(&self) -> ArcStep;
    fn get_tag_step(&self) -> ArcStep;
    fn get_push_step(&self) -> ArcStep;
    fn get_manifests_step(&self) -> ArcStep;
    fn get_cluster_setup_step(&self) -> ArcStep;
    fn get_deploy_step(&self) -> ArcStep;
    fn get_verify_step(&self) -> ArcStep;

    /// Ordered list of all ten steps; the default wiring used by
    /// `BaseOrchestrator::new`.
    fn all_steps(&self) -> Vec<ArcStep> {
        vec![
            self.get_analyze_step(),
            self.get_dockerfile_step(),
            self.get_build_step(),
            self.get_scan_step(),
            self.get_tag_step(),
            self.get_push_step(),
            self.get_manifests_step(),
            self.get_cluster_setup_step(),
            self.get_deploy_step(),
            self.get_verify_step(),
        ]
    }
}

/// LLM-backed analysis helper used inside step bodies only.
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, prompt: &str) -> Result<String, OrchestratorError>;

    async fn analyze_with_file_tools(
        &self,
        prompt: &str,
        base_dir: &str,
    ) -> Result<String, OrchestratorError>;
}

/// Metrics sink. Extended with domain-event methods (docker build, image
/// push, k8s deploy, scan results) in addition to the base per-step
/// counters.
pub trait MetricsCollector: Send + Sync {
    fn record_step_duration(&self, step: &str, duration: Duration);
    fn record_step_success(&self, step: &str);
    fn record_step_failure(&self, step: &str, category: &str);

    fn record_workflow_started(&self, _workflow_id: &WorkflowId) {}
    fn record_workflow_ended(&self, _workflow_id: &WorkflowId, _success: bool, _duration: Duration) {}
    fn record_error_category(&self, _category: &str) {}
    fn record_domain_event(&self, _name: &str, _attributes: &HashMap<String, String>) {}
}

/// No-op metrics sink; used when no collector is injected.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetricsCollector;

impl MetricsCollector for NoopMetricsCollector {
    fn record_step_duration(&self, _step: &str, _duration: Duration) {}
    fn record_step_success(&self, _step: &str) {}
    fn record_step_failure(&self, _step: &str, _category: &str) {}
}

/// A tracing span handle.
pub trait Span: Send + Sync {
    fn set_attribute(&self, key: &str, value: &str);
    fn record_error(&self, error: &str);
    fn end(&self);
}

/// Distributed tracer contract.
pub trait Tracer: Send + Sync {
    fn start_span(&self, name: &str) -> Box<dyn Span>;
}

/// `Tracer` implemented directly on top of the `tracing` crate so the
/// binary has a working tracer without any injected dependency.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTracer;

struct TracingSpan {
    span: tracing::Span,
    _entered: Option<tracing::span::EnteredSpan>,
}

impl Span for TracingSpan {
    fn set_attribute(&self, key: &str, value: &str) {
        self.span.record(key, value);
    }

    fn record_error(&self, error: &str) {
        tracing::error!(parent: &self.span, error, "step failed");
    }

    fn end(&self) {
        // Dropping the entered guard exits the span; nothing else to do.
    }
}

impl Tracer for TracingTracer {
    fn start_span(&self, name: &str) -> Box<dyn Span> {
        let span = tracing::info_span!("step", name = %name, step.max_retries = tracing::field::Empty, workflow_id = tracing::field::Empty);
        Box::new(TracingSpan {
            span,
            _entered: None,
        })
    }
}

/// Classification used by `AdaptationEngine` to pick learned strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Network,
    Build,
    Registry,
    Kubernetes,
    Unknown,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorCategory::Network => "network",
            ErrorCategory::Build => "build",
            ErrorCategory::Registry => "registry",
            ErrorCategory::Kubernetes => "kubernetes",
            ErrorCategory::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// Recognizes the category of a failure so the adaptation engine can match
/// stored strategies.
pub trait ErrorPatternRecognizer: Send + Sync {
    fn recognize_pattern(&self, error: &OrchestratorError) -> ErrorCategory;
}

/// Keyword-table recognizer; the default used when no recognizer is
/// injected. Categorizes errors by scanning the message for known
/// substrings rather than matching on error variant.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordErrorPatternRecognizer;

impl ErrorPatternRecognizer for KeywordErrorPatternRecognizer {
    fn recognize_pattern(&self, error: &OrchestratorError) -> ErrorCategory {
        classify_error_message(&error.summary())
    }
}

/// Shared keyword classification used by both the metrics middleware and the
/// default error pattern recognizer.
pub fn classify_error_message(message: &str) -> ErrorCategory {
    let lower = message.to_lowercase();
    if lower.contains("network") || lower.contains("connection") || lower.contains("dns") {
        ErrorCategory::Network
    } else if lower.contains("build") || lower.contains("dockerfile") || lower.contains("compile") {
        ErrorCategory::Build
    } else if lower.contains("registry") || lower.contains("push") || lower.contains("pull") {
        ErrorCategory::Registry
    } else if lower.contains("kubernetes") || lower.contains("k8s") || lower.contains("pod") || lower.contains("deployment") {
        ErrorCategory::Kubernetes
    } else {
        ErrorCategory::Unknown
    }
}

/// Optional host-provided checkpoint persistence. The core never requires
/// this; it is only consulted when injected.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn save_checkpoint(&self, workflow_id: &WorkflowId, payload: serde_json::Value) -> Result<(), OrchestratorError>;
    async fn load_latest_checkpoint(&self, workflow_id: &WorkflowId) -> Result<Option<serde_json::Value>, OrchestratorError>;
    async fn cleanup_old_checkpoints(&self, max_age: Duration) -> Result<(), OrchestratorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_keywords() {
        assert_eq!(classify_error_message("temporary network timeout"), ErrorCategory::Network);
        assert_eq!(classify_error_message("docker build failed"), ErrorCategory::Build);
        assert_eq!(classify_error_message("registry push rejected"), ErrorCategory::Registry);
        assert_eq!(classify_error_message("kubernetes pod crashloop"), ErrorCategory::Kubernetes);
        assert_eq!(classify_error_message("something else entirely"), ErrorCategory::Unknown);
    }
}
