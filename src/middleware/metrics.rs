//! Records per-step duration/success/failure counters, plus an error
//! category, on the injected `MetricsCollector`.
//!
//! Deliberately classifies independently of the injected
//! `ErrorPatternRecognizer`: that recognizer feeds `AdaptationEngine`, which
//! only needs the five categories it has learned strategies for, while
//! metrics dashboards want the fuller operational taxonomy (auth, not-found,
//! validation, rate limiting) regardless of what the adaptation layer cares
//! about.

use std::sync::Arc;
use std::time::Instant;

use super::{Middleware, RunContext, StepFuture, StepHandler};
use crate::step::ArcStep;
use crate::state::WorkflowState;

pub struct MetricsMiddleware;

impl Middleware for MetricsMiddleware {
    fn wrap(&self, next: StepHandler) -> StepHandler {
        Arc::new(move |step: ArcStep, state: WorkflowState, ctx: RunContext| -> StepFuture {
            let next = next.clone();
            Box::pin(async move {
                let started = Instant::now();
                let name = step.name().to_string();

                let (state, result) = next(step, state, ctx.clone()).await;

                let duration = started.elapsed();
                ctx.metrics.record_step_duration(&name, duration);

                match &result {
                    Ok(()) => ctx.metrics.record_step_success(&name),
                    Err(error) => {
                        let category = classify_for_metrics(&error.summary());
                        ctx.metrics.record_step_failure(&name, category);
                        ctx.metrics.record_error_category(category);
                    }
                }

                (state, result)
            })
        })
    }
}

/// Metrics-specific error classification: a superset of the categories
/// `AdaptationEngine` learns strategies for, since a dashboard needs to
/// distinguish `auth`/`not_found`/`validation`/`rate_limit` failures that
/// adaptation has no distinct handling for.
fn classify_for_metrics(message: &str) -> &'static str {
    let lower = message.to_lowercase();
    if lower.contains("unauthorized") || lower.contains("forbidden") || lower.contains("401") || lower.contains("403") || lower.contains("auth") {
        "auth"
    } else if lower.contains("not found") || lower.contains("404") || lower.contains("no such") {
        "not_found"
    } else if lower.contains("rate limit") || lower.contains("429") || lower.contains("too many requests") {
        "rate_limit"
    } else if lower.contains("validation") || lower.contains("invalid") {
        "validation"
    } else if lower.contains("network") || lower.contains("connection") || lower.contains("dns") {
        "network"
    } else if lower.contains("build") || lower.contains("dockerfile") || lower.contains("compile") {
        "build"
    } else if lower.contains("registry") || lower.contains("push") || lower.contains("pull") {
        "registry"
    } else if lower.contains("kubernetes") || lower.contains("k8s") || lower.contains("pod") || lower.contains("deployment") {
        "kubernetes"
    } else {
        "unknown"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_categories_absent_from_the_adaptation_enum() {
        assert_eq!(classify_for_metrics("401 unauthorized"), "auth");
        assert_eq!(classify_for_metrics("image not found in registry"), "not_found");
        assert_eq!(classify_for_metrics("429 too many requests"), "rate_limit");
        assert_eq!(classify_for_metrics("validation failed: missing field"), "validation");
    }

    #[test]
    fn falls_back_to_the_shared_keyword_categories() {
        assert_eq!(classify_for_metrics("kubernetes pod crashloop"), "kubernetes");
        assert_eq!(classify_for_metrics("something else entirely"), "unknown");
    }
}
