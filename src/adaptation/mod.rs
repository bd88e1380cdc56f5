//! Learns, per failure category, which fixed adaptation actually improves
//! the odds of a retry succeeding, and hands the best candidate back to
//! whoever asked — `WithAdaptive` applies it, rather than only logging it.
//!
//! Structured after `error_handler::DefaultErrorHandler`: a registry keyed
//! by pattern, guarded by `parking_lot::RwLock`, generalized here from
//! per-agent error recovery to per-workflow-pattern learning across runs.
//! `adaptation_history` mirrors the original's `adaptationHistory[workflowID]`
//! ledger; `successful_adaptations` mirrors its `successfulAdaptations[patternID]`
//! scoreboard.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::RwLock;

use crate::collaborators::{classify_error_message, ErrorCategory};
use crate::config::AdaptationConfig;
use crate::types::{PatternId, WorkflowId};

/// One concrete adjustment the engine can recommend for a failure category.
/// Different categories populate different subsets of fields; a consumer
/// reads only the fields relevant to the knob it controls (`WithAdaptive`
/// only acts on `backoff_multiplier`/`timeout_multiplier` today, since those
/// are the only two this architecture can thread back into a retry).
#[derive(Debug, Clone, PartialEq)]
pub struct Adaptation {
    pub description: &'static str,
    pub backoff_multiplier: Option<f64>,
    pub timeout_multiplier: Option<f64>,
    pub fixed_timeout: Option<Duration>,
    pub fixed_retries: Option<u32>,
    pub retry_delay: Option<Duration>,
    pub build_memory_limit: Option<&'static str>,
    pub build_parallel: bool,
    pub build_cache: bool,
}

impl Default for Adaptation {
    fn default() -> Self {
        Self {
            description: "",
            backoff_multiplier: None,
            timeout_multiplier: None,
            fixed_timeout: None,
            fixed_retries: None,
            retry_delay: None,
            build_memory_limit: None,
            build_parallel: false,
            build_cache: false,
        }
    }
}

/// Fixed category -> candidate-adaptations table. Ordering matters: when no
/// pattern has a confident track record yet, the first candidate for a
/// category is the one tried.
fn fixed_adaptations(category: ErrorCategory) -> Vec<Adaptation> {
    match category {
        ErrorCategory::Network => vec![Adaptation {
            description: "double the retry backoff and triple the attempt timeout",
            backoff_multiplier: Some(2.0),
            timeout_multiplier: Some(3.0),
            ..Adaptation::default()
        }],
        ErrorCategory::Build => vec![Adaptation {
            description: "raise the build's memory limit and enable parallel, cached builds",
            build_memory_limit: Some("4Gi"),
            build_parallel: true,
            build_cache: true,
            ..Adaptation::default()
        }],
        ErrorCategory::Kubernetes => vec![Adaptation {
            description: "extend the rollout timeout to 20m and allow up to 8 retries",
            fixed_timeout: Some(Duration::from_secs(20 * 60)),
            fixed_retries: Some(8),
            ..Adaptation::default()
        }],
        ErrorCategory::Registry => vec![Adaptation {
            description: "retry registry operations up to 5 times with a 30s delay",
            fixed_retries: Some(5),
            retry_delay: Some(Duration::from_secs(30)),
            ..Adaptation::default()
        }],
        ErrorCategory::Unknown => vec![],
    }
}

fn pattern_id_for(category: ErrorCategory, index: usize) -> PatternId {
    PatternId(format!("{category}:{index}"))
}

#[derive(Debug, Clone)]
pub enum AdaptationEvent {
    StrategyLearned { category: ErrorCategory, pattern_id: PatternId },
}

/// One adaptation tried against one workflow, kept for
/// `AdaptationEngine::history_for`.
#[derive(Debug, Clone)]
pub struct AppliedAdaptationRecord {
    pub pattern_id: PatternId,
    pub category: ErrorCategory,
    pub adaptation: Adaptation,
    pub succeeded: bool,
}

#[derive(Debug, Clone, Default)]
struct SuccessStats {
    attempts_seen: u32,
    successes: u32,
}

impl SuccessStats {
    fn success_rate(&self) -> f64 {
        if self.attempts_seen == 0 {
            0.0
        } else {
            self.successes as f64 / self.attempts_seen as f64
        }
    }

    /// Grows toward 1.0 as more evidence accumulates; a pattern tried only
    /// once or twice is not trusted regardless of its success rate.
    fn confidence(&self) -> f64 {
        (self.attempts_seen as f64 / 10.0).min(1.0)
    }
}

/// Learns, per pattern, whether a fixed adaptation is worth recommending
/// again. One engine is shared across a process's workflow runs so later
/// runs benefit from earlier ones.
pub struct AdaptationEngine {
    config: AdaptationConfig,
    adaptation_history: RwLock<HashMap<WorkflowId, Vec<AppliedAdaptationRecord>>>,
    successful_adaptations: RwLock<HashMap<PatternId, SuccessStats>>,
}

impl AdaptationEngine {
    pub fn new(config: AdaptationConfig) -> Self {
        Self {
            config,
            adaptation_history: RwLock::new(HashMap::new()),
            successful_adaptations: RwLock::new(HashMap::new()),
        }
    }

    /// Candidate adaptations for a failure message's category, classified
    /// the same substring-matching way `classify_error_message` does, paired
    /// with their stable per-category pattern id.
    pub fn candidates(&self, message: &str) -> Vec<(PatternId, Adaptation)> {
        let category = classify_error_message(message);
        fixed_adaptations(category)
            .into_iter()
            .enumerate()
            .map(|(index, adaptation)| (pattern_id_for(category, index), adaptation))
            .collect()
    }

    /// The best candidate for this failure: a pattern that has already
    /// crossed both the confidence and success-rate thresholds, or
    /// otherwise the category's first fixed candidate, so the engine always
    /// has something to try and learn from. Returns `None` only when the
    /// category has no fixed adaptations at all.
    pub fn recommend(&self, message: &str) -> Option<(PatternId, Adaptation)> {
        let candidates = self.candidates(message);
        let guard = self.successful_adaptations.read();

        candidates
            .iter()
            .find(|(pattern_id, _)| {
                guard
                    .get(pattern_id)
                    .map(|stats| stats.confidence() >= self.config.min_confidence && stats.success_rate() >= self.config.min_success_rate)
                    .unwrap_or(false)
            })
            .cloned()
            .or_else(|| candidates.into_iter().next())
    }

    /// Record whether applying `adaptation` against `workflow_id` succeeded,
    /// returning a learned-pattern event the first time it crosses the
    /// confidence threshold.
    pub fn record_outcome(
        &self,
        workflow_id: &WorkflowId,
        pattern_id: PatternId,
        category: ErrorCategory,
        adaptation: Adaptation,
        succeeded: bool,
    ) -> Option<AdaptationEvent> {
        self.adaptation_history.write().entry(workflow_id.clone()).or_default().push(AppliedAdaptationRecord {
            pattern_id: pattern_id.clone(),
            category,
            adaptation,
            succeeded,
        });

        let mut guard = self.successful_adaptations.write();
        let stats = guard.entry(pattern_id.clone()).or_default();
        let was_confident = stats.confidence() >= self.config.min_confidence;
        stats.attempts_seen += 1;
        if succeeded {
            stats.successes += 1;
        }
        let is_confident = stats.confidence() >= self.config.min_confidence;

        if !was_confident && is_confident {
            Some(AdaptationEvent::StrategyLearned { category, pattern_id })
        } else {
            None
        }
    }

    /// Every adaptation tried against one workflow, in the order recorded.
    pub fn history_for(&self, workflow_id: &WorkflowId) -> Vec<AppliedAdaptationRecord> {
        self.adaptation_history.read().get(workflow_id).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn learns_a_pattern_after_enough_successful_attempts() {
        let engine = AdaptationEngine::new(AdaptationConfig { min_confidence: 0.5, min_success_rate: 0.5 });
        let workflow_id = WorkflowId("wf".to_string());

        let mut learned = None;
        for _ in 0..10 {
            let (pattern_id, adaptation) = engine.recommend("temporary network timeout").unwrap();
            if let Some(event) = engine.record_outcome(&workflow_id, pattern_id, ErrorCategory::Network, adaptation, true) {
                learned = Some(event);
            }
        }
        assert!(learned.is_some());
    }

    #[test]
    fn repeated_failure_still_falls_back_to_the_fixed_candidate() {
        let engine = AdaptationEngine::new(AdaptationConfig::default());
        let workflow_id = WorkflowId("wf".to_string());
        for _ in 0..10 {
            let (pattern_id, adaptation) = engine.recommend("docker build failed").unwrap();
            engine.record_outcome(&workflow_id, pattern_id, ErrorCategory::Build, adaptation, false);
        }
        let (_, adaptation) = engine.recommend("docker build failed").unwrap();
        assert!(adaptation.build_parallel);
        assert!(adaptation.build_cache);
    }

    #[test]
    fn unknown_category_has_no_fixed_candidates() {
        let engine = AdaptationEngine::new(AdaptationConfig::default());
        assert!(engine.recommend("something else entirely").is_none());
    }

    #[test]
    fn history_tracks_every_adaptation_tried_for_a_workflow() {
        let engine = AdaptationEngine::new(AdaptationConfig::default());
        let workflow_id = WorkflowId("wf".to_string());
        let (pattern_id, adaptation) = engine.recommend("kubernetes pod crashloop").unwrap();
        engine.record_outcome(&workflow_id, pattern_id, ErrorCategory::Kubernetes, adaptation, true);
        assert_eq!(engine.history_for(&workflow_id).len(), 1);
    }

    #[test]
    fn registry_category_recommends_retries_and_delay() {
        let engine = AdaptationEngine::new(AdaptationConfig::default());
        let (_, adaptation) = engine.recommend("registry push rejected").unwrap();
        assert_eq!(adaptation.fixed_retries, Some(5));
        assert_eq!(adaptation.retry_delay, Some(Duration::from_secs(30)));
    }
}
