//! Bounded per-workflow error history used to build richer prompts for the
//! injected `Analyzer` and to decide when a step's failures should escalate
//! instead of retrying again.
//!
//! Structured after the `error_handler` ring-buffer-per-key style
//! (`error_history: Arc<RwLock<HashMap<String, Vec<ErrorRecord>>>>`), scoped
//! here to a single workflow run rather than per-agent.

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;

use crate::config::ErrorContextConfig;

#[derive(Debug, Clone)]
pub struct ErrorEntry {
    pub step: String,
    pub message: String,
    pub attempt: u32,
    /// Descriptions of remediation attempts enhancement middleware made
    /// against this specific attempt before the step's next try.
    pub fixes: Vec<String>,
}

#[derive(Debug, Default)]
struct StepHistory {
    errors: VecDeque<ErrorEntry>,
    /// Fixes recorded for an attempt that hasn't produced an `ErrorEntry`
    /// yet (enhancement runs before retry observes the outcome). Drained
    /// into the matching `ErrorEntry` once `add_error` sees that attempt.
    pending_fixes: HashMap<u32, Vec<String>>,
}

/// Accumulates errors and remediation attempts per step across a single
/// workflow run, bounded so a pathological step can't grow memory without
/// limit.
pub struct ProgressiveErrorContext {
    config: ErrorContextConfig,
    history: RwLock<HashMap<String, StepHistory>>,
}

impl ProgressiveErrorContext {
    pub fn new(config: ErrorContextConfig) -> Self {
        Self {
            config,
            history: RwLock::new(HashMap::new()),
        }
    }

    pub fn add_error(&self, step: &str, message: impl Into<String>, attempt: u32) {
        let mut guard = self.history.write();
        let bucket = guard.entry(step.to_string()).or_default();
        let fixes = bucket.pending_fixes.remove(&attempt).unwrap_or_default();
        let entry = ErrorEntry {
            step: step.to_string(),
            message: message.into(),
            attempt,
            fixes,
        };
        bucket.errors.push_back(entry);
        while bucket.errors.len() > self.config.max_history {
            bucket.errors.pop_front();
        }
    }

    /// Record that enhancement middleware attached a remediation attempt to
    /// the upcoming attempt of `step`, before the step itself has run. Picked
    /// up by the next `add_error` call for that same attempt number.
    pub fn record_fix(&self, step: &str, attempt: u32, description: impl Into<String>) {
        let mut guard = self.history.write();
        let bucket = guard.entry(step.to_string()).or_default();
        bucket.pending_fixes.entry(attempt).or_default().push(description.into());
    }

    pub fn recent_errors(&self, step: &str, limit: usize) -> Vec<ErrorEntry> {
        self.history
            .read()
            .get(step)
            .map(|bucket| bucket.errors.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    pub fn step_errors(&self, step: &str) -> Vec<ErrorEntry> {
        self.history
            .read()
            .get(step)
            .map(|bucket| bucket.errors.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// True when the same step has failed at least `repeated_error_threshold`
    /// times with a message sharing a significant prefix, suggesting retries
    /// alone won't help.
    pub fn has_repeated_errors(&self, step: &str) -> bool {
        let guard = self.history.read();
        let Some(bucket) = guard.get(step) else {
            return false;
        };
        if bucket.errors.len() < self.config.repeated_error_threshold as usize {
            return false;
        }
        let last_messages: Vec<&str> = bucket
            .errors
            .iter()
            .rev()
            .take(self.config.repeated_error_threshold as usize)
            .map(|e| e.message.as_str())
            .collect();
        let first = last_messages.first().copied().unwrap_or("");
        last_messages.iter().all(|m| similar(first, m))
    }

    /// True when a step has accumulated enough distinct errors, or when any
    /// single attempt already carries `fixes_per_attempt_threshold` or more
    /// recorded fixes, that the enhancement middleware should stop trying to
    /// auto-remediate and surface the failure as-is.
    pub fn should_escalate(&self, step: &str) -> bool {
        let guard = self.history.read();
        let Some(bucket) = guard.get(step) else {
            return false;
        };
        let distinct: std::collections::HashSet<&str> =
            bucket.errors.iter().map(|e| e.message.as_str()).collect();
        if distinct.len() as u32 >= self.config.distinct_error_threshold {
            return true;
        }
        bucket
            .errors
            .iter()
            .any(|e| e.fixes.len() >= self.config.fixes_per_attempt_threshold)
    }

    /// Render the recent history for a step as a compact block suitable for
    /// inclusion in a prompt sent to the injected `Analyzer`.
    pub fn ai_context(&self, step: &str) -> String {
        let errors = self.recent_errors(step, 5);
        if errors.is_empty() {
            return String::new();
        }
        let mut out = format!("Recent failures for step '{step}':\n");
        for (i, entry) in errors.iter().enumerate() {
            out.push_str(&format!("  {}. attempt {}: {}\n", i + 1, entry.attempt, entry.message));
        }
        out
    }
}

fn similar(a: &str, b: &str) -> bool {
    let prefix_len = a.chars().count().min(b.chars().count()).min(24);
    a.chars().take(prefix_len).eq(b.chars().take(prefix_len))
}
