//! Aggregate configuration for the orchestration engine.
//!
//! Follows the per-component `*Config` + `Default` + `with_*` builder style
//! (`SchedulerConfig`, `ResourceManagerConfig`, `ErrorHandlerConfig`).

use std::env;
use std::time::Duration;

/// Backoff shape used by `RetryMiddleware`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackoffStrategy {
    /// `base_delay * (attempt + 1)`.
    Linear,
    /// `base_delay * multiplier^attempt`, used once adaptive strategies are
    /// enabled.
    Exponential { multiplier: f64 },
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        BackoffStrategy::Linear
    }
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(30),
            strategy: BackoffStrategy::Linear,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    pub default_timeout: Duration,
    pub min_timeout: Duration,
    pub max_timeout: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(120),
            min_timeout: Duration::from_secs(1),
            max_timeout: Duration::from_secs(1800),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MiddlewareConfig {
    pub retry: RetryConfig,
    pub timeout: TimeoutConfig,
}

/// Progress emitter tunables, overridable via three environment variables.
#[derive(Debug, Clone)]
pub struct ProgressConfig {
    pub min_update_interval: Duration,
    pub heartbeat_interval: Duration,
    pub error_budget_window: Duration,
    pub error_budget_max_errors: u32,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            min_update_interval: Duration::from_millis(100),
            heartbeat_interval: Duration::from_secs(15),
            error_budget_window: Duration::from_secs(600),
            error_budget_max_errors: 5,
        }
    }
}

impl ProgressConfig {
    /// Read `PROGRESS_MIN_UPDATE_MS`, `PROGRESS_HEARTBEAT_SEC`,
    /// `ERROR_BUDGET_WINDOW_SEC`, each bounded to sane minima.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(ms) = read_env_u64("PROGRESS_MIN_UPDATE_MS") {
            config.min_update_interval = Duration::from_millis(ms.max(10));
        }
        if let Some(secs) = read_env_u64("PROGRESS_HEARTBEAT_SEC") {
            config.heartbeat_interval = Duration::from_secs(secs.max(1));
        }
        if let Some(secs) = read_env_u64("ERROR_BUDGET_WINDOW_SEC") {
            config.error_budget_window = Duration::from_secs(secs.max(1));
        }

        config
    }
}

fn read_env_u64(key: &str) -> Option<u64> {
    env::var(key).ok().and_then(|v| v.parse::<u64>().ok())
}

#[derive(Debug, Clone)]
pub struct ErrorContextConfig {
    pub max_history: usize,
    pub repeated_error_threshold: u32,
    pub distinct_error_threshold: u32,
    pub fixes_per_attempt_threshold: usize,
}

impl Default for ErrorContextConfig {
    fn default() -> Self {
        Self {
            max_history: 50,
            repeated_error_threshold: 3,
            distinct_error_threshold: 5,
            fixes_per_attempt_threshold: 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AdaptationConfig {
    pub min_confidence: f64,
    pub min_success_rate: f64,
}

impl Default for AdaptationConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.5,
            min_success_rate: 0.5,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OrchestratorConfig {
    pub middleware: MiddlewareConfig,
    pub progress: ProgressConfig,
    pub error_context: ErrorContextConfig,
    pub adaptation: AdaptationConfig,
}

impl OrchestratorConfig {
    pub fn from_env() -> Self {
        Self {
            progress: ProgressConfig::from_env(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_overrides_are_bounded() {
        env::set_var("PROGRESS_MIN_UPDATE_MS", "0");
        let config = ProgressConfig::from_env();
        assert!(config.min_update_interval >= Duration::from_millis(10));
        env::remove_var("PROGRESS_MIN_UPDATE_MS");
    }

    #[test]
    fn default_progress_config_has_expected_defaults() {
        let config = ProgressConfig::default();
        assert_eq!(config.min_update_interval, Duration::from_millis(100));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(15));
        assert_eq!(config.error_budget_window, Duration::from_secs(600));
    }
}
