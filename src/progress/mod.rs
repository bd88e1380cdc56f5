//! Progress reporting pipeline: throttling, heartbeats, secret masking and
//! error-budget integration.
//!
//! Single-producer, single-consumer-task design: all mutable renderer state
//! (last-emit time, pending coalesced update, error budget) lives inside one
//! dedicated task. Producers only ever send messages or read the atomic
//! current-step counter, following the `start_event_loop` /
//! `start_cleanup_loop` background-task idiom used throughout the
//! `error_handler` and `resource` modules.

pub mod error_budget;
pub mod mask;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::time::interval;

use crate::config::ProgressConfig;
use crate::types::WorkflowId;
use error_budget::ErrorBudget;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgressStatus {
    Started,
    Running,
    Completed,
    Failed,
    Heartbeat,
}

/// A single progress update as produced by orchestrator/middleware code,
/// before renderer-side enrichment and masking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub step: usize,
    pub total: usize,
    pub stage: String,
    pub message: String,
    pub status: ProgressStatus,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl ProgressUpdate {
    pub fn percentage(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        ((100 * self.step) / self.total).min(100) as u8
    }

    pub fn is_final(&self) -> bool {
        self.step >= self.total
    }
}

/// Transport abstraction for emitted updates, decoupling the emitter from
/// how updates actually reach a caller (stdout, a websocket, a test probe).
pub trait ProgressSink: Send + Sync {
    fn emit(&self, payload: JsonValue);
}

/// Discards every update; used when no sink is injected.
#[derive(Debug, Default)]
pub struct NoopProgressSink;

impl ProgressSink for NoopProgressSink {
    fn emit(&self, _payload: JsonValue) {}
}

/// Prints each update as a JSON line on stdout.
#[derive(Debug, Default)]
pub struct StdoutProgressSink;

impl ProgressSink for StdoutProgressSink {
    fn emit(&self, payload: JsonValue) {
        println!("{}", payload);
    }
}

/// Records every emitted payload in order; used by tests to assert on
/// throttling/heartbeat/masking behavior.
#[derive(Debug, Default)]
pub struct RecordingProgressSink {
    pub emitted: parking_lot::Mutex<Vec<JsonValue>>,
}

impl ProgressSink for RecordingProgressSink {
    fn emit(&self, payload: JsonValue) {
        self.emitted.lock().push(payload);
    }
}

enum EmitterMsg {
    Update(ProgressUpdate),
    UpdateWithError {
        update: ProgressUpdate,
        error: Option<String>,
        respond: oneshot::Sender<bool>,
    },
}

/// Handle held by orchestrator/middleware code; the actual rendering state
/// lives in a background task reachable only through this channel.
pub struct ProgressEmitter {
    workflow_id: WorkflowId,
    sender: mpsc::UnboundedSender<EmitterMsg>,
    current_step: Arc<AtomicU32>,
    shutdown: Arc<Notify>,
    renderer: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ProgressEmitter {
    pub fn new(
        workflow_id: WorkflowId,
        total: usize,
        config: ProgressConfig,
        sink: Arc<dyn ProgressSink>,
    ) -> Arc<Self> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let current_step = Arc::new(AtomicU32::new(0));
        let shutdown = Arc::new(Notify::new());

        let renderer = tokio::spawn(run_renderer(
            receiver,
            sink,
            config,
            total,
            workflow_id.clone(),
            shutdown.clone(),
        ));

        Arc::new(Self {
            workflow_id,
            sender,
            current_step,
            shutdown,
            renderer: tokio::sync::Mutex::new(Some(renderer)),
        })
    }

    /// A no-op emitter for test/no-transport runs.
    pub fn noop(workflow_id: WorkflowId, total: usize) -> Arc<Self> {
        Self::new(workflow_id, total, ProgressConfig::default(), Arc::new(NoopProgressSink))
    }

    pub fn workflow_id(&self) -> &WorkflowId {
        &self.workflow_id
    }

    /// Atomic snapshot of the latest step number, safe to read without
    /// blocking the renderer.
    pub fn get_current(&self) -> u32 {
        self.current_step.load(Ordering::Acquire)
    }

    /// Enqueue an update; never blocks the caller.
    pub fn update(&self, update: ProgressUpdate) {
        self.current_step.store(update.step as u32, Ordering::Release);
        let _ = self.sender.send(EmitterMsg::Update(update));
    }

    /// Enqueue an update paired with an optional error for error-budget
    /// accounting. Returns `false` when the budget is exceeded; retries
    /// must not bypass this.
    pub async fn update_with_error_handling(&self, update: ProgressUpdate, error: Option<String>) -> bool {
        self.current_step.store(update.step as u32, Ordering::Release);
        let (respond, receiver) = oneshot::channel();
        if self
            .sender
            .send(EmitterMsg::UpdateWithError { update, error, respond })
            .is_err()
        {
            return true;
        }
        receiver.await.unwrap_or(true)
    }

    /// Stop the renderer, flushing any pending deferred update first.
    pub async fn close(&self) {
        self.shutdown.notify_waiters();
        if let Some(handle) = self.renderer.lock().await.take() {
            let _ = handle.await;
        }
    }
}

struct RendererState {
    sink: Arc<dyn ProgressSink>,
    config: ProgressConfig,
    total: usize,
    workflow_id: WorkflowId,
    started_at: Instant,
    last_emit: Option<Instant>,
    pending: Option<ProgressUpdate>,
    last_step_seen: usize,
    error_budget: ErrorBudget,
}

impl RendererState {
    fn new(config: ProgressConfig, total: usize, workflow_id: WorkflowId) -> Self {
        let error_budget = ErrorBudget::new(config.error_budget_window, config.error_budget_max_errors);
        Self {
            sink: Arc::new(NoopProgressSink),
            config,
            total,
            workflow_id,
            started_at: Instant::now(),
            last_emit: None,
            pending: None,
            last_step_seen: 0,
            error_budget,
        }
    }

    fn should_throttle(&self, update: &ProgressUpdate) -> bool {
        if update.is_final() {
            return false;
        }
        match self.last_emit {
            Some(last) => Instant::now().duration_since(last) < self.config.min_update_interval,
            None => false,
        }
    }

    fn render(&mut self, update: &ProgressUpdate) -> JsonValue {
        let elapsed = Instant::now().duration_since(self.started_at);
        let (eta_ms, eta_human) = estimate_eta(elapsed, update.step, update.total);

        let masked_message = mask::mask_str(&update.message);
        let masked_metadata = mask::mask_metadata(&update.metadata);

        serde_json::json!({
            "kind": "progress",
            "workflow_id": self.workflow_id.0,
            "step": update.step,
            "total": update.total,
            "stage": update.stage,
            "message": masked_message,
            "percentage": update.percentage(),
            "status": status_str(update.status),
            "metadata": masked_metadata,
            "elapsed_ms": elapsed.as_millis(),
            "trace_id": self.workflow_id.0,
            "eta_ms": eta_ms,
            "eta_human": eta_human,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        })
    }

    fn emit_now(&mut self, update: ProgressUpdate) {
        self.last_step_seen = update.step;
        let payload = self.render(&update);
        self.sink.emit(payload);
        self.last_emit = Some(Instant::now());
        self.pending = None;
    }

    fn handle_update(&mut self, update: ProgressUpdate) {
        if self.should_throttle(&update) {
            // Coalesce: a newer pending update supersedes the old one.
            self.pending = Some(update);
        } else {
            self.emit_now(update);
        }
    }

    fn flush_due_pending(&mut self) {
        if let Some(update) = self.pending.clone() {
            if !self.should_throttle(&update) {
                self.emit_now(update);
            }
        }
    }

    fn emit_heartbeat_if_due(&mut self) {
        let due = match self.last_emit {
            Some(last) => Instant::now().duration_since(last) >= self.config.heartbeat_interval,
            None => Instant::now().duration_since(self.started_at) >= self.config.heartbeat_interval,
        };
        if due && self.last_step_seen < self.total {
            let heartbeat = ProgressUpdate {
                step: self.last_step_seen,
                total: self.total,
                stage: "heartbeat".to_string(),
                message: "still working".to_string(),
                status: ProgressStatus::Heartbeat,
                metadata: HashMap::new(),
            };
            self.emit_now(heartbeat);
        }
    }
}

fn status_str(status: ProgressStatus) -> &'static str {
    match status {
        ProgressStatus::Started => "started",
        ProgressStatus::Running => "running",
        ProgressStatus::Completed => "completed",
        ProgressStatus::Failed => "failed",
        ProgressStatus::Heartbeat => "heartbeat",
    }
}

fn estimate_eta(elapsed: Duration, current: usize, total: usize) -> (Option<u64>, Option<String>) {
    if current == 0 || total == 0 {
        return (None, None);
    }
    let remaining = total.saturating_sub(current);
    let per_step_ms = elapsed.as_millis() as f64 / current as f64;
    let eta_ms = (per_step_ms * remaining as f64).round() as u64;
    (Some(eta_ms), Some(humanize_ms(eta_ms)))
}

fn humanize_ms(ms: u64) -> String {
    let total_secs = ms / 1000;
    let minutes = total_secs / 60;
    let seconds = total_secs % 60;
    if minutes > 0 {
        format!("{}m{}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

async fn run_renderer(
    mut receiver: mpsc::UnboundedReceiver<EmitterMsg>,
    sink: Arc<dyn ProgressSink>,
    config: ProgressConfig,
    total: usize,
    workflow_id: WorkflowId,
    shutdown: Arc<Notify>,
) {
    let mut state = RendererState::new(config, total, workflow_id);
    state.sink = sink;

    let mut ticker = interval(Duration::from_millis(20));

    loop {
        tokio::select! {
            msg = receiver.recv() => {
                match msg {
                    Some(EmitterMsg::Update(update)) => state.handle_update(update),
                    Some(EmitterMsg::UpdateWithError { update, error, respond }) => {
                        let budget_open = if error.is_some() {
                            state.error_budget.record_error()
                        } else {
                            state.error_budget.is_open()
                        };

                        if budget_open {
                            let mut update = update;
                            update.metadata.insert("error_budget_exceeded".to_string(), "true".to_string());
                            state.handle_update(update);
                            let _ = respond.send(false);
                        } else {
                            state.handle_update(update);
                            let _ = respond.send(true);
                        }
                    }
                    None => break,
                }
            }
            _ = ticker.tick() => {
                state.flush_due_pending();
                state.emit_heartbeat_if_due();
            }
            _ = shutdown.notified() => {
                if let Some(update) = state.pending.take() {
                    state.emit_now(update);
                }
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    fn update(step: usize, total: usize, message: &str) -> ProgressUpdate {
        ProgressUpdate {
            step,
            total,
            stage: "build".to_string(),
            message: message.to_string(),
            status: ProgressStatus::Running,
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn final_update_is_never_throttled() {
        let sink = Arc::new(RecordingProgressSink::default());
        let emitter = ProgressEmitter::new(
            WorkflowId("wf".to_string()),
            3,
            ProgressConfig {
                min_update_interval: StdDuration::from_secs(60),
                ..ProgressConfig::default()
            },
            sink.clone(),
        );

        emitter.update(update(1, 3, "first"));
        emitter.update(update(3, 3, "final"));
        tokio::time::sleep(StdDuration::from_millis(50)).await;
        emitter.close().await;

        let emitted = sink.emitted.lock();
        assert!(emitted.iter().any(|p| p["message"] == "final"));
    }

    #[tokio::test]
    async fn throttled_updates_coalesce_to_last_message() {
        let sink = Arc::new(RecordingProgressSink::default());
        let emitter = ProgressEmitter::new(
            WorkflowId("wf".to_string()),
            10,
            ProgressConfig {
                min_update_interval: StdDuration::from_millis(200),
                ..ProgressConfig::default()
            },
            sink.clone(),
        );

        for i in 0..50 {
            emitter.update(update(1, 10, &format!("update {i}")));
        }
        tokio::time::sleep(StdDuration::from_millis(260)).await;
        emitter.close().await;

        let emitted = sink.emitted.lock();
        assert!(emitted.len() < 50);
        assert!(emitted.last().unwrap()["message"] == "update 49");
    }

    #[tokio::test]
    async fn error_budget_opens_after_threshold() {
        let sink = Arc::new(RecordingProgressSink::default());
        let emitter = ProgressEmitter::new(
            WorkflowId("wf".to_string()),
            10,
            ProgressConfig {
                error_budget_max_errors: 2,
                error_budget_window: StdDuration::from_secs(600),
                min_update_interval: StdDuration::from_millis(0),
                ..ProgressConfig::default()
            },
            sink,
        );

        assert!(emitter.update_with_error_handling(update(1, 10, "e1"), Some("boom".to_string())).await);
        assert!(!emitter.update_with_error_handling(update(1, 10, "e2"), Some("boom again".to_string())).await);
        emitter.close().await;
    }

    #[tokio::test]
    async fn secrets_are_masked_before_emission() {
        let sink = Arc::new(RecordingProgressSink::default());
        let emitter = ProgressEmitter::new(WorkflowId("wf".to_string()), 1, ProgressConfig::default(), sink.clone());
        emitter.update(update(1, 1, "token=abcd1234efgh leaked"));
        tokio::time::sleep(StdDuration::from_millis(30)).await;
        emitter.close().await;

        let emitted = sink.emitted.lock();
        let message = emitted.last().unwrap()["message"].as_str().unwrap();
        assert!(!message.contains("abcd1234efgh"));
    }
}
