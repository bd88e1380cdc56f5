//! Closed set of lifecycle events an `Orchestrator` decorator can publish: a
//! tagged-variant enum rather than a generic pub/sub bus, since the event
//! set never grows at runtime.
//!
//! Subscriber dispatch follows the `DefaultCommunicationBus` shape: a
//! synchronous fan-out for callers that can't await, and an async worker
//! task fed through an unbounded channel for callers that can.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::types::{StepStatus, WorkflowId, WorkflowResult};

#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    WorkflowStarted {
        workflow_id: WorkflowId,
        total_steps: usize,
        repo_url: String,
        branch: Option<String>,
        timestamp: DateTime<Utc>,
        user_id: Option<String>,
    },
    WorkflowStepCompleted {
        workflow_id: WorkflowId,
        step: String,
        status: StepStatus,
        duration: Duration,
    },
    WorkflowCompleted {
        workflow_id: WorkflowId,
        result: WorkflowResult,
    },
    /// Escape hatch for decorator-specific signals (saga compensation
    /// started, adaptation strategy learned) without growing this enum for
    /// every new decorator.
    Custom {
        workflow_id: WorkflowId,
        name: String,
        detail: String,
    },
}

impl WorkflowEvent {
    pub fn workflow_id(&self) -> &WorkflowId {
        match self {
            WorkflowEvent::WorkflowStarted { workflow_id, .. }
            | WorkflowEvent::WorkflowStepCompleted { workflow_id, .. }
            | WorkflowEvent::WorkflowCompleted { workflow_id, .. }
            | WorkflowEvent::Custom { workflow_id, .. } => workflow_id,
        }
    }
}

pub trait EventSubscriber: Send + Sync {
    fn on_event(&self, event: &WorkflowEvent);
}

/// In-process event bus: synchronous `publish` fans out immediately on the
/// caller's task; `publish_async` hands off to a dedicated worker task so a
/// slow subscriber can't stall the orchestrator loop.
pub struct EventBus {
    subscribers: Arc<RwLock<Vec<Arc<dyn EventSubscriber>>>>,
    sender: mpsc::UnboundedSender<WorkflowEvent>,
    _worker: tokio::task::JoinHandle<()>,
}

impl EventBus {
    pub fn new() -> Arc<Self> {
        let (sender, mut receiver) = mpsc::unbounded_channel::<WorkflowEvent>();
        let subscribers: Arc<RwLock<Vec<Arc<dyn EventSubscriber>>>> = Arc::new(RwLock::new(Vec::new()));
        let worker_subscribers = subscribers.clone();

        let worker = tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                for subscriber in worker_subscribers.read().iter() {
                    subscriber.on_event(&event);
                }
            }
        });

        Arc::new(Self {
            subscribers,
            sender,
            _worker: worker,
        })
    }

    pub fn subscribe(&self, subscriber: Arc<dyn EventSubscriber>) {
        self.subscribers.write().push(subscriber);
    }

    pub fn publish(&self, event: WorkflowEvent) {
        for subscriber in self.subscribers.read().iter() {
            subscriber.on_event(&event);
        }
    }

    pub fn publish_async(&self, event: WorkflowEvent) {
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSubscriber {
        count: Arc<AtomicUsize>,
    }

    impl EventSubscriber for CountingSubscriber {
        fn on_event(&self, _event: &WorkflowEvent) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn synchronous_publish_reaches_subscribers_immediately() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        bus.subscribe(Arc::new(CountingSubscriber { count: count.clone() }));

        bus.publish(WorkflowEvent::WorkflowStarted {
            workflow_id: WorkflowId("wf".to_string()),
            total_steps: 10,
            repo_url: "https://github.com/acme/svc.git".to_string(),
            branch: None,
            timestamp: Utc::now(),
            user_id: None,
        });

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn async_publish_reaches_subscribers_eventually() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        bus.subscribe(Arc::new(CountingSubscriber { count: count.clone() }));

        bus.publish_async(WorkflowEvent::Custom {
            workflow_id: WorkflowId("wf".to_string()),
            name: "saga_compensation_started".to_string(),
            detail: "deploy failed".to_string(),
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
