//! The `Orchestrator` capability and its base/decorator implementations.
//!
//! The four orchestrator variants (base, event-aware, saga-aware, adaptive)
//! are expressed as decorators over one base rather than an inheritance
//! hierarchy, mirroring how `AgentRuntime` composes
//! `Arc<dyn ... + Send + Sync>` collaborators instead of subclassing them.

pub mod adaptive;
pub mod base;
pub mod events;
pub mod saga;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::types::{WorkflowArgs, WorkflowResult};

/// Name every `StepProvider` implementation is expected to give its
/// vulnerability-scan step, used by `BaseOrchestrator` to apply the
/// non-strict-mode leniency decided for scan failures and to skip it
/// entirely when `WorkflowArgs::scan` is false.
pub const SCAN_STEP_NAME: &str = "scan";

/// Name of the cluster-deploy step, skipped entirely when
/// `WorkflowArgs::deploy` is `DeployMode::Skip`.
pub const DEPLOY_STEP_NAME: &str = "deploy";

#[async_trait]
pub trait Orchestrator: Send + Sync {
    async fn run(&self, args: WorkflowArgs, cancellation: CancellationToken) -> WorkflowResult;
}
