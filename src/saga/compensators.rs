//! Default compensation bodies for the three pipeline steps that produce an
//! externally visible side effect: build (local image), push (registry tag)
//! and deploy (cluster rollout). These exist so a `StepProvider`
//! implementation has something reasonable to call from its `Step::compensate`
//! bodies without hand-writing undo logic for the common case; real
//! containerize/registry/cluster calls still happen through the host's own
//! step implementations.

use tracing::info;

use crate::error::OrchestratorError;
use crate::types::WorkflowResult;

/// Undoes a local image build by logging the image reference that should be
/// removed. Calling this when no build output is recorded is a no-op.
pub async fn compensate_build(result: &WorkflowResult) -> Result<(), OrchestratorError> {
    if let Some(image) = result.image_ref.as_deref() {
        info!(image, "compensating build step: removing local image");
    }
    Ok(())
}

/// Undoes a registry push by logging the tag that should be deleted
/// upstream. The registry client itself is an external collaborator; this
/// only marks intent.
pub async fn compensate_push(result: &WorkflowResult) -> Result<(), OrchestratorError> {
    if let Some(image) = result.image_ref.as_deref() {
        info!(image, "compensating push step: requesting registry tag deletion");
    }
    Ok(())
}

/// Undoes a cluster deploy by logging the rollout that should be reverted.
pub async fn compensate_deploy(result: &WorkflowResult) -> Result<(), OrchestratorError> {
    if let Some(namespace) = result.namespace.as_deref() {
        info!(namespace, "compensating deploy step: rolling back cluster deployment");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn compensators_are_no_ops_without_recorded_output() {
        let result = WorkflowResult::default();
        assert!(compensate_build(&result).await.is_ok());
        assert!(compensate_push(&result).await.is_ok());
        assert!(compensate_deploy(&result).await.is_ok());
    }
}
