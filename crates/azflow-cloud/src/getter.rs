//! Polymorphic "fetch current state" capability

use crate::client::{Fetch, ResourceClient};
use crate::context::CallContext;
use crate::error::{CloudError, Result};
use crate::operation::{OperationStore, OperationTracker};
use crate::resource::{ResourceKind, ResourceRef, ResourceState};
use async_trait::async_trait;
use std::sync::Arc;

/// Fetches the current state of a resource of any supported kind
#[async_trait]
pub trait ResourceGetter: Send + Sync {
    /// Most recent fully observed state of `target`
    ///
    /// Fails with `NotFound` when the resource is absent, `Transient` when the
    /// read should be retried later and `Permanent` for reads that can never
    /// succeed (including partial representations).
    async fn get(&self, ctx: &CallContext, target: &ResourceRef) -> Result<ResourceState>;
}

/// [`ResourceGetter`] backed by a [`ResourceClient`]
///
/// Reads that the remote answers with an operation token are recorded with
/// the tracker under the resource key; later passes poll that operation
/// instead of issuing a new read until it settles.
pub struct ClientGetter<C> {
    client: Arc<C>,
    tracker: OperationTracker<C>,
}

impl<C: ResourceClient> ClientGetter<C> {
    pub fn new(client: Arc<C>, store: Arc<dyn OperationStore>) -> Self {
        let tracker = OperationTracker::new(Arc::clone(&client), store);
        Self { client, tracker }
    }

    async fn fetch(&self, ctx: &CallContext, target: &ResourceRef) -> Result<Fetch<ResourceState>> {
        let (group, name) = (target.resource_group.as_str(), target.name.as_str());
        match target.kind {
            ResourceKind::VirtualMachine => ctx
                .run(self.client.get_vm(group, name))
                .await
                .map(|f| f.map(ResourceState::VirtualMachine)),
            ResourceKind::VirtualMachineScaleSet => ctx
                .run(self.client.get_scale_set(group, name))
                .await
                .map(|f| f.map(ResourceState::VirtualMachineScaleSet)),
        }
    }

    async fn resume(&self, ctx: &CallContext, target: &ResourceRef) -> Result<()> {
        match self.tracker.settle(ctx, &target.key()).await {
            Ok(Some(outcome)) if outcome.is_pending() => Err(CloudError::Transient(format!(
                "{} is still being provisioned",
                target
            ))),
            Ok(_) => Ok(()),
            Err(CloudError::OperationNotFound(token)) => {
                tracing::warn!(
                    resource = %target,
                    token = %token,
                    "recorded operation is unknown to the remote, reading again"
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl<C: ResourceClient> ResourceGetter for ClientGetter<C> {
    async fn get(&self, ctx: &CallContext, target: &ResourceRef) -> Result<ResourceState> {
        self.resume(ctx, target).await?;

        match self.fetch(ctx, target).await? {
            Fetch::Ready(state) => {
                validate(target, &state)?;
                Ok(state)
            }
            Fetch::Pending(token) => {
                self.tracker.track(&target.key(), "read", token).await?;
                Err(CloudError::Transient(format!(
                    "{} is not ready yet, tracking its operation",
                    target
                )))
            }
        }
    }
}

/// Reject partially populated representations
fn validate(target: &ResourceRef, state: &ResourceState) -> Result<()> {
    if state.kind() != target.kind {
        return Err(CloudError::TypeMismatch {
            expected: target.kind,
            found: state.kind(),
        });
    }
    if state.id().is_empty() || state.name().is_empty() {
        return Err(CloudError::Permanent(format!(
            "partial read of {}: missing id or name",
            target
        )));
    }
    match state.identity() {
        Some(identity) if identity.identity_type.is_empty() => Err(CloudError::Permanent(
            format!("partial read of {}: identity without a type", target),
        )),
        _ => Ok(()),
    }
}
