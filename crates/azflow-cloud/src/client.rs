//! Remote resource client abstraction

use crate::error::Result;
use crate::operation::{OperationStatus, OperationToken};
use crate::resource::{RoleAssignment, RoleAssignmentParameters, ScaleSetState, VmState};
use async_trait::async_trait;

/// Outcome of a read that the management API may model as a long-running fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fetch<T> {
    /// The resource representation is available
    Ready(T),
    /// The API accepted the request; completion is observed through the token
    Pending(OperationToken),
}

impl<T> Fetch<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Fetch<U> {
        match self {
            Fetch::Ready(value) => Fetch::Ready(f(value)),
            Fetch::Pending(token) => Fetch::Pending(token),
        }
    }
}

/// Facade over the cloud management API
///
/// Implementations map transport and HTTP failures onto
/// [`CloudError`](crate::CloudError): absent resources are `NotFound`,
/// throttling and 5xx are `Transient`, malformed requests are `Permanent`,
/// an unknown operation token is `OperationNotFound`, and an existing
/// identical role assignment is `AlreadyExists`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// Fetch a virtual machine by resource group and name
    async fn get_vm(&self, resource_group: &str, name: &str) -> Result<Fetch<VmState>>;

    /// Fetch a virtual machine scale set by resource group and name
    async fn get_scale_set(&self, resource_group: &str, name: &str)
    -> Result<Fetch<ScaleSetState>>;

    /// Create (or confirm) a role assignment identified by scope and name
    async fn create_role_assignment(
        &self,
        scope: &str,
        name: &str,
        params: &RoleAssignmentParameters,
    ) -> Result<RoleAssignment>;

    /// One status check for a long-running operation
    async fn operation_status(&self, token: &OperationToken) -> Result<OperationStatus>;
}
