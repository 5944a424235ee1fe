//! Tracing decorator for resource clients

use crate::client::{Fetch, ResourceClient};
use crate::error::Result;
use crate::operation::{OperationStatus, OperationToken};
use crate::resource::{RoleAssignment, RoleAssignmentParameters, ScaleSetState, VmState};
use async_trait::async_trait;
use std::time::Instant;
use tracing::Instrument;

/// Wraps every call of the inner client in a span and logs its outcome
///
/// Never alters results.
#[derive(Debug, Clone)]
pub struct TracedClient<C> {
    inner: C,
}

impl<C> TracedClient<C> {
    pub fn new(inner: C) -> Self {
        Self { inner }
    }
}

fn record<T>(call: &'static str, started: Instant, result: &Result<T>) {
    let elapsed_ms = started.elapsed().as_millis() as u64;
    match result {
        Ok(_) => tracing::debug!(call, elapsed_ms, "remote call completed"),
        Err(e) => tracing::debug!(call, elapsed_ms, error = %e, "remote call failed"),
    }
}

#[async_trait]
impl<C: ResourceClient> ResourceClient for TracedClient<C> {
    async fn get_vm(&self, resource_group: &str, name: &str) -> Result<Fetch<VmState>> {
        let span = tracing::debug_span!("get_vm", resource_group, name);
        let started = Instant::now();
        let result = self.inner.get_vm(resource_group, name).instrument(span.clone()).await;
        span.in_scope(|| record("get_vm", started, &result));
        result
    }

    async fn get_scale_set(&self, resource_group: &str, name: &str) -> Result<Fetch<ScaleSetState>> {
        let span = tracing::debug_span!("get_scale_set", resource_group, name);
        let started = Instant::now();
        let result = self
            .inner
            .get_scale_set(resource_group, name)
            .instrument(span.clone())
            .await;
        span.in_scope(|| record("get_scale_set", started, &result));
        result
    }

    async fn create_role_assignment(
        &self,
        scope: &str,
        name: &str,
        params: &RoleAssignmentParameters,
    ) -> Result<RoleAssignment> {
        let span = tracing::debug_span!(
            "create_role_assignment",
            scope,
            name,
            principal_id = %params.principal_id
        );
        let started = Instant::now();
        let result = self
            .inner
            .create_role_assignment(scope, name, params)
            .instrument(span.clone())
            .await;
        span.in_scope(|| record("create_role_assignment", started, &result));
        result
    }

    async fn operation_status(&self, token: &OperationToken) -> Result<OperationStatus> {
        let span = tracing::debug_span!("operation_status", token = %token);
        let started = Instant::now();
        let result = self.inner.operation_status(token).instrument(span.clone()).await;
        span.in_scope(|| record("operation_status", started, &result));
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockResourceClient;
    use crate::error::CloudError;

    #[tokio::test]
    async fn test_results_pass_through_unchanged() {
        let mut inner = MockResourceClient::new();
        inner
            .expect_get_vm()
            .times(1)
            .returning(|_, _| Ok(Fetch::Pending(OperationToken::new("op-1"))));
        inner
            .expect_operation_status()
            .times(1)
            .returning(|t| Err(CloudError::OperationNotFound(t.to_string())));
        let client = TracedClient::new(inner);

        let fetched = tokio_test::assert_ok!(client.get_vm("rg1", "vm1").await);
        assert_eq!(fetched, Fetch::Pending(OperationToken::new("op-1")));

        let err = tokio_test::assert_err!(client.operation_status(&OperationToken::new("gone")).await);
        assert!(matches!(err, CloudError::OperationNotFound(ref t) if t == "gone"));
    }
}
