//! Role assignments for managed identities
//!
//! Grants a role to the system-assigned identity of a VM or scale set once
//! that identity has a principal. Assignments are removed by the platform
//! together with their resource, so delete has nothing to do.

use crate::client::ResourceClient;
use crate::context::CallContext;
use crate::dispatch::{self, KindReconciler, PassReport, SpecPhase};
use crate::error::{CloudError, ErrorClass, Result, ResultExt};
use crate::getter::{ClientGetter, ResourceGetter};
use crate::operation::OperationStore;
use crate::resource::{
    BUILT_IN_CONTRIBUTOR_ID, ResourceKind, ResourceRef, RoleAssignment, RoleAssignmentParameters,
    RoleAssignmentSpec,
};
use async_trait::async_trait;
use std::sync::Arc;

/// Result of a successful binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignOutcome {
    /// The remote created the assignment
    Created(RoleAssignment),
    /// An assignment with this name already binds the principal
    AlreadyExists,
}

/// Identity-binding reconciler
pub struct RoleAssignmentService<C> {
    client: Arc<C>,
    getter: Arc<dyn ResourceGetter>,
    subscription_id: String,
    resource_group: String,
    role_definition_id: String,
}

impl<C: ResourceClient + 'static> RoleAssignmentService<C> {
    /// Service that reads state through a [`ClientGetter`] over the same client
    pub fn new(
        client: Arc<C>,
        store: Arc<dyn OperationStore>,
        subscription_id: impl Into<String>,
        resource_group: impl Into<String>,
    ) -> Self {
        let getter = Arc::new(ClientGetter::new(Arc::clone(&client), store));
        Self::with_getter(client, getter, subscription_id, resource_group)
    }
}

impl<C: ResourceClient> RoleAssignmentService<C> {
    pub fn with_getter(
        client: Arc<C>,
        getter: Arc<dyn ResourceGetter>,
        subscription_id: impl Into<String>,
        resource_group: impl Into<String>,
    ) -> Self {
        Self {
            client,
            getter,
            subscription_id: subscription_id.into(),
            resource_group: resource_group.into(),
            role_definition_id: BUILT_IN_CONTRIBUTOR_ID.to_string(),
        }
    }

    /// Grant a role other than the built-in Contributor
    pub fn with_role_definition(mut self, role_definition_id: impl Into<String>) -> Self {
        self.role_definition_id = role_definition_id.into();
        self
    }

    pub fn scope(&self) -> String {
        format!("/subscriptions/{}/", self.subscription_id)
    }

    pub fn role_definition_path(&self) -> String {
        format!(
            "/subscriptions/{}/providers/Microsoft.Authorization/roleDefinitions/{}",
            self.subscription_id, self.role_definition_id
        )
    }

    /// Run one reconcile pass over the declared specs
    pub async fn reconcile(&self, ctx: &CallContext, specs: &[RoleAssignmentSpec]) -> Result<PassReport> {
        dispatch::dispatch(ctx, specs, self).await
    }

    /// No-op; assignments go away with the resource that owns the identity
    pub async fn delete(&self, _ctx: &CallContext) -> Result<()> {
        tracing::debug!("role assignments are removed with their resource, nothing to delete");
        Ok(())
    }

    /// Fetch the owning resource, then bind its principal
    pub async fn bind(
        &self,
        ctx: &CallContext,
        kind: ResourceKind,
        spec: &RoleAssignmentSpec,
        phase: &mut SpecPhase,
    ) -> Result<AssignOutcome> {
        let short = short_kind(kind);
        let group = spec
            .resource_group
            .as_deref()
            .unwrap_or(self.resource_group.as_str());
        let target = ResourceRef::new(kind, group, spec.machine_name.as_str());

        phase.advance(SpecPhase::Fetching);
        let state = self
            .getter
            .get(ctx, &target)
            .await
            .with_context(|| format!("cannot get {} to assign role to system assigned identity", short))?;

        if state.kind() != kind {
            return Err(CloudError::TypeMismatch {
                expected: kind,
                found: state.kind(),
            });
        }

        let principal_id = state
            .identity()
            .and_then(|identity| identity.principal())
            .ok_or_else(|| CloudError::MissingPrincipal {
                kind,
                name: spec.machine_name.clone(),
            })?
            .to_string();

        phase.advance(SpecPhase::Assigning);
        let params = RoleAssignmentParameters {
            role_definition_id: self.role_definition_path(),
            principal_id,
        };
        let outcome = match ctx
            .run(self.client.create_role_assignment(&self.scope(), &spec.name, &params))
            .await
        {
            Ok(assignment) => AssignOutcome::Created(assignment),
            Err(e) if e.class() == ErrorClass::AlreadyExists => AssignOutcome::AlreadyExists,
            Err(e) => {
                return Err(e.context(format!(
                    "cannot assign role to {} system assigned identity",
                    short
                )));
            }
        };

        tracing::info!(
            kind = %kind,
            machine = %spec.machine_name,
            assignment = %spec.name,
            existed = matches!(outcome, AssignOutcome::AlreadyExists),
            "successfully created role assignment for generated identity"
        );
        phase.advance(SpecPhase::Done);
        Ok(outcome)
    }
}

#[async_trait]
impl<C: ResourceClient> KindReconciler for RoleAssignmentService<C> {
    async fn reconcile_virtual_machine(
        &self,
        ctx: &CallContext,
        spec: &RoleAssignmentSpec,
        phase: &mut SpecPhase,
    ) -> Result<()> {
        self.bind(ctx, ResourceKind::VirtualMachine, spec, phase)
            .await
            .map(|_| ())
    }

    async fn reconcile_scale_set(
        &self,
        ctx: &CallContext,
        spec: &RoleAssignmentSpec,
        phase: &mut SpecPhase,
    ) -> Result<()> {
        self.bind(ctx, ResourceKind::VirtualMachineScaleSet, spec, phase)
            .await
            .map(|_| ())
    }
}

fn short_kind(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::VirtualMachine => "VM",
        ResourceKind::VirtualMachineScaleSet => "VMSS",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Fetch, MockResourceClient};
    use crate::operation::MemoryOperationStore;
    use crate::resource::{Identity, ResourceState, ScaleSetState, VmState};

    const CONTRIBUTOR: &str = "/subscriptions/sub1/providers/Microsoft.Authorization/roleDefinitions/b24988ac-6180-42a0-ab88-20f7382dd24c";

    fn vm(name: &str, identity: Option<Identity>) -> VmState {
        VmState {
            id: format!("/subscriptions/sub1/resourceGroups/rg1/providers/Microsoft.Compute/virtualMachines/{}", name),
            name: name.to_string(),
            location: "westeurope".to_string(),
            provisioning_state: None,
            identity,
        }
    }

    fn service(client: MockResourceClient) -> RoleAssignmentService<MockResourceClient> {
        RoleAssignmentService::new(
            Arc::new(client),
            Arc::new(MemoryOperationStore::new()),
            "sub1",
            "rg1",
        )
    }

    fn created(scope: &str, name: &str, params: &RoleAssignmentParameters) -> RoleAssignment {
        RoleAssignment {
            id: Some(format!("{}providers/Microsoft.Authorization/roleAssignments/{}", scope, name)),
            name: name.to_string(),
            scope: scope.to_string(),
            role_definition_id: params.role_definition_id.clone(),
            principal_id: params.principal_id.clone(),
        }
    }

    #[tokio::test]
    async fn test_vm_identity_gets_contributor_role() {
        let mut client = MockResourceClient::new();
        client
            .expect_get_vm()
            .withf(|rg, name| rg == "rg1" && name == "vm1")
            .times(1)
            .returning(|_, name| Ok(Fetch::Ready(vm(name, Some(Identity::system_assigned("p1"))))));
        client
            .expect_create_role_assignment()
            .withf(|scope, name, params| {
                scope == "/subscriptions/sub1/"
                    && name == "vm1"
                    && params.role_definition_id == CONTRIBUTOR
                    && params.principal_id == "p1"
            })
            .times(1)
            .returning(|scope, name, params| Ok(created(scope, name, params)));

        let specs = vec![RoleAssignmentSpec::new(ResourceKind::VirtualMachine, "vm1", "vm1")];
        let report = service(client)
            .reconcile(&CallContext::background(), &specs)
            .await
            .unwrap();

        assert_eq!(report.specs[0].phase, SpecPhase::Done);
    }

    #[tokio::test]
    async fn test_scale_set_identity_is_bound() {
        let mut client = MockResourceClient::new();
        client.expect_get_vm().never();
        client.expect_get_scale_set().times(1).returning(|_, name| {
            Ok(Fetch::Ready(ScaleSetState {
                id: format!("/vmss/{}", name),
                name: name.to_string(),
                location: "westeurope".to_string(),
                provisioning_state: None,
                identity: Some(Identity::system_assigned("abc")),
                capacity: Some(2),
            }))
        });
        client
            .expect_create_role_assignment()
            .withf(|_, name, params| name == "ra-pool0" && params.principal_id == "abc")
            .times(1)
            .returning(|scope, name, params| Ok(created(scope, name, params)));

        let spec = RoleAssignmentSpec::new(ResourceKind::VirtualMachineScaleSet, "pool0", "ra-pool0");
        let mut phase = SpecPhase::Pending;
        let outcome = service(client)
            .bind(&CallContext::background(), ResourceKind::VirtualMachineScaleSet, &spec, &mut phase)
            .await
            .unwrap();

        assert!(matches!(outcome, AssignOutcome::Created(ref a) if a.principal_id == "abc"));
        assert_eq!(phase, SpecPhase::Done);
    }

    #[tokio::test]
    async fn test_missing_principal_fails_before_create() {
        for identity in [None, Some(Identity::system_assigned(""))] {
            let mut client = MockResourceClient::new();
            let identity_ref = identity.clone();
            client
                .expect_get_vm()
                .returning(move |_, name| Ok(Fetch::Ready(vm(name, identity_ref.clone()))));
            client.expect_create_role_assignment().never();

            let specs = vec![RoleAssignmentSpec::new(ResourceKind::VirtualMachine, "vm1", "vm1")];
            let err = service(client)
                .reconcile(&CallContext::background(), &specs)
                .await
                .unwrap_err();

            assert!(matches!(err.root(), CloudError::MissingPrincipal { .. }));
            assert!(matches!(err, CloudError::Reconcile { phase: SpecPhase::Fetching, .. }));
        }
    }

    #[tokio::test]
    async fn test_second_binding_is_idempotent() {
        let mut client = MockResourceClient::new();
        client
            .expect_get_vm()
            .times(2)
            .returning(|_, name| Ok(Fetch::Ready(vm(name, Some(Identity::system_assigned("p1"))))));
        let mut seq = mockall::Sequence::new();
        client
            .expect_create_role_assignment()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|scope, name, params| Ok(created(scope, name, params)));
        client
            .expect_create_role_assignment()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, name, _| Err(CloudError::AlreadyExists(name.to_string())));

        let service = service(client);
        let specs = vec![RoleAssignmentSpec::new(ResourceKind::VirtualMachine, "vm1", "vm1")];
        let ctx = CallContext::background();

        let first = service.reconcile(&ctx, &specs).await.unwrap();
        let second = service.reconcile(&ctx, &specs).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_fetch_error_carries_context() {
        let mut client = MockResourceClient::new();
        client
            .expect_get_scale_set()
            .returning(|_, name| Err(CloudError::NotFound(name.to_string())));
        client.expect_create_role_assignment().never();

        let specs = vec![RoleAssignmentSpec::new(ResourceKind::VirtualMachineScaleSet, "pool0", "ra")];
        let err = service(client)
            .reconcile(&CallContext::background(), &specs)
            .await
            .unwrap_err();

        assert!(err.is_not_found());
        assert!(err
            .to_string()
            .contains("cannot get VMSS to assign role to system assigned identity"));
    }

    #[tokio::test]
    async fn test_create_error_carries_context() {
        let mut client = MockResourceClient::new();
        client
            .expect_get_vm()
            .returning(|_, name| Ok(Fetch::Ready(vm(name, Some(Identity::system_assigned("p1"))))));
        client
            .expect_create_role_assignment()
            .returning(|_, _, _| Err(CloudError::Permanent("principal not found in directory".into())));

        let specs = vec![RoleAssignmentSpec::new(ResourceKind::VirtualMachine, "vm1", "vm1")];
        let err = service(client)
            .reconcile(&CallContext::background(), &specs)
            .await
            .unwrap_err();

        assert!(matches!(err, CloudError::Reconcile { phase: SpecPhase::Assigning, .. }));
        assert!(err
            .to_string()
            .contains("cannot assign role to VM system assigned identity"));
    }

    #[tokio::test]
    async fn test_spec_resource_group_and_custom_role() {
        let mut client = MockResourceClient::new();
        client
            .expect_get_vm()
            .withf(|rg, _| rg == "other-rg")
            .returning(|_, name| Ok(Fetch::Ready(vm(name, Some(Identity::system_assigned("p1"))))));
        client
            .expect_create_role_assignment()
            .withf(|_, _, params| params.role_definition_id.ends_with("/roleDefinitions/reader-id"))
            .times(1)
            .returning(|scope, name, params| Ok(created(scope, name, params)));

        let service = service(client).with_role_definition("reader-id");
        let specs = vec![
            RoleAssignmentSpec::new(ResourceKind::VirtualMachine, "vm1", "vm1").with_resource_group("other-rg"),
        ];
        service.reconcile(&CallContext::background(), &specs).await.unwrap();
    }

    /// Getter that answers with a fixed state regardless of the target
    struct FixedGetter(ResourceState);

    #[async_trait]
    impl ResourceGetter for FixedGetter {
        async fn get(&self, _ctx: &CallContext, _target: &ResourceRef) -> Result<ResourceState> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn test_wrong_state_variant_is_type_mismatch() {
        let mut client = MockResourceClient::new();
        client.expect_create_role_assignment().never();
        let getter = Arc::new(FixedGetter(ResourceState::VirtualMachine(vm(
            "vm1",
            Some(Identity::system_assigned("p1")),
        ))));
        let service = RoleAssignmentService::with_getter(Arc::new(client), getter, "sub1", "rg1");

        let spec = RoleAssignmentSpec::new(ResourceKind::VirtualMachineScaleSet, "vm1", "ra");
        let mut phase = SpecPhase::Pending;
        let err = service
            .bind(&CallContext::background(), ResourceKind::VirtualMachineScaleSet, &spec, &mut phase)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            CloudError::TypeMismatch {
                expected: ResourceKind::VirtualMachineScaleSet,
                found: ResourceKind::VirtualMachine
            }
        ));
    }

    #[tokio::test]
    async fn test_delete_never_calls_remote() {
        let mut client = MockResourceClient::new();
        client.expect_get_vm().never();
        client.expect_get_scale_set().never();
        client.expect_create_role_assignment().never();
        client.expect_operation_status().never();

        service(client).delete(&CallContext::background()).await.unwrap();
    }
}
