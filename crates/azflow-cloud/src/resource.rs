//! Declared specs and observed resource state

use crate::error::CloudError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Azure built-in Contributor role
///
/// <https://learn.microsoft.com/azure/role-based-access-control/built-in-roles>
pub const BUILT_IN_CONTRIBUTOR_ID: &str = "b24988ac-6180-42a0-ab88-20f7382dd24c";

/// Compute resource kinds the engine knows how to reconcile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    VirtualMachine,
    VirtualMachineScaleSet,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 2] = [
        ResourceKind::VirtualMachine,
        ResourceKind::VirtualMachineScaleSet,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::VirtualMachine => "VirtualMachine",
            ResourceKind::VirtualMachineScaleSet => "VirtualMachineScaleSet",
        }
    }

    /// Every valid kind name, in declaration order
    pub fn names() -> Vec<&'static str> {
        Self::ALL.iter().map(ResourceKind::as_str).collect()
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = CloudError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| CloudError::UnknownResourceKind {
                found: s.to_string(),
                expected: Self::names(),
            })
    }
}

/// A declared role assignment for a compute resource's managed identity
///
/// `resource_type` stays a plain string so that a declaration naming an
/// unsupported kind can still be read and reported by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleAssignmentSpec {
    /// Kind of the resource owning the identity
    pub resource_type: String,

    /// Name of the VM or scale set
    pub machine_name: String,

    /// Role assignment name; also the idempotence key
    pub name: String,

    /// Resource group override; the configured default applies when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_group: Option<String>,
}

impl RoleAssignmentSpec {
    pub fn new(
        kind: ResourceKind,
        machine_name: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            resource_type: kind.to_string(),
            machine_name: machine_name.into(),
            name: name.into(),
            resource_group: None,
        }
    }

    pub fn with_resource_group(mut self, resource_group: impl Into<String>) -> Self {
        self.resource_group = Some(resource_group.into());
        self
    }

    pub fn kind(&self) -> Result<ResourceKind, CloudError> {
        self.resource_type.parse()
    }
}

/// Address of a concrete cloud resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub resource_group: String,
    pub name: String,
}

impl ResourceRef {
    pub fn new(kind: ResourceKind, resource_group: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            resource_group: resource_group.into(),
            name: name.into(),
        }
    }

    /// Stable key (kind:group:name) used for operation records
    pub fn key(&self) -> String {
        format!("{}:{}:{}", self.kind, self.resource_group, self.name)
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.resource_group, self.name)
    }
}

/// Managed identity attached to a compute resource
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    #[serde(rename = "type", default)]
    pub identity_type: String,

    #[serde(default)]
    pub principal_id: Option<String>,

    #[serde(default)]
    pub tenant_id: Option<String>,
}

impl Identity {
    pub fn system_assigned(principal_id: impl Into<String>) -> Self {
        Self {
            identity_type: "SystemAssigned".to_string(),
            principal_id: Some(principal_id.into()),
            tenant_id: None,
        }
    }

    /// Principal id, if one has been issued and is non-empty
    pub fn principal(&self) -> Option<&str> {
        self.principal_id.as_deref().filter(|p| !p.is_empty())
    }
}

/// Provisioning lifecycle as reported by the management API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ProvisioningState {
    Creating,
    Updating,
    Succeeded,
    Failed,
    Deleting,
    Other(String),
}

impl From<String> for ProvisioningState {
    fn from(s: String) -> Self {
        match s.as_str() {
            "Creating" => ProvisioningState::Creating,
            "Updating" => ProvisioningState::Updating,
            "Succeeded" => ProvisioningState::Succeeded,
            "Failed" => ProvisioningState::Failed,
            "Deleting" => ProvisioningState::Deleting,
            _ => ProvisioningState::Other(s),
        }
    }
}

impl From<ProvisioningState> for String {
    fn from(p: ProvisioningState) -> Self {
        p.to_string()
    }
}

impl fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProvisioningState::Creating => write!(f, "Creating"),
            ProvisioningState::Updating => write!(f, "Updating"),
            ProvisioningState::Succeeded => write!(f, "Succeeded"),
            ProvisioningState::Failed => write!(f, "Failed"),
            ProvisioningState::Deleting => write!(f, "Deleting"),
            ProvisioningState::Other(s) => write!(f, "{}", s),
        }
    }
}

/// Observed state of a virtual machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmState {
    pub id: String,
    pub name: String,
    pub location: String,
    pub provisioning_state: Option<ProvisioningState>,
    pub identity: Option<Identity>,
}

/// Observed state of a virtual machine scale set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleSetState {
    pub id: String,
    pub name: String,
    pub location: String,
    pub provisioning_state: Option<ProvisioningState>,
    pub identity: Option<Identity>,
    pub capacity: Option<u64>,
}

/// Observed state, one variant per resource kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "state")]
pub enum ResourceState {
    VirtualMachine(VmState),
    VirtualMachineScaleSet(ScaleSetState),
}

impl ResourceState {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceState::VirtualMachine(_) => ResourceKind::VirtualMachine,
            ResourceState::VirtualMachineScaleSet(_) => ResourceKind::VirtualMachineScaleSet,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            ResourceState::VirtualMachine(vm) => &vm.id,
            ResourceState::VirtualMachineScaleSet(vmss) => &vmss.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ResourceState::VirtualMachine(vm) => &vm.name,
            ResourceState::VirtualMachineScaleSet(vmss) => &vmss.name,
        }
    }

    pub fn identity(&self) -> Option<&Identity> {
        match self {
            ResourceState::VirtualMachine(vm) => vm.identity.as_ref(),
            ResourceState::VirtualMachineScaleSet(vmss) => vmss.identity.as_ref(),
        }
    }

    pub fn provisioning_state(&self) -> Option<&ProvisioningState> {
        match self {
            ResourceState::VirtualMachine(vm) => vm.provisioning_state.as_ref(),
            ResourceState::VirtualMachineScaleSet(vmss) => vmss.provisioning_state.as_ref(),
        }
    }
}

/// Parameters sent when creating a role assignment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleAssignmentParameters {
    pub role_definition_id: String,
    pub principal_id: String,
}

/// A role assignment as returned by the management API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleAssignment {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub scope: String,
    pub role_definition_id: String,
    pub principal_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trip_names() {
        for kind in ResourceKind::ALL {
            assert_eq!(kind.as_str().parse::<ResourceKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_unknown_kind_error_lists_all_names() {
        let err = "Disk".parse::<ResourceKind>().unwrap_err();
        let msg = err.to_string();
        for name in ResourceKind::names() {
            assert!(msg.contains(name), "{} missing from {}", name, msg);
        }
    }

    #[test]
    fn test_spec_deserialize_camel_case() {
        let spec: RoleAssignmentSpec = serde_json::from_value(serde_json::json!({
            "resourceType": "VirtualMachine",
            "machineName": "vm1",
            "name": "ra-1",
            "resourceGroup": "rg1"
        }))
        .unwrap();

        assert_eq!(spec.kind().unwrap(), ResourceKind::VirtualMachine);
        assert_eq!(spec.resource_group.as_deref(), Some("rg1"));
    }

    #[test]
    fn test_empty_principal_is_absent() {
        let identity = Identity {
            identity_type: "SystemAssigned".to_string(),
            principal_id: Some(String::new()),
            tenant_id: None,
        };
        assert_eq!(identity.principal(), None);
        assert_eq!(Identity::system_assigned("p1").principal(), Some("p1"));
    }

    #[test]
    fn test_resource_ref_key() {
        let target = ResourceRef::new(ResourceKind::VirtualMachineScaleSet, "rg1", "pool0");
        assert_eq!(target.key(), "VirtualMachineScaleSet:rg1:pool0");
    }
}
