//! Azure Resource Manager REST client
//!
//! Direct ARM implementation of [`ResourceClient`] using bearer token
//! authentication.

use crate::error::{AzureError, Result};
use async_trait::async_trait;
use azflow_cloud::{
    Fetch, Identity, OperationStatus, OperationToken, ProvisioningState, ResourceClient,
    RoleAssignment, RoleAssignmentParameters, ScaleSetState, VmState,
};
use reqwest::header::HeaderMap;
use reqwest::{Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const ARM_ENDPOINT: &str = "https://management.azure.com";
pub const COMPUTE_API_VERSION: &str = "2021-04-01";
pub const AUTHORIZATION_API_VERSION: &str = "2015-07-01";

const ASYNC_OPERATION_HEADER: &str = "azure-asyncoperation";
const LOCATION_HEADER: &str = "location";

/// Configuration for the ARM client
#[derive(Debug, Clone)]
pub struct AzureConfig {
    pub endpoint: String,
    pub access_token: String,
    pub subscription_id: String,
    pub compute_api_version: String,
    pub authorization_api_version: String,
    pub request_timeout: Option<Duration>,
}

impl AzureConfig {
    pub fn new(subscription_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            endpoint: ARM_ENDPOINT.to_string(),
            access_token: access_token.into(),
            subscription_id: subscription_id.into(),
            compute_api_version: COMPUTE_API_VERSION.to_string(),
            authorization_api_version: AUTHORIZATION_API_VERSION.to_string(),
            request_timeout: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }
}

/// ARM client
pub struct AzureClient {
    http: reqwest::Client,
    endpoint: Url,
    config: AzureConfig,
}

impl AzureClient {
    pub fn new(config: AzureConfig) -> Result<Self> {
        if config.subscription_id.is_empty() {
            return Err(AzureError::InvalidConfig("subscription id is empty".to_string()));
        }
        if config.access_token.is_empty() {
            return Err(AzureError::InvalidConfig("access token is empty".to_string()));
        }

        let endpoint = Url::parse(&config.endpoint).map_err(|e| {
            AzureError::InvalidConfig(format!("invalid endpoint {:?}: {}", config.endpoint, e))
        })?;
        if endpoint.cannot_be_a_base() {
            return Err(AzureError::InvalidConfig(format!(
                "endpoint {:?} cannot carry a path",
                config.endpoint
            )));
        }

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            http: builder.build()?,
            endpoint,
            config,
        })
    }

    /// Endpoint URL with each segment appended percent-encoded
    fn arm_url<'a>(&self, segments: impl IntoIterator<Item = &'a str>, api_version: &str) -> Url {
        let mut url = self.endpoint.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url.query_pairs_mut().append_pair("api-version", api_version);
        url
    }

    fn compute_url(&self, collection: &str, resource_group: &str, name: &str) -> Url {
        self.arm_url(
            [
                "subscriptions",
                self.config.subscription_id.as_str(),
                "resourceGroups",
                resource_group,
                "providers",
                "Microsoft.Compute",
                collection,
                name,
            ],
            &self.config.compute_api_version,
        )
    }

    /// `scope` is itself a path (`/subscriptions/{id}/...`); `name` is one segment
    fn role_assignment_url(&self, scope: &str, name: &str) -> Url {
        let segments = scope
            .split('/')
            .filter(|s| !s.is_empty())
            .chain(["providers", "Microsoft.Authorization", "roleAssignments", name]);
        self.arm_url(segments, &self.config.authorization_api_version)
    }

    /// Operation URL from `token`, refused unless it points at the endpoint's origin
    fn operation_url(&self, token: &OperationToken) -> Result<Url> {
        let url = Url::parse(token.as_str())
            .map_err(|e| AzureError::InvalidOperationUrl(format!("{}: {}", token, e)))?;
        if url.origin() != self.endpoint.origin() {
            return Err(AzureError::InvalidOperationUrl(format!(
                "{} is not on {}",
                token,
                self.endpoint.origin().ascii_serialization()
            )));
        }
        Ok(url)
    }

    /// GET a compute resource, modelling 202 as a pending read
    async fn get_compute<T: DeserializeOwned>(&self, url: Url) -> Result<Fetch<T>> {
        tracing::debug!(url = %url, "GET");
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.config.access_token)
            .send()
            .await?;

        if response.status() == StatusCode::ACCEPTED {
            return Ok(Fetch::Pending(operation_token(response.headers())?));
        }
        Ok(Fetch::Ready(decode(response).await?))
    }
}

/// Token for an accepted request: Azure-AsyncOperation, then Location
fn operation_token(headers: &HeaderMap) -> Result<OperationToken> {
    [ASYNC_OPERATION_HEADER, LOCATION_HEADER]
        .iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|value| value.to_str().ok())
        .find(|value| !value.is_empty())
        .map(OperationToken::new)
        .ok_or(AzureError::MissingOperationHeader)
}

/// Decode a success body or turn an error response into [`AzureError::Api`]
async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(api_error(status, &body));
    }
    Ok(serde_json::from_str(&body)?)
}

fn api_error(status: StatusCode, body: &str) -> AzureError {
    let detail = serde_json::from_str::<ErrorResponse>(body)
        .map(|r| r.error)
        .unwrap_or_else(|_| ErrorDetail {
            code: status.canonical_reason().unwrap_or("Unknown").to_string(),
            message: body.to_string(),
        });
    AzureError::Api {
        status: status.as_u16(),
        code: detail.code,
        message: detail.message,
    }
}

#[async_trait]
impl ResourceClient for AzureClient {
    async fn get_vm(&self, resource_group: &str, name: &str) -> azflow_cloud::Result<Fetch<VmState>> {
        let url = self.compute_url("virtualMachines", resource_group, name);
        let fetched: Fetch<ArmResource> = self.get_compute(url).await?;
        Ok(fetched.map(ArmResource::into_vm))
    }

    async fn get_scale_set(
        &self,
        resource_group: &str,
        name: &str,
    ) -> azflow_cloud::Result<Fetch<ScaleSetState>> {
        let url = self.compute_url("virtualMachineScaleSets", resource_group, name);
        let fetched: Fetch<ArmResource> = self.get_compute(url).await?;
        Ok(fetched.map(ArmResource::into_scale_set))
    }

    async fn create_role_assignment(
        &self,
        scope: &str,
        name: &str,
        params: &RoleAssignmentParameters,
    ) -> azflow_cloud::Result<RoleAssignment> {
        let url = self.role_assignment_url(scope, name);
        let request_body = CreateRoleAssignmentRequest {
            properties: RoleAssignmentProperties {
                role_definition_id: params.role_definition_id.clone(),
                principal_id: params.principal_id.clone(),
                scope: None,
            },
        };

        tracing::debug!(url = %url, principal_id = %params.principal_id, "PUT role assignment");
        let response = self
            .http
            .put(url)
            .bearer_auth(&self.config.access_token)
            .json(&request_body)
            .send()
            .await
            .map_err(AzureError::from)?;

        let created: ArmRoleAssignment = decode(response).await?;
        Ok(RoleAssignment {
            id: created.id,
            name: created.name.unwrap_or_else(|| name.to_string()),
            scope: created.properties.scope.unwrap_or_else(|| scope.to_string()),
            role_definition_id: created.properties.role_definition_id,
            principal_id: created.properties.principal_id,
        })
    }

    async fn operation_status(&self, token: &OperationToken) -> azflow_cloud::Result<OperationStatus> {
        let url = self.operation_url(token)?;
        tracing::debug!(token = %token, "GET operation status");
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.config.access_token)
            .send()
            .await
            .map_err(AzureError::from)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(azflow_cloud::CloudError::OperationNotFound(token.to_string()));
        }
        // Location-style polling answers 202 until the resource is ready
        if status == StatusCode::ACCEPTED {
            return Ok(OperationStatus::InProgress);
        }

        let body: serde_json::Value = decode(response).await?;
        let Some(state) = body.get("status").and_then(|s| s.as_str()) else {
            return Ok(OperationStatus::Succeeded(Some(body)));
        };

        Ok(match state {
            "Succeeded" => OperationStatus::Succeeded(body.get("properties").cloned()),
            "Failed" => {
                let message = serde_json::from_value::<ErrorDetail>(
                    body.get("error").cloned().unwrap_or_default(),
                )
                .map(|e| format!("{}: {}", e.code, e.message))
                .unwrap_or_else(|_| "operation failed".to_string());
                OperationStatus::Failed(message)
            }
            "Canceled" => OperationStatus::Failed("operation was canceled".to_string()),
            _ => OperationStatus::InProgress,
        })
    }
}

// Wire types

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArmIdentity {
    #[serde(rename = "type", default)]
    identity_type: String,
    principal_id: Option<String>,
    tenant_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArmProperties {
    provisioning_state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ArmSku {
    capacity: Option<u64>,
}

/// Shared shape of VM and scale set responses
#[derive(Debug, Deserialize)]
struct ArmResource {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    location: String,
    identity: Option<ArmIdentity>,
    #[serde(default)]
    properties: ArmProperties,
    sku: Option<ArmSku>,
}

impl ArmResource {
    fn identity(&mut self) -> Option<Identity> {
        self.identity.take().map(|i| Identity {
            identity_type: i.identity_type,
            principal_id: i.principal_id,
            tenant_id: i.tenant_id,
        })
    }

    fn provisioning_state(&mut self) -> Option<ProvisioningState> {
        self.properties.provisioning_state.take().map(ProvisioningState::from)
    }

    fn into_vm(mut self) -> VmState {
        let identity = self.identity();
        let provisioning_state = self.provisioning_state();
        VmState {
            id: self.id,
            name: self.name,
            location: self.location,
            provisioning_state,
            identity,
        }
    }

    fn into_scale_set(mut self) -> ScaleSetState {
        let identity = self.identity();
        let provisioning_state = self.provisioning_state();
        ScaleSetState {
            capacity: self.sku.and_then(|s| s.capacity),
            id: self.id,
            name: self.name,
            location: self.location,
            provisioning_state,
            identity,
        }
    }
}

#[derive(Debug, Serialize)]
struct CreateRoleAssignmentRequest {
    properties: RoleAssignmentProperties,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoleAssignmentProperties {
    role_definition_id: String,
    principal_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ArmRoleAssignment {
    id: Option<String>,
    name: Option<String>,
    properties: RoleAssignmentProperties,
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn client() -> AzureClient {
        AzureClient::new(AzureConfig::new("sub1", "token")).unwrap()
    }

    #[test]
    fn test_compute_url() {
        assert_eq!(
            client().compute_url("virtualMachines", "rg1", "vm1").as_str(),
            "https://management.azure.com/subscriptions/sub1/resourceGroups/rg1/providers/Microsoft.Compute/virtualMachines/vm1?api-version=2021-04-01"
        );
    }

    #[test]
    fn test_role_assignment_url_joins_scope() {
        assert_eq!(
            client().role_assignment_url("/subscriptions/sub1/", "ra1").as_str(),
            "https://management.azure.com/subscriptions/sub1/providers/Microsoft.Authorization/roleAssignments/ra1?api-version=2015-07-01"
        );
    }

    #[test]
    fn test_names_are_encoded_as_single_segments() {
        let client = client();

        let url = client.compute_url("virtualMachines", "rg/other", "vm1?api-version=x");
        assert!(url.path().ends_with("/resourceGroups/rg%2Fother/providers/Microsoft.Compute/virtualMachines/vm1%3Fapi-version=x"), "{}", url);
        assert_eq!(url.query(), Some("api-version=2021-04-01"));

        let url = client.role_assignment_url("/subscriptions/sub1/", "ra/../x");
        assert!(url.path().ends_with("/roleAssignments/ra%2F..%2Fx"), "{}", url);
    }

    #[test]
    fn test_operation_url_must_share_endpoint_origin() {
        let client = client();

        let own = OperationToken::new("https://management.azure.com/subscriptions/sub1/operations/op-1");
        assert!(client.operation_url(&own).is_ok());

        for foreign in [
            "https://attacker.example/operations/op-1",
            "http://management.azure.com/operations/op-1",
            "https://management.azure.com:8443/operations/op-1",
            "not a url",
        ] {
            assert!(
                matches!(
                    client.operation_url(&OperationToken::new(foreign)),
                    Err(AzureError::InvalidOperationUrl(_))
                ),
                "{}",
                foreign
            );
        }
    }

    #[test]
    fn test_invalid_endpoint_rejected() {
        assert!(matches!(
            AzureClient::new(AzureConfig::new("sub1", "token").with_endpoint("not a url")),
            Err(AzureError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_operation_token_prefers_async_operation_header() {
        let mut headers = HeaderMap::new();
        headers.insert("location", HeaderValue::from_static("https://arm/location"));
        assert_eq!(operation_token(&headers).unwrap().as_str(), "https://arm/location");

        headers.insert("azure-asyncoperation", HeaderValue::from_static("https://arm/async"));
        assert_eq!(operation_token(&headers).unwrap().as_str(), "https://arm/async");

        assert!(matches!(
            operation_token(&HeaderMap::new()),
            Err(AzureError::MissingOperationHeader)
        ));
    }

    #[test]
    fn test_empty_credentials_rejected() {
        assert!(matches!(
            AzureClient::new(AzureConfig::new("sub1", "")),
            Err(AzureError::InvalidConfig(_))
        ));
    }
}
