//! Wiring of settings into the reconcile service

use azflow_cloud::{FileOperationStore, RoleAssignmentService, TracedClient};
use azflow_cloud_azure::{AzureClient, AzureConfig};
use azflow_config::Settings;
use std::sync::Arc;

pub type Service = RoleAssignmentService<TracedClient<AzureClient>>;

/// Build the service; fails when required settings are missing
pub fn build(settings: &Settings) -> anyhow::Result<Service> {
    settings.validate()?;

    let access_token = settings.access_token.clone().unwrap_or_default();
    let mut config = AzureConfig::new(&settings.subscription_id, access_token)
        .with_endpoint(&settings.management_endpoint);
    if let Some(timeout) = settings.request_timeout() {
        config = config.with_timeout(timeout);
    }

    let client = Arc::new(TracedClient::new(AzureClient::new(config)?));
    let store = Arc::new(FileOperationStore::new(&settings.state_dir));

    Ok(RoleAssignmentService::new(
        client,
        store,
        &settings.subscription_id,
        &settings.resource_group,
    )
    .with_role_definition(&settings.role_definition_id))
}
