//! Azure provider error types

use azflow_cloud::CloudError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AzureError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("ARM returned {status} {code}: {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    #[error("refusing to poll operation URL {0}")]
    InvalidOperationUrl(String),

    #[error("accepted response carries neither Azure-AsyncOperation nor Location")]
    MissingOperationHeader,

    #[error("cannot decode ARM response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl AzureError {
    pub fn is_role_assignment_exists(&self) -> bool {
        matches!(self, AzureError::Api { status: 409, code, .. } if code == "RoleAssignmentExists")
    }
}

impl From<AzureError> for CloudError {
    fn from(err: AzureError) -> Self {
        let message = err.to_string();
        match err {
            AzureError::Transport(_) => CloudError::Transient(message),
            AzureError::Api { status: 404, .. } => CloudError::NotFound(message),
            ref e if e.is_role_assignment_exists() => CloudError::AlreadyExists(message),
            AzureError::Api { status, .. } if status == 408 || status == 429 || status >= 500 => {
                CloudError::Transient(message)
            }
            AzureError::Api { .. }
            | AzureError::MissingOperationHeader
            | AzureError::Decode(_)
            | AzureError::InvalidOperationUrl(_)
            | AzureError::InvalidConfig(_) => CloudError::Permanent(message),
        }
    }
}

pub type Result<T> = std::result::Result<T, AzureError>;
