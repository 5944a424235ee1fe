//! azflow configuration
//!
//! Locates `azflow.yaml`, reads [`Settings`] from it and layers environment
//! overrides on top.

pub mod error;

pub use error::*;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_MANAGEMENT_ENDPOINT: &str = "https://management.azure.com";
pub const DEFAULT_STATE_DIR: &str = ".azflow";
pub const CONTRIBUTOR_ROLE_ID: &str = "b24988ac-6180-42a0-ab88-20f7382dd24c";

const CANDIDATES: [&str; 4] = [
    "azflow.local.yaml",
    ".azflow.local.yaml",
    "azflow.yaml",
    ".azflow.yaml",
];

/// Find the project's azflow.yaml
///
/// Search order:
/// 1. `AZFLOW_CONFIG_PATH` (direct path)
/// 2. current directory: azflow.local.yaml, .azflow.local.yaml, azflow.yaml, .azflow.yaml
/// 3. `./.azflow/` with the same order
/// 4. `~/.config/azflow/azflow.yaml`
pub fn find_config_file() -> Result<PathBuf> {
    if let Ok(config_path) = std::env::var("AZFLOW_CONFIG_PATH") {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(path);
        }
    }

    let current_dir = std::env::current_dir()?;

    for filename in &CANDIDATES {
        let path = current_dir.join(filename);
        if path.exists() {
            return Ok(path);
        }
    }

    let project_dir = current_dir.join(".azflow");
    if project_dir.is_dir() {
        for filename in &CANDIDATES {
            let path = project_dir.join(filename);
            if path.exists() {
                return Ok(path);
            }
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global_config = config_dir.join("azflow").join("azflow.yaml");
        if global_config.exists() {
            return Ok(global_config);
        }
    }

    Err(ConfigError::ConfigFileNotFound)
}

/// Runtime settings for a reconcile run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub subscription_id: String,

    /// Resource group used when a spec does not name one
    #[serde(default)]
    pub resource_group: String,

    #[serde(default = "default_endpoint")]
    pub management_endpoint: String,

    /// Bearer token for the management API; `AZURE_ACCESS_TOKEN` when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,

    /// Where in-flight operations are persisted
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    #[serde(default = "default_role_definition")]
    pub role_definition_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
}

fn default_endpoint() -> String {
    DEFAULT_MANAGEMENT_ENDPOINT.to_string()
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(DEFAULT_STATE_DIR)
}

fn default_role_definition() -> String {
    CONTRIBUTOR_ROLE_ID.to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            subscription_id: String::new(),
            resource_group: String::new(),
            management_endpoint: default_endpoint(),
            access_token: None,
            state_dir: default_state_dir(),
            role_definition_id: default_role_definition(),
            request_timeout_secs: None,
        }
    }
}

impl Settings {
    pub fn from_yaml(content: &str, path: &Path) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content, path)
    }

    /// Load settings from `path`, or from the discovered config file
    ///
    /// A missing config file is not an error when no path was given; the
    /// environment may carry everything. Environment overrides apply last.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None => match find_config_file() {
                Ok(found) => Self::from_file(&found)?,
                Err(ConfigError::ConfigFileNotFound) => Self::default(),
                Err(e) => return Err(e),
            },
        };
        settings.apply_env();
        Ok(settings)
    }

    /// Apply `AZURE_*` environment overrides
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(subscription_id) = lookup("AZURE_SUBSCRIPTION_ID") {
            self.subscription_id = subscription_id;
        }
        if let Some(resource_group) = lookup("AZURE_RESOURCE_GROUP") {
            self.resource_group = resource_group;
        }
        if self.access_token.as_deref().is_none_or(str::is_empty) {
            self.access_token = lookup("AZURE_ACCESS_TOKEN");
        }
    }

    /// Report every required setting that is missing
    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.subscription_id.is_empty() {
            missing.push("subscription_id");
        }
        if self.resource_group.is_empty() {
            missing.push("resource_group");
        }
        if self.access_token.as_deref().is_none_or(str::is_empty) {
            missing.push("access_token");
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::MissingFields(missing))
        }
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;
    use std::fs;

    #[test]
    #[serial]
    fn test_find_config_file_in_current_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();

        fs::write(temp_dir.path().join("azflow.yaml"), "subscription_id: sub1").unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();

        let result = find_config_file();

        std::env::set_current_dir(original_dir).unwrap();
        assert!(result.unwrap().ends_with("azflow.yaml"));
    }

    #[test]
    #[serial]
    fn test_find_config_file_local_priority() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();

        fs::write(temp_dir.path().join("azflow.yaml"), "# shared").unwrap();
        fs::write(temp_dir.path().join(".azflow.local.yaml"), "# local").unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();

        let result = find_config_file();

        std::env::set_current_dir(original_dir).unwrap();
        assert!(result.unwrap().ends_with(".azflow.local.yaml"));
    }

    #[test]
    #[serial]
    fn test_find_config_file_in_project_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();

        let project_dir = temp_dir.path().join(".azflow");
        fs::create_dir(&project_dir).unwrap();
        fs::write(project_dir.join("azflow.yaml"), "# in project dir").unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();

        let result = find_config_file();

        std::env::set_current_dir(original_dir).unwrap();
        assert!(result.unwrap().ends_with(".azflow/azflow.yaml"));
    }

    #[test]
    #[serial]
    fn test_find_config_file_env_var() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("custom.yaml");
        fs::write(&config_path, "# custom").unwrap();

        unsafe {
            std::env::set_var("AZFLOW_CONFIG_PATH", config_path.to_str().unwrap());
        }

        let result = find_config_file();

        unsafe {
            std::env::remove_var("AZFLOW_CONFIG_PATH");
        }
        assert_eq!(result.unwrap(), config_path);
    }

    #[test]
    fn test_defaults_fill_missing_fields() {
        let settings =
            Settings::from_yaml("subscription_id: sub1\nresource_group: rg1\n", Path::new("azflow.yaml"))
                .unwrap();

        assert_eq!(settings.management_endpoint, DEFAULT_MANAGEMENT_ENDPOINT);
        assert_eq!(settings.state_dir, PathBuf::from(".azflow"));
        assert_eq!(settings.role_definition_id, CONTRIBUTOR_ROLE_ID);
        assert_eq!(settings.request_timeout(), None);
    }

    #[test]
    fn test_parse_error_names_file() {
        let err = Settings::from_yaml("subscription_id: [", Path::new("broken.yaml")).unwrap_err();
        assert!(err.to_string().contains("broken.yaml"));
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("AZURE_SUBSCRIPTION_ID", "sub-env"),
            ("AZURE_RESOURCE_GROUP", ""),
            ("AZURE_ACCESS_TOKEN", "token-env"),
        ]
        .into_iter()
        .collect();

        let mut settings = Settings {
            subscription_id: "sub-file".to_string(),
            resource_group: "rg-file".to_string(),
            ..Default::default()
        };
        settings.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(settings.subscription_id, "sub-env");
        assert_eq!(settings.resource_group, "rg-file");
        assert_eq!(settings.access_token.as_deref(), Some("token-env"));
    }

    #[test]
    fn test_file_token_wins_over_environment() {
        let mut settings = Settings {
            access_token: Some("from-file".to_string()),
            ..Default::default()
        };
        settings.apply_overrides(|_| Some("from-env".to_string()));
        assert_eq!(settings.access_token.as_deref(), Some("from-file"));
    }

    #[test]
    fn test_validate_lists_every_missing_field() {
        let err = Settings::default().validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "missing required settings: subscription_id, resource_group, access_token"
        );

        let settings = Settings {
            subscription_id: "sub1".to_string(),
            resource_group: "rg1".to_string(),
            access_token: Some("t".to_string()),
            ..Default::default()
        };
        assert!(settings.validate().is_ok());
    }
}
