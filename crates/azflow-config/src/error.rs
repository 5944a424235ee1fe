use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(
        "config file not found. Looked in:\n\
        - current directory: azflow.local.yaml, .azflow.local.yaml, azflow.yaml, .azflow.yaml\n\
        - ./.azflow/ directory\n\
        - ~/.config/azflow/azflow.yaml\n\
        or point AZFLOW_CONFIG_PATH at a file"
    )]
    ConfigFileNotFound,

    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("missing required settings: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
