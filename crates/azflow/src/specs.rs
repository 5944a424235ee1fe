//! Declared-spec file loading

use anyhow::Context;
use azflow_cloud::RoleAssignmentSpec;
use serde::Deserialize;
use std::path::Path;

/// Accepted layouts: a bare list, or a document with a `roleAssignments` key
#[derive(Deserialize)]
#[serde(untagged)]
enum SpecFile {
    List(Vec<RoleAssignmentSpec>),
    Document {
        #[serde(rename = "roleAssignments")]
        role_assignments: Vec<RoleAssignmentSpec>,
    },
}

/// Parse declared specs; order is preserved
pub fn parse(content: &str) -> anyhow::Result<Vec<RoleAssignmentSpec>> {
    // YAML is a superset of JSON, so one parser covers both
    let file: SpecFile = serde_yaml::from_str(content)?;
    Ok(match file {
        SpecFile::List(specs) => specs,
        SpecFile::Document { role_assignments } => role_assignments,
    })
}

pub fn load(path: &Path) -> anyhow::Result<Vec<RoleAssignmentSpec>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read spec file {}", path.display()))?;
    parse(&content).with_context(|| format!("cannot parse spec file {}", path.display()))
}
