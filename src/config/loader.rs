// src/config/loader.rs

use std::fs;
use std::path::Path;

use crate::config::model::RawWorkflowConfig;
use crate::config::workflow::WorkflowConfig;
use crate::errors::Result;

/// Load a workflow config file and return the raw, unvalidated model.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawWorkflowConfig> {
    let contents = fs::read_to_string(path.as_ref())?;
    let config: RawWorkflowConfig = toml::from_str(&contents)?;
    Ok(config)
}

/// Load a workflow config file and validate it.
///
/// - Reads TOML.
/// - Applies defaults.
/// - Checks trigger references, namespace inheritance, queue membership,
///   platforms, and same-point graph cycles.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<WorkflowConfig> {
    let raw = load_from_path(&path)?;
    WorkflowConfig::try_from(raw)
}
