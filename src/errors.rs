// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Unknown queue '{queue}' for task '{task}'")]
    UnknownQueue { task: String, queue: String },

    #[error("Platform lookup failed: {0}")]
    PlatformLookup(String),

    #[error("Remote management error: {0}")]
    RemoteMgmt(String),

    #[error("Cycle detected in task graph: {0}")]
    GraphCycle(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Workflow stalled: {0}")]
    Stalled(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, SchedulerError>;
