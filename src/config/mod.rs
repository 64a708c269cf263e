// src/config/mod.rs

//! Workflow configuration.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate it into a [`WorkflowConfig`] (`validate.rs`), resolving
//!   runtime inheritance (`runtime.rs`), platforms (`platform.rs`) and
//!   duration strings (`duration.rs`).

pub mod duration;
pub mod loader;
pub mod model;
pub mod platform;
pub mod runtime;
pub mod validate;
pub mod workflow;

pub use loader::{load_and_validate, load_from_path};
pub use model::{
    PlatformSection, QueueSection, RawWorkflowConfig, RuntimeSection, SchedulerSection,
    SchedulingSection, SequenceSection, SimulationSection, SkipSection, TaskSection,
};
pub use platform::Platform;
pub use runtime::RuntimeConfig;
pub use workflow::{
    GlobalConfig, PointClock, QueueConfig, RunaheadLimit, WorkflowConfig, DEFAULT_QUEUE,
};
