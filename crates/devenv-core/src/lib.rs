//! # devenv-core
//!
//! Core library for the devenv backup/restore orchestrator providing:
//! - Configuration loading (devenv.yaml, environment, flags)
//! - The error taxonomy shared by every crate
//! - Retry execution engine with policy-based configuration
//! - Machine/backup name validation and root-relative path safety
//! - Step tracking so a global timeout can report what was in flight

pub mod config;
pub mod error;
pub mod naming;
pub mod paths;
pub mod retry;
pub mod step;
pub mod types;
pub mod utils;

pub use config::{ConfigFile, ConfigLoader, ConfigOverrides, DevenvConfig};
pub use error::{Error, PartialRestoreError, RestoreFailure, RestoreStage, Result};
pub use naming::{
    default_machine_name, sanitize_machine_name, validate_machine_name, validate_safe_name,
};
pub use step::{Progress, StepTracker};
pub use utils::{default_backup_name, default_workers, get_home_dir};
