//! Custom Resource Definitions for Conductor
//!
//! The [`Platform`] is the primary resource users edit; the [`Engine`] is the
//! workload-manager operand Conductor manages on their behalf.

mod engine;
mod platform;
mod types;

pub use engine::{Engine, EngineConfiguration, EngineSpec, EngineStatus};
pub use platform::{Platform, PlatformSpec, PlatformStatus};
pub use types::{Condition, ConditionStatus, NodePlacement, UninstallStrategy};
