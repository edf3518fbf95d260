//! Engine Custom Resource Definition
//!
//! The Engine is the workload-manager operand: the heaviest object the
//! Platform drives. Conductor owns its feature-gate list, node placement and
//! uninstall strategy; everything else on it is left to the engine's own
//! controller.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, NodePlacement, UninstallStrategy};

/// Specification for an Engine
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "conductor.dev",
    version = "v1alpha1",
    kind = "Engine",
    plural = "engines",
    status = "EngineStatus",
    namespaced,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct EngineSpec {
    /// What to do with workloads when the Engine is uninstalled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uninstall_strategy: Option<UninstallStrategy>,

    /// Tunable engine configuration, present only when something is set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<EngineConfiguration>,

    /// Node placement for the engine's infra components
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infra: Option<NodePlacement>,

    /// Node placement for the workloads the engine schedules
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workloads: Option<NodePlacement>,
}

/// Tunable configuration block on the Engine spec
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfiguration {
    /// Enabled feature gates, order-preserving for entries Conductor does
    /// not manage
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub feature_gates: Vec<String>,
}

impl EngineConfiguration {
    /// True when the block carries no configuration at all.
    ///
    /// An empty-but-present block and an absent block mean the same thing;
    /// normalization collapses the former so comparisons don't thrash.
    pub fn is_empty(&self) -> bool {
        self.feature_gates.is_empty()
    }
}

/// Status reported by the engine's own controller
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    /// Conditions the engine reports about itself
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Engine version currently running, compared against the operator
    /// version to decide upgrade completion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_version: Option<String>,
}
