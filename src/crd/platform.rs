//! Platform Custom Resource Definition
//!
//! The Platform CRD is the single source of declared intent: feature toggles
//! and node placement for every operand Conductor manages. Its status records
//! the objects the operator created on its behalf and the aggregated
//! component conditions.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ObjectReference;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, NodePlacement};

/// Specification for a Platform
///
/// Everything here is declarative; the operand handlers translate it into
/// concrete operand shapes each reconcile.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "conductor.dev",
    version = "v1alpha1",
    kind = "Platform",
    plural = "platforms",
    shortname = "plat",
    status = "PlatformStatus",
    namespaced,
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".status.version"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PlatformSpec {
    /// Feature gates declared by the user.
    ///
    /// Only gates in an operand's managed allow-list are acted on; a gate
    /// mapped to `false` is equivalent to an absent one.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub feature_gates: BTreeMap<String, bool>,

    /// Node placement for infra components
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infra: Option<NodePlacement>,

    /// Node placement for user workloads
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workloads: Option<NodePlacement>,
}

impl PlatformSpec {
    /// True when the named gate is declared and set to `true`
    pub fn gate_enabled(&self, gate: &str) -> bool {
        self.feature_gates.get(gate).copied().unwrap_or(false)
    }
}

/// Status for a Platform
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlatformStatus {
    /// References to every object this Platform manages.
    ///
    /// At most one entry per (kind, namespace, name); an apiVersion change
    /// migrates the existing entry instead of adding a second one.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_objects: Vec<ObjectReference>,

    /// Aggregated component conditions, recomputed fully each reconcile
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Operator version that last reconciled every operand to completion.
    ///
    /// A mismatch with the running operator version puts the next reconcile
    /// into upgrade mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl Platform {
    /// The Platform's declared overlay annotation value, if any
    pub fn overlay_annotation(&self, key: &str) -> Option<&str> {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .map(String::as_str)
    }
}
