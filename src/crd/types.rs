//! Supporting types shared by the Platform and Engine CRDs

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Affinity, Toleration};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Node placement constraints for one scheduling role.
///
/// The Platform declares at most one of these per role (infra, workloads);
/// the Engine mirrors them verbatim. A role with no declared placement must
/// end up with no placement on the operand either.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodePlacement {
    /// Plain label selector; map equality is order-independent
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,

    /// Full affinity rules, mirrored structurally
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<Affinity>,

    /// Tolerations; sequence order and every field (including
    /// `tolerationSeconds`) are significant for equality
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,
}

impl NodePlacement {
    /// True when no constraint of any kind is declared
    pub fn is_empty(&self) -> bool {
        self.node_selector.is_empty() && self.affinity.is_none() && self.tolerations.is_empty()
    }
}

/// What the Engine does with running workloads when it is uninstalled
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[non_exhaustive]
pub enum UninstallStrategy {
    /// Refuse to uninstall while workloads still exist (default)
    #[default]
    BlockUninstallIfWorkloadsExist,
    /// Tear workloads down as part of the uninstall
    RemoveWorkloads,
}

impl std::fmt::Display for UninstallStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BlockUninstallIfWorkloadsExist => write!(f, "BlockUninstallIfWorkloadsExist"),
            Self::RemoveWorkloads => write!(f, "RemoveWorkloads"),
        }
    }
}

/// Condition status following Kubernetes conventions
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Kubernetes-style condition for status reporting
///
/// Used both for the conditions an operand reports about itself and for the
/// aggregated conditions on the Platform status.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Condition {
    /// Type of condition (e.g. Available, Progressing)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// Last time the condition transitioned
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }
}
