//! Node-placement mirroring and equality
//!
//! The Platform declares placement per role; the Engine mirrors it. The
//! "needs update" decision uses explicit field-scoped comparators so that
//! what counts as managed state stays auditable: selector maps compare
//! order-independently, toleration lists compare as exact sequences
//! (including `tolerationSeconds`), affinity compares structurally.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Affinity, Toleration};

use crate::crd::NodePlacement;

/// Order-independent equality for node-selector maps
pub fn selectors_equal(a: &BTreeMap<String, String>, b: &BTreeMap<String, String>) -> bool {
    a == b
}

/// Exact-sequence equality for toleration lists.
///
/// Position matters, and so does every field, `toleration_seconds` included:
/// a toleration with no deadline and one with a deadline of zero are
/// different scheduling instructions.
pub fn tolerations_equal(a: &[Toleration], b: &[Toleration]) -> bool {
    a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x == y)
}

/// Structural equality for affinity rules
pub fn affinities_equal(a: Option<&Affinity>, b: Option<&Affinity>) -> bool {
    a == b
}

/// Full placement equality across selector, affinity and tolerations
pub fn placement_equal(a: Option<&NodePlacement>, b: Option<&NodePlacement>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => {
            selectors_equal(&a.node_selector, &b.node_selector)
                && affinities_equal(a.affinity.as_ref(), b.affinity.as_ref())
                && tolerations_equal(&a.tolerations, &b.tolerations)
        }
        _ => false,
    }
}

/// The placement an operand must carry for a role: exactly what the Platform
/// declares, or nothing at all
pub fn mirrored_placement(declared: Option<&NodePlacement>) -> Option<NodePlacement> {
    declared.cloned()
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Placement fixtures shared across operand tests

    use super::*;
    use k8s_openapi::api::core::v1::{
        NodeAffinity, NodeSelector, NodeSelectorRequirement, NodeSelectorTerm,
    };

    /// A fully populated placement: selector, affinity, two tolerations
    pub fn sample_placement() -> NodePlacement {
        NodePlacement {
            node_selector: BTreeMap::from([
                ("key1".to_string(), "value1".to_string()),
                ("key2".to_string(), "value2".to_string()),
            ]),
            affinity: Some(Affinity {
                node_affinity: Some(NodeAffinity {
                    required_during_scheduling_ignored_during_execution: Some(NodeSelector {
                        node_selector_terms: vec![NodeSelectorTerm {
                            match_expressions: Some(vec![NodeSelectorRequirement {
                                key: "key1".to_string(),
                                operator: "In".to_string(),
                                values: Some(vec!["value11".to_string(), "value12".to_string()]),
                            }]),
                            ..Default::default()
                        }],
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            tolerations: vec![
                Toleration {
                    key: Some("key1".to_string()),
                    operator: Some("Equal".to_string()),
                    value: Some("value1".to_string()),
                    effect: Some("NoSchedule".to_string()),
                    toleration_seconds: Some(1),
                },
                Toleration {
                    key: Some("key2".to_string()),
                    operator: Some("Equal".to_string()),
                    value: Some("value2".to_string()),
                    effect: Some("NoExecute".to_string()),
                    toleration_seconds: Some(2),
                },
            ],
        }
    }

    /// A placement that differs from [`sample_placement`] in every part
    pub fn other_placement() -> NodePlacement {
        NodePlacement {
            node_selector: BTreeMap::from([("key3".to_string(), "value3".to_string())]),
            affinity: None,
            tolerations: vec![Toleration {
                key: Some("key3".to_string()),
                operator: Some("Exists".to_string()),
                value: None,
                effect: Some("NoSchedule".to_string()),
                toleration_seconds: None,
            }],
        }
    }
}
