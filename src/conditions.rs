//! Aggregation of operand conditions onto the Platform
//!
//! Each reconcile starts from an empty condition set and rebuilds it from
//! what the operands report right now; nothing is patched incrementally, so
//! a condition that stops being reported disappears instead of going stale.

use std::collections::BTreeMap;

use crate::crd::{Condition, ConditionStatus};

/// The four standard conditions surfaced on the Platform status
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConditionType {
    /// The component is serving its purpose
    Available,
    /// The component is rolling toward a new state
    Progressing,
    /// The component is failing in a way that needs attention
    Degraded,
    /// An operator upgrade may proceed
    Upgradeable,
}

impl std::fmt::Display for ConditionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Available => write!(f, "Available"),
            Self::Progressing => write!(f, "Progressing"),
            Self::Degraded => write!(f, "Degraded"),
            Self::Upgradeable => write!(f, "Upgradeable"),
        }
    }
}

/// A typed, last-write-wins set of Platform conditions.
///
/// One lives on each [`crate::operand::ReconcileRequest`]; operand handlers
/// write into it and the controller publishes the final contents.
#[derive(Debug, Default)]
pub struct ConditionSet {
    entries: BTreeMap<ConditionType, Condition>,
}

impl ConditionSet {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Set (or overwrite) a condition
    pub fn set(
        &mut self,
        type_: ConditionType,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.entries.insert(
            type_,
            Condition::new(type_.to_string(), status, reason, message),
        );
    }

    /// Look up a condition by type
    pub fn get(&self, type_: ConditionType) -> Option<&Condition> {
        self.entries.get(&type_)
    }

    /// True when nothing has been aggregated this reconcile
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The final condition list, ordered by type
    pub fn to_vec(&self) -> Vec<Condition> {
        self.entries.values().cloned().collect()
    }
}

/// Fold one operand's reported conditions into the Platform's set.
///
/// An operand reporting nothing is treated as "not ready yet": not
/// available, still progressing, not safe to upgrade. Negative signals are
/// mirrored with the operand's message interpolated; healthy signals leave
/// the set alone so another operand's problem is never masked.
pub fn aggregate(kind: &str, reported: &[Condition], set: &mut ConditionSet) {
    if reported.is_empty() {
        let message = format!("{kind} resource has no reported conditions");
        let reason = format!("{kind}Conditions");
        set.set(
            ConditionType::Available,
            ConditionStatus::False,
            reason.clone(),
            message.clone(),
        );
        set.set(
            ConditionType::Progressing,
            ConditionStatus::True,
            reason.clone(),
            message.clone(),
        );
        set.set(
            ConditionType::Upgradeable,
            ConditionStatus::False,
            reason,
            message,
        );
        return;
    }

    for condition in reported {
        match (condition.type_.as_str(), &condition.status) {
            ("Available", ConditionStatus::False) => {
                set.set(
                    ConditionType::Available,
                    ConditionStatus::False,
                    format!("{kind}NotAvailable"),
                    format!("{kind} is not available: {}", condition.message),
                );
            }
            ("Progressing", ConditionStatus::True) => {
                let reason = format!("{kind}Progressing");
                let message = format!("{kind} is progressing: {}", condition.message);
                set.set(
                    ConditionType::Progressing,
                    ConditionStatus::True,
                    reason.clone(),
                    message.clone(),
                );
                set.set(
                    ConditionType::Upgradeable,
                    ConditionStatus::False,
                    reason,
                    message,
                );
            }
            ("Degraded", ConditionStatus::True) => {
                set.set(
                    ConditionType::Degraded,
                    ConditionStatus::True,
                    format!("{kind}Degraded"),
                    format!("{kind} is degraded: {}", condition.message),
                );
            }
            _ => {}
        }
    }
}
