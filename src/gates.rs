//! Feature-gate set reconciliation
//!
//! A gate list is semantically a set, but external actors may append their
//! own gates to an operand directly. Reconciliation therefore only ever adds
//! or removes gates from the managed allow-list; everything else keeps its
//! exact place and order.

use std::collections::BTreeMap;

/// Compute the next gate list for an operand.
///
/// `declared` holds the gates the Platform maps to true/false, `managed` is
/// the fixed set of gate names this operand kind allows us to touch, and
/// `current` is the operand's existing gate list, possibly user-extended.
///
/// For each managed gate: declared-true and missing is appended,
/// declared-false (or undeclared) and present is removed. Gates outside
/// `managed` are preserved in their original relative order no matter what
/// the Platform declares. The result never contains a duplicate of a managed
/// gate.
pub fn reconcile_gates(
    declared: &BTreeMap<String, bool>,
    managed: &[&str],
    current: &[String],
) -> Vec<String> {
    let enabled = |gate: &str| {
        managed.contains(&gate) && declared.get(gate).copied().unwrap_or(false)
    };

    // Drop managed gates that are no longer declared; keep everything else
    // (including user-added gates) in place.
    let mut next: Vec<String> = current
        .iter()
        .filter(|gate| !managed.contains(&gate.as_str()) || enabled(gate.as_str()))
        .cloned()
        .collect();

    // Append newly enabled managed gates, in managed-list order.
    for &gate in managed {
        if enabled(gate) && !next.iter().any(|g| g.as_str() == gate) {
            next.push(gate.to_string());
        }
    }

    next
}

/// Parse a comma-joined gate list (the config-map form)
pub fn parse_gate_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|g| !g.is_empty())
        .map(str::to_string)
        .collect()
}

/// Join gates back into the comma-separated config-map form
pub fn join_gate_list(gates: &[String]) -> String {
    gates.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANAGED: &[&str] = &["fgEnabled", "fgMissing", "fgDisabled", "fgNoChange"];

    fn declared(entries: &[(&str, bool)]) -> BTreeMap<String, bool> {
        entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn gates(names: &[&str]) -> Vec<String> {
        names.iter().map(|g| g.to_string()).collect()
    }

    /// Story: a fresh operand picks up exactly the enabled managed gates
    #[test]
    fn story_enabled_gates_are_added() {
        let next = reconcile_gates(
            &declared(&[("fgEnabled", true), ("fgDisabled", false)]),
            MANAGED,
            &[],
        );
        assert_eq!(next, gates(&["fgEnabled"]));
    }

    /// Story: the full update matrix - add enabled, remove undeclared and
    /// disabled, keep already-enabled
    #[test]
    fn story_update_matrix() {
        let current = gates(&["fgMissing", "fgDisabled", "fgNoChange"]);
        let next = reconcile_gates(
            &declared(&[("fgEnabled", true), ("fgDisabled", false), ("fgNoChange", true)]),
            MANAGED,
            &current,
        );
        assert!(next.contains(&"fgEnabled".to_string()));
        assert!(!next.contains(&"fgMissing".to_string()));
        assert!(!next.contains(&"fgDisabled".to_string()));
        assert!(next.contains(&"fgNoChange".to_string()));
    }

    /// Story: user-added gates survive in place and in order
    #[test]
    fn story_user_gates_are_untouched() {
        let current = gates(&["userFg1", "fgMissing", "userFg2", "fgNoChange", "userFg3"]);
        let next = reconcile_gates(
            &declared(&[("fgEnabled", true), ("fgNoChange", true)]),
            MANAGED,
            &current,
        );
        assert_eq!(
            next,
            gates(&["userFg1", "userFg2", "fgNoChange", "userFg3", "fgEnabled"])
        );
    }

    /// Story: nothing declared clears every managed gate, nothing else
    #[test]
    fn story_no_declared_gates_clears_managed_only() {
        let current = gates(&["userFg1", "fgMissing", "fgDisabled", "fgNoChange"]);
        let next = reconcile_gates(&declared(&[]), MANAGED, &current);
        assert_eq!(next, gates(&["userFg1"]));
    }

    /// Story: an empty managed list means we touch nothing at all
    #[test]
    fn story_empty_managed_list_is_a_no_op() {
        let current = gates(&["anything", "goes"]);
        let next = reconcile_gates(&declared(&[("anything", false)]), &[], &current);
        assert_eq!(next, current);
    }

    /// Story: reconciling twice yields the same list (idempotence)
    #[test]
    fn story_idempotent() {
        let d = declared(&[("fgEnabled", true), ("fgNoChange", true)]);
        let current = gates(&["userFg1", "fgNoChange"]);
        let once = reconcile_gates(&d, MANAGED, &current);
        let twice = reconcile_gates(&d, MANAGED, &once);
        assert_eq!(once, twice);
    }

    /// Story: no duplicates are introduced even when a declared gate is
    /// already present
    #[test]
    fn story_no_duplicates() {
        let current = gates(&["fgEnabled"]);
        let next = reconcile_gates(&declared(&[("fgEnabled", true)]), MANAGED, &current);
        assert_eq!(next, gates(&["fgEnabled"]));
    }

    /// Story: a gate declared true but outside the managed list is ignored
    #[test]
    fn story_unmanaged_declared_gate_is_not_added() {
        let next = reconcile_gates(&declared(&[("notOurs", true)]), MANAGED, &[]);
        assert!(next.is_empty());
    }

    mod comma_list {
        use super::*;

        #[test]
        fn test_parse_skips_blanks() {
            assert_eq!(
                parse_gate_list("a, b,,c"),
                vec!["a".to_string(), "b".to_string(), "c".to_string()]
            );
            assert!(parse_gate_list("").is_empty());
        }

        #[test]
        fn test_join_round_trip() {
            let list = vec!["a".to_string(), "b".to_string()];
            assert_eq!(parse_gate_list(&join_gate_list(&list)), list);
        }
    }
}
