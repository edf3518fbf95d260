//! Related-object bookkeeping on the Platform status
//!
//! The Platform records a reference to every object it manages. The list is
//! keyed by (kind, namespace, name): re-registering the same object refreshes
//! the entry in place, and an apiVersion change (schema migration) replaces
//! the old reference instead of accumulating a duplicate. The tracker never
//! prunes; removal happens through the deletion state machine.

use k8s_openapi::api::core::v1::ObjectReference;
use kube::api::DynamicObject;

use crate::{Error, Result};

/// Build the status reference for a live operand
pub fn object_reference(obj: &DynamicObject) -> Result<ObjectReference> {
    let types = obj
        .types
        .as_ref()
        .ok_or_else(|| Error::serialization("object has no type information"))?;
    Ok(ObjectReference {
        api_version: Some(types.api_version.clone()),
        kind: Some(types.kind.clone()),
        namespace: obj.metadata.namespace.clone(),
        name: obj.metadata.name.clone(),
        uid: obj.metadata.uid.clone(),
        resource_version: obj.metadata.resource_version.clone(),
        ..Default::default()
    })
}

fn same_identity(a: &ObjectReference, b: &ObjectReference) -> bool {
    a.kind == b.kind && a.namespace == b.namespace && a.name == b.name
}

/// Register `reference` in the related-object list.
///
/// Appends when the identity is new, refreshes in place when it already
/// exists, and drops any stale entry carrying the same identity under a
/// different apiVersion. Returns whether the list changed.
pub fn add_to_related_objects(
    related: &mut Vec<ObjectReference>,
    reference: ObjectReference,
) -> bool {
    match related.iter().position(|r| same_identity(r, &reference)) {
        Some(idx) if related[idx] == reference => false,
        Some(idx) => {
            related[idx] = reference.clone();
            // A migration may have left older entries for the same identity
            // behind; the invariant is one entry per identity.
            let mut seen = false;
            related.retain(|r| {
                if !same_identity(r, &reference) {
                    return true;
                }
                if r.api_version == reference.api_version && !seen {
                    seen = true;
                    return true;
                }
                false
            });
            true
        }
        None => {
            related.push(reference);
            true
        }
    }
}
