//! User-supplied JSON Patch overlay for generated operands
//!
//! A Platform annotation may carry an ordered list of RFC 6902 operations
//! that are applied to the desired object after the builder produces it and
//! before it is compared or written. The overlay runs inside the builder, so
//! create and update paths see the identical patched object. Any failure -
//! unknown verb, bad path, type mismatch - aborts desired-object
//! construction; the live object is never touched because nothing has been
//! written yet.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::crd::Platform;
use crate::{Error, Result};

/// Apply the overlay stored under `annotation` on the Platform to `desired`.
///
/// Returns the (possibly patched) object. A missing or empty annotation is a
/// no-op. The patch is applied to a serialized copy and only decoded back on
/// success, so a failing overlay cannot leave a half-patched object behind.
pub fn apply_overlay<T>(platform: &Platform, annotation: &str, desired: T) -> Result<T>
where
    T: Serialize + DeserializeOwned,
{
    let Some(raw) = platform.overlay_annotation(annotation) else {
        return Ok(desired);
    };

    let patch: json_patch::Patch = serde_json::from_str(raw)
        .map_err(|e| Error::overlay(format!("invalid patch in {annotation}: {e}")))?;

    if patch.0.is_empty() {
        return Ok(desired);
    }

    debug!(annotation, operations = patch.0.len(), "applying overlay");

    let mut value =
        serde_json::to_value(&desired).map_err(|e| Error::serialization(e.to_string()))?;
    json_patch::patch(&mut value, &patch)
        .map_err(|e| Error::overlay(format!("cannot apply patch in {annotation}: {e}")))?;

    serde_json::from_value(value).map_err(|e| {
        Error::overlay(format!(
            "patch in {annotation} produced an invalid object: {e}"
        ))
    })
}
