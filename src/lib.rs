//! Conductor - declarative platform operator for Kubernetes
//!
//! Conductor watches a single `Platform` custom resource and keeps a set of
//! dependent managed objects ("operands") converged with the state that
//! resource declares: feature toggles, node placement for the infra and
//! workloads roles, and upgrade progression.
//!
//! # Architecture
//!
//! Each operand kind (the `Engine` workload manager, its config map, the
//! workload priority class) implements a small capability interface; a single
//! generic handler runs the `ensure` protocol against it: read the live
//! object through a per-reconcile cache, create it if absent, otherwise merge
//! the declared intent into it and write back only when the managed fields
//! differ. Fields Conductor does not manage are preserved exactly as an
//! external actor left them.
//!
//! # Modules
//!
//! - [`crd`] - Custom Resource Definitions (Platform, Engine)
//! - [`controller`] - Platform reconciliation entry point
//! - [`operand`] - the generic `ensure` protocol and per-kind handlers
//! - [`store`] - object store abstraction over the cluster API
//! - [`gates`] - feature-gate set reconciliation
//! - [`placement`] - node-placement mirroring and equality
//! - [`overlay`] - user-supplied JSON Patch overlay for the Engine
//! - [`related`] - related-object bookkeeping on the Platform status
//! - [`conditions`] - aggregation of operand conditions
//! - [`removal`] - idempotent operand deletion with wait support
//! - [`error`] - error types for the operator

#![deny(missing_docs)]

pub mod conditions;
pub mod controller;
pub mod crd;
pub mod error;
pub mod gates;
pub mod operand;
pub mod overlay;
pub mod placement;
pub mod related;
pub mod removal;
pub mod store;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Shared Constants
// =============================================================================
// Label and annotation keys live here so the builders, the ownership check in
// removal, and the tests all agree on them.

/// Label key identifying the Platform that owns a managed object.
///
/// The value is the Platform's name. Objects without this label (or with a
/// different owner name) are never deleted by the removal state machine.
pub const PLATFORM_LABEL: &str = "conductor.dev/platform";

/// Label key recording which operand an object belongs to
pub const COMPONENT_LABEL: &str = "conductor.dev/component";

/// Label key recording the operator version that last wrote an object
pub const VERSION_LABEL: &str = "conductor.dev/version";

/// Annotation on the Platform carrying a JSON Patch overlay for the Engine
pub const ENGINE_OVERLAY_ANNOTATION: &str = "conductor.dev/engine-jsonpatch";

/// Version stamped on operands and compared against reported versions
/// during upgrades
pub const OPERATOR_VERSION: &str = env!("CARGO_PKG_VERSION");
