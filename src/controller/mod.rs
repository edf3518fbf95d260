//! Controller implementation for the Platform CRD
//!
//! Composes the operand handlers into the reconcile entry point the kube
//! runtime drives, following the observe-diff-act controller pattern.

mod platform;

pub use platform::{
    error_policy, reconcile, Context, ContextBuilder, KubePlatformWriter, PlatformWriter,
    PLATFORM_FINALIZER,
};
