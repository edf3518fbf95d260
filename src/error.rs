//! Error types for the Conductor operator

use thiserror::Error;

use crate::store::ObjectKey;

/// Main error type for Conductor operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error, including optimistic-concurrency conflicts.
    ///
    /// Conflicts and transient store failures are surfaced verbatim so the
    /// outer requeue loop can retry the whole reconcile; no retry happens
    /// inside an `ensure` pass.
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Desired-state builder failure (e.g. an invalid user-supplied value)
    #[error("build error: {0}")]
    Build(String),

    /// Malformed or inapplicable JSON Patch overlay on the Platform
    #[error("overlay error: {0}")]
    Overlay(String),

    /// Serialization/deserialization error at the dynamic-object boundary
    #[error("serialization error: {0}")]
    Serialization(String),

    /// An object was still present when the deletion wait deadline elapsed
    #[error("timed out waiting for {key} to be deleted")]
    DeletionTimeout {
        /// Identity of the object that outlived the deadline
        key: ObjectKey,
    },
}

impl Error {
    /// Create a build error with the given message
    pub fn build(msg: impl Into<String>) -> Self {
        Self::Build(msg.into())
    }

    /// Create an overlay error with the given message
    pub fn overlay(msg: impl Into<String>) -> Self {
        Self::Overlay(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// True when this error is the distinct deletion-timeout failure
    pub fn is_deletion_timeout(&self) -> bool {
        matches!(self, Self::DeletionTimeout { .. })
    }
}
