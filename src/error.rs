//! Error types for the Bluegreen operator

use thiserror::Error;

/// Main error type for Bluegreen operations
///
/// The reconciler classifies failures into a small taxonomy:
/// version conflicts are retried by [`crate::retry::retry_on_conflict`],
/// convergence-wait timeouts are absorbed at best-effort call sites, and
/// everything else aborts the current reconciliation so the controller
/// runtime can re-invoke it later.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Conflict retry budget spent without a successful write
    #[error("update of {resource} exhausted {attempts} conflict retries")]
    ConflictExhausted {
        /// Name of the resource that kept conflicting
        resource: String,
        /// Number of attempts made before giving up
        attempts: u32,
    },

    /// A resource expected to exist was not found
    #[error("resource not found: {0}")]
    NotFound(String),

    /// A convergence wait ran out of time
    #[error("timed out waiting for {0}")]
    Timeout(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Create a conflict-exhausted error for the given resource
    pub fn conflict_exhausted(resource: impl Into<String>, attempts: u32) -> Self {
        Self::ConflictExhausted {
            resource: resource.into(),
            attempts,
        }
    }

    /// Create a not-found error for the given resource
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound(resource.into())
    }

    /// Create a timeout error describing what was being waited for
    pub fn timeout(what: impl Into<String>) -> Self {
        Self::Timeout(what.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// True if this error is an optimistic-concurrency version conflict
    ///
    /// Conflicts are transient: the write lost a race with a concurrent
    /// writer and the whole fetch-mutate-write cycle should be retried.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Kube(kube::Error::Api(e)) if e.code == 409)
    }

    /// True if this error is a "resource does not exist" signal
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Kube(kube::Error::Api(e)) => e.code == 404,
            _ => false,
        }
    }

    /// True if this error is a convergence-wait timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}
