//! Bluegreen - Kubernetes operator for zero-downtime blue-green deployments
//!
//! Bluegreen maintains two parallel ReplicaSets ("blue" and "green") per
//! BlueGreenDeployment, routes live traffic to exactly one of them through a
//! Service selector, and performs cutovers when the desired pod spec changes
//! by provisioning the idle color, switching traffic, and retiring the
//! previously active color.
//!
//! # Architecture
//!
//! Every reconciliation re-derives the world from the API server: the desired
//! pod spec is fingerprinted and compared against both live ReplicaSet
//! templates, which selects one of three convergence actions (no-op, switch,
//! replace). All mutation goes through conflict-retried read-modify-write
//! cycles, so concurrent writers and partial failures are resumable.
//!
//! # Modules
//!
//! - [`crd`] - BlueGreenDeployment Custom Resource Definition
//! - [`controller`] - Reconciliation logic (the convergence engine)
//! - [`provision`] - Get-or-create for ReplicaSets and the traffic Service
//! - [`fingerprint`] - Pod spec change detection
//! - [`retry`] - Conflict-retry with exponential backoff
//! - [`wait`] - Bounded polling until a resource converges
//! - [`store`] - Resource store boundary over the Kubernetes API
//! - [`error`] - Error types for the operator

#![deny(missing_docs)]

pub mod controller;
pub mod crd;
pub mod error;
pub mod fingerprint;
pub mod provision;
pub mod retry;
pub mod store;
pub mod wait;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Well-Known Resource Names
// =============================================================================
// Both ReplicaSets and the Service are singletons per namespace with fixed
// names, so every reconciliation can re-fetch them without bookkeeping.

/// Name of the blue ReplicaSet
pub const BLUE_RS_NAME: &str = "blue-rs";

/// Name of the green ReplicaSet
pub const GREEN_RS_NAME: &str = "green-rs";

/// Name of the traffic-routing Service
pub const SERVICE_NAME: &str = "bgd-svc";

/// Label key whose value selects which color receives traffic
pub const COLOR_LABEL_KEY: &str = "color";

/// Field manager name used for server-side apply of the CRD
pub const FIELD_MANAGER: &str = "bluegreen-controller";
