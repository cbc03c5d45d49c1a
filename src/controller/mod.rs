//! Controller reconciliation logic
//!
//! This module contains the convergence engine for BlueGreenDeployment
//! resources.

mod bluegreen;

pub use bluegreen::{error_policy, reconcile, Context, ContextBuilder};
