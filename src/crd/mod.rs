//! Custom Resource Definitions for Bluegreen
//!
//! This module contains the BlueGreenDeployment CRD and its supporting types.

mod bluegreen;

pub use bluegreen::{
    BlueGreenDeployment, BlueGreenDeploymentSpec, BlueGreenDeploymentStatus, Color,
};
