#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc, clippy::doc_markdown)]

//! Cluster API infrastructure controller for the Metal compute provider
//!
//! Watches `MetalCluster` and `MetalMachine` objects and drives the
//! provider until private networks, SSH keys and instances match them.
//! The concrete provider client is supplied by the caller of [`run`].

pub mod conditions;
pub mod config;
pub mod crds;
pub mod health;
pub mod operator;
pub mod reconcilers;
pub mod scheduler;
pub mod store;
pub mod telemetry;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use config::ControllerConfig;
pub use crds::{MetalCluster, MetalClusterSpec, MetalClusterStatus};
pub use crds::{MetalMachine, MetalMachineSpec, MetalMachineStatus};
pub use operator::run;
pub use types::{Context, Error, Result};
