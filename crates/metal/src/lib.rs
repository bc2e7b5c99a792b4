//! Compute provider contract for the Metal infrastructure controller.
//!
//! This crate defines what the controller needs from a compute provider:
//! instances, private networks and SSH keys, plus the reinstall and rescue
//! side actions. Concrete API clients live outside this workspace and plug
//! in by implementing [`ComputeProvider`].
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use metal::{ComputeProvider, TimeoutProvider};
//!
//! let provider = TimeoutProvider::new(Arc::new(my_generated_client), Duration::from_secs(30));
//! let instance = provider.get_instance("12345").await?;
//! println!("{} is {}", instance.name, instance.status);
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod providers;

pub use providers::{
    ComputeProvider, CreateInstanceRequest, CreateNetworkRequest, CreateSshKeyRequest, ErrorClass,
    Instance, InstanceStatus, NetworkAttachment, NetworkStatus, PrivateNetwork, ProviderError,
    ReinstallRequest, RescueRequest, SshKey, TimeoutProvider,
};

#[cfg(any(test, feature = "mock"))]
pub use providers::MockComputeProvider;
