//! Provider abstractions for compute providers.

mod models;
mod timeout;
mod traits;

pub use models::{
    CreateInstanceRequest, CreateNetworkRequest, CreateSshKeyRequest, Instance, InstanceStatus,
    NetworkAttachment, NetworkStatus, PrivateNetwork, ReinstallRequest, RescueRequest, SshKey,
};
pub use timeout::TimeoutProvider;
#[cfg(any(test, feature = "mock"))]
pub use traits::MockComputeProvider;
pub use traits::{ComputeProvider, ErrorClass, ProviderError};
