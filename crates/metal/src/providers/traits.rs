//! Compute provider trait and error taxonomy.
//!
//! The controller never talks HTTP itself. Everything it needs from the
//! compute provider goes through [`ComputeProvider`], and every failure is
//! reported as a [`ProviderError`] that can be classified with
//! [`ProviderError::class`].

use async_trait::async_trait;
use thiserror::Error;

#[cfg(any(test, feature = "mock"))]
use mockall::automock;

use super::models::{
    CreateInstanceRequest, CreateNetworkRequest, CreateSshKeyRequest, Instance, PrivateNetwork,
    ReinstallRequest, RescueRequest, SshKey,
};

/// Errors that can occur during provider operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The referenced object does not exist at the provider.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The request conflicts with the current provider state
    /// (e.g. a network that is already attached).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The provider rejected the request as invalid (unknown product,
    /// unsupported image/region combination, malformed key, ...).
    #[error("Invalid request: {0}")]
    Invalid(String),

    /// API returned an error response.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// The request did not complete before the request deadline.
    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    /// Connection or transport level failure.
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Coarse classification used by the reconcilers to decide between retrying,
/// treating the object as gone, or surfacing a terminal failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Timeouts, 5xx, rate limits, connection resets. Always retried.
    Transient,
    /// The object is gone.
    NotFound,
    /// Retrying the same request cannot succeed until the input changes.
    Terminal,
}

impl ProviderError {
    /// Classify this error.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::NotFound(_) => ErrorClass::NotFound,
            Self::Invalid(_) => ErrorClass::Terminal,
            Self::Api { status, .. } => match *status {
                404 => ErrorClass::NotFound,
                408 | 429 => ErrorClass::Transient,
                s if s >= 500 => ErrorClass::Transient,
                s if (400..500).contains(&s) => ErrorClass::Terminal,
                _ => ErrorClass::Transient,
            },
            Self::Conflict(_) | Self::Timeout(_) | Self::Transport(_) => ErrorClass::Transient,
        }
    }

    /// Returns `true` if the provider reported the object as missing.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.class() == ErrorClass::NotFound
    }

    /// Returns `true` if retrying cannot help without a change of input.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.class() == ErrorClass::Terminal
    }
}

/// Trait for compute providers.
///
/// Every method must be safe to call again after a failure or a crash.
/// Lookups by name (`find_*`) exist so callers can recover objects whose
/// creation succeeded but whose id was never recorded.
#[cfg_attr(any(test, feature = "mock"), automock)]
#[async_trait]
pub trait ComputeProvider: Send + Sync {
    /// Create a new instance.
    async fn create_instance(&self, req: CreateInstanceRequest) -> Result<Instance, ProviderError>;

    /// Get instance by ID.
    async fn get_instance(&self, id: &str) -> Result<Instance, ProviderError>;

    /// Find an instance by its name.
    async fn find_instance(&self, name: &str) -> Result<Option<Instance>, ProviderError>;

    /// Delete an instance.
    async fn delete_instance(&self, id: &str) -> Result<(), ProviderError>;

    /// Reinstall the operating system of an existing instance.
    async fn reinstall_instance(&self, id: &str, req: ReinstallRequest)
        -> Result<(), ProviderError>;

    /// Boot an existing instance into the rescue system.
    async fn rescue_instance(&self, id: &str, req: RescueRequest) -> Result<(), ProviderError>;

    /// Create a private network.
    async fn create_private_network(
        &self,
        req: CreateNetworkRequest,
    ) -> Result<PrivateNetwork, ProviderError>;

    /// Get private network by ID.
    async fn get_private_network(&self, id: &str) -> Result<PrivateNetwork, ProviderError>;

    /// Find a private network by its name.
    async fn find_private_network(&self, name: &str)
        -> Result<Option<PrivateNetwork>, ProviderError>;

    /// Delete a private network.
    async fn delete_private_network(&self, id: &str) -> Result<(), ProviderError>;

    /// Attach an instance to a private network.
    async fn attach_private_network(
        &self,
        instance_id: &str,
        network_id: &str,
    ) -> Result<(), ProviderError>;

    /// Detach an instance from a private network.
    async fn detach_private_network(
        &self,
        instance_id: &str,
        network_id: &str,
    ) -> Result<(), ProviderError>;

    /// Register an SSH public key under a name.
    async fn create_ssh_key(&self, req: CreateSshKeyRequest) -> Result<SshKey, ProviderError>;

    /// Get SSH key by name.
    async fn get_ssh_key(&self, name: &str) -> Result<SshKey, ProviderError>;

    /// Delete SSH key by name.
    async fn delete_ssh_key(&self, name: &str) -> Result<(), ProviderError>;
}
