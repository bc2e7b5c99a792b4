//! Request deadline enforcement for any [`ComputeProvider`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use super::models::{
    CreateInstanceRequest, CreateNetworkRequest, CreateSshKeyRequest, Instance, PrivateNetwork,
    ReinstallRequest, RescueRequest, SshKey,
};
use super::traits::{ComputeProvider, ProviderError};

/// Wraps a provider so that no single call can run longer than `timeout`.
///
/// A stalled call surfaces as [`ProviderError::Timeout`], which is
/// transient, so the reconcile gets requeued instead of pinning a worker.
pub struct TimeoutProvider {
    inner: Arc<dyn ComputeProvider>,
    timeout: Duration,
}

impl TimeoutProvider {
    /// Create a new timeout wrapper.
    #[must_use]
    pub fn new(inner: Arc<dyn ComputeProvider>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> Result<T, ProviderError>
    where
        F: Future<Output = Result<T, ProviderError>> + Send,
    {
        if let Ok(result) = tokio::time::timeout(self.timeout, fut).await {
            result
        } else {
            warn!(
                operation,
                timeout_secs = self.timeout.as_secs(),
                "Provider call timed out"
            );
            Err(ProviderError::Timeout(self.timeout.as_secs()))
        }
    }
}

#[async_trait]
impl ComputeProvider for TimeoutProvider {
    async fn create_instance(&self, req: CreateInstanceRequest) -> Result<Instance, ProviderError> {
        self.bounded("create_instance", self.inner.create_instance(req))
            .await
    }

    async fn get_instance(&self, id: &str) -> Result<Instance, ProviderError> {
        self.bounded("get_instance", self.inner.get_instance(id)).await
    }

    async fn find_instance(&self, name: &str) -> Result<Option<Instance>, ProviderError> {
        self.bounded("find_instance", self.inner.find_instance(name))
            .await
    }

    async fn delete_instance(&self, id: &str) -> Result<(), ProviderError> {
        self.bounded("delete_instance", self.inner.delete_instance(id))
            .await
    }

    async fn reinstall_instance(
        &self,
        id: &str,
        req: ReinstallRequest,
    ) -> Result<(), ProviderError> {
        self.bounded("reinstall_instance", self.inner.reinstall_instance(id, req))
            .await
    }

    async fn rescue_instance(&self, id: &str, req: RescueRequest) -> Result<(), ProviderError> {
        self.bounded("rescue_instance", self.inner.rescue_instance(id, req))
            .await
    }

    async fn create_private_network(
        &self,
        req: CreateNetworkRequest,
    ) -> Result<PrivateNetwork, ProviderError> {
        self.bounded(
            "create_private_network",
            self.inner.create_private_network(req),
        )
        .await
    }

    async fn get_private_network(&self, id: &str) -> Result<PrivateNetwork, ProviderError> {
        self.bounded("get_private_network", self.inner.get_private_network(id))
            .await
    }

    async fn find_private_network(
        &self,
        name: &str,
    ) -> Result<Option<PrivateNetwork>, ProviderError> {
        self.bounded("find_private_network", self.inner.find_private_network(name))
            .await
    }

    async fn delete_private_network(&self, id: &str) -> Result<(), ProviderError> {
        self.bounded(
            "delete_private_network",
            self.inner.delete_private_network(id),
        )
        .await
    }

    async fn attach_private_network(
        &self,
        instance_id: &str,
        network_id: &str,
    ) -> Result<(), ProviderError> {
        self.bounded(
            "attach_private_network",
            self.inner.attach_private_network(instance_id, network_id),
        )
        .await
    }

    async fn detach_private_network(
        &self,
        instance_id: &str,
        network_id: &str,
    ) -> Result<(), ProviderError> {
        self.bounded(
            "detach_private_network",
            self.inner.detach_private_network(instance_id, network_id),
        )
        .await
    }

    async fn create_ssh_key(&self, req: CreateSshKeyRequest) -> Result<SshKey, ProviderError> {
        self.bounded("create_ssh_key", self.inner.create_ssh_key(req))
            .await
    }

    async fn get_ssh_key(&self, name: &str) -> Result<SshKey, ProviderError> {
        self.bounded("get_ssh_key", self.inner.get_ssh_key(name)).await
    }

    async fn delete_ssh_key(&self, name: &str) -> Result<(), ProviderError> {
        self.bounded("delete_ssh_key", self.inner.delete_ssh_key(name))
            .await
    }
}
