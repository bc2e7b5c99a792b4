use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use kube::ResourceExt;
use metal::{CreateNetworkRequest, CreateSshKeyRequest, NetworkStatus, PrivateNetwork, SshKey};
use tracing::{debug, info, instrument, warn};

use super::{finalizer_event, is_paused, with_finalizer, without_finalizer, FinalizerEvent};
use super::{Outcome, Reconciler};
use crate::conditions::vocabulary::{
    CONTROL_PLANE_ENDPOINT_READY, CREATING, DELETING, DELETION_FAILED, FAILED,
    PRIVATE_NETWORK_READY, READY, SSH_KEY_MISMATCH, SSH_KEY_READY,
    WAITING_FOR_CONTROL_PLANE_ENDPOINT, WAITING_FOR_MACHINES_DELETION,
    WAITING_FOR_SSH_KEY_SECRET,
};
use crate::crds::{
    FailureDomain, MetalCluster, MetalClusterStatus, PrivateNetworkStatus, SshKeySpec,
    SshKeyStatus,
};
use crate::types::{Context, Error, Result, CLUSTER_FINALIZER};

/// Reconciles `MetalCluster` objects: private network, control plane
/// endpoint and SSH key, and their teardown.
pub struct ClusterReconciler {
    ctx: Arc<Context>,
}

#[async_trait]
impl Reconciler for ClusterReconciler {
    #[instrument(skip(self), fields(kind = "MetalCluster"))]
    async fn reconcile(&self, namespace: &str, name: &str) -> Result<Outcome> {
        let Some(cluster) = self.ctx.store.get_metal_cluster(namespace, name).await? else {
            debug!("MetalCluster no longer exists");
            return Ok(Outcome::AwaitChange);
        };

        match finalizer_event(&cluster, CLUSTER_FINALIZER) {
            FinalizerEvent::Add => {
                let cluster = self
                    .ctx
                    .store
                    .replace_metal_cluster(&with_finalizer(&cluster, CLUSTER_FINALIZER))
                    .await?;
                debug!("Added finalizer");
                self.apply(cluster).await
            }
            FinalizerEvent::Apply => self.apply(cluster).await,
            FinalizerEvent::Cleanup => self.cleanup(cluster).await,
            FinalizerEvent::Released => Ok(Outcome::AwaitChange),
        }
    }
}

impl ClusterReconciler {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    async fn apply(&self, cluster: MetalCluster) -> Result<Outcome> {
        let namespace = cluster.namespace().ok_or(Error::MissingObjectKey)?;

        let Some(owner_name) = cluster.owner_cluster_name() else {
            info!("Waiting for Cluster Controller to set OwnerRef on MetalCluster");
            return Ok(Outcome::Pending);
        };
        let Some(owner) = self.ctx.store.get_cluster(&namespace, &owner_name).await? else {
            info!(cluster = %owner_name, "Owner Cluster not found yet");
            return Ok(Outcome::Pending);
        };
        if is_paused(&cluster, &owner) {
            info!("Reconciliation is paused");
            return Ok(Outcome::AwaitChange);
        }

        let original = cluster.status.clone();
        let mut status = original.clone().unwrap_or_default();

        let network = self.reconcile_network(&cluster, &mut status).await;
        reconcile_endpoint(&cluster, &mut status);
        let ssh_key = self.reconcile_ssh_key(&cluster, &namespace, &mut status).await;

        status.failure_domains =
            BTreeMap::from([(cluster.spec.region.clone(), FailureDomain { control_plane: true })]);
        status.conditions.set_summary(&cluster.required_conditions());
        status.ready = status.conditions.is_true(READY);
        status.observed_generation = cluster.metadata.generation;

        self.write_status(&cluster, original.as_ref(), status.clone())
            .await?;
        network?;
        ssh_key?;

        if status.ready {
            info!("✅ MetalCluster is ready");
            Ok(Outcome::Done)
        } else {
            Ok(Outcome::Pending)
        }
    }

    async fn reconcile_network(
        &self,
        cluster: &MetalCluster,
        status: &mut MetalClusterStatus,
    ) -> Result<()> {
        let Some(spec) = cluster.spec.private_network.as_ref() else {
            status.conditions.remove(PRIVATE_NETWORK_READY);
            return Ok(());
        };

        if let Some(recorded) = status.network.clone() {
            match self.ctx.provider.get_private_network(&recorded.id).await {
                Ok(network) => {
                    mark_network(status, &network);
                    return Ok(());
                }
                Err(e) if e.is_not_found() => {
                    warn!(network_id = %recorded.id, "Recorded private network is gone, recreating");
                    status.network = None;
                }
                Err(e) => {
                    status.conditions.mark_false(
                        PRIVATE_NETWORK_READY,
                        FAILED,
                        format!("Failed to get private network {}: {e}", recorded.id),
                    );
                    return Err(e.into());
                }
            }
        }

        let name = cluster.network_name().unwrap_or_else(|| cluster.name_any());
        let network = match self.ctx.provider.find_private_network(&name).await {
            Ok(Some(existing)) => {
                info!(network_id = %existing.id, "Adopting existing private network");
                existing
            }
            Ok(None) => {
                status.conditions.mark_false(
                    PRIVATE_NETWORK_READY,
                    CREATING,
                    format!("Creating private network {name}"),
                );
                let request = CreateNetworkRequest {
                    name: name.clone(),
                    ip_range: spec.ip_range.clone(),
                    region: cluster.spec.region.clone(),
                    tags: cluster.provider_tags(),
                };
                match self.ctx.provider.create_private_network(request).await {
                    Ok(created) => {
                        info!(network_id = %created.id, "Created private network");
                        created
                    }
                    Err(e) => {
                        status.conditions.mark_false(
                            PRIVATE_NETWORK_READY,
                            FAILED,
                            format!("Failed to create private network {name}: {e}"),
                        );
                        return Err(e.into());
                    }
                }
            }
            Err(e) => {
                status.conditions.mark_false(
                    PRIVATE_NETWORK_READY,
                    FAILED,
                    format!("Failed to look up private network {name}: {e}"),
                );
                return Err(e.into());
            }
        };

        status.network = Some(PrivateNetworkStatus {
            id: network.id.clone(),
            name: network.name.clone(),
            ip_range: network.ip_range.clone(),
            managed: cluster.owns(&network.tags),
        });
        mark_network(status, &network);
        Ok(())
    }

    async fn reconcile_ssh_key(
        &self,
        cluster: &MetalCluster,
        namespace: &str,
        status: &mut MetalClusterStatus,
    ) -> Result<()> {
        let Some(spec) = cluster.spec.ssh_key.as_ref() else {
            status.conditions.remove(SSH_KEY_READY);
            return Ok(());
        };

        let Some(public_key) = self.read_public_key(namespace, spec).await? else {
            status.conditions.mark_false(
                SSH_KEY_READY,
                WAITING_FOR_SSH_KEY_SECRET,
                format!(
                    "Secret {}/{} does not carry key {}",
                    namespace, spec.secret_ref.name, spec.secret_ref.key
                ),
            );
            return Ok(());
        };

        let key = match self.ctx.provider.get_ssh_key(&spec.name).await {
            Ok(existing) => {
                if existing.public_key.trim() != public_key {
                    status.conditions.mark_false(
                        SSH_KEY_READY,
                        SSH_KEY_MISMATCH,
                        format!(
                            "SSH key {} exists at the provider with a different public key",
                            spec.name
                        ),
                    );
                    return Ok(());
                }
                existing
            }
            Err(e) if e.is_not_found() => {
                status.conditions.mark_false(
                    SSH_KEY_READY,
                    CREATING,
                    format!("Registering SSH key {}", spec.name),
                );
                let request = CreateSshKeyRequest {
                    name: spec.name.clone(),
                    public_key,
                    tags: cluster.provider_tags(),
                };
                match self.ctx.provider.create_ssh_key(request).await {
                    Ok(created) => {
                        info!(key = %created.name, "Registered SSH key");
                        created
                    }
                    Err(e) => {
                        status.conditions.mark_false(
                            SSH_KEY_READY,
                            FAILED,
                            format!("Failed to register SSH key {}: {e}", spec.name),
                        );
                        return Err(e.into());
                    }
                }
            }
            Err(e) => {
                status.conditions.mark_false(
                    SSH_KEY_READY,
                    FAILED,
                    format!("Failed to get SSH key {}: {e}", spec.name),
                );
                return Err(e.into());
            }
        };

        record_ssh_key(cluster, status, &key);
        Ok(())
    }

    async fn read_public_key(&self, namespace: &str, spec: &SshKeySpec) -> Result<Option<String>> {
        let secret = self
            .ctx
            .store
            .get_secret(namespace, &spec.secret_ref.name)
            .await?;
        let public_key = secret
            .and_then(|s| s.data)
            .and_then(|data| data.get(&spec.secret_ref.key).cloned())
            .map(|bytes| String::from_utf8_lossy(&bytes.0).trim().to_string())
            .filter(|key| !key.is_empty());
        Ok(public_key)
    }

    async fn cleanup(&self, cluster: MetalCluster) -> Result<Outcome> {
        let namespace = cluster.namespace().ok_or(Error::MissingObjectKey)?;
        let original = cluster.status.clone();
        let mut status = original.clone().unwrap_or_default();

        let result = self.teardown(&cluster, &namespace, &mut status).await;
        status.ready = false;
        let cluster = self
            .write_status(&cluster, original.as_ref(), status)
            .await?;

        if result? {
            self.ctx
                .store
                .replace_metal_cluster(&without_finalizer(&cluster, CLUSTER_FINALIZER))
                .await?;
            info!("🧹 MetalCluster infrastructure removed, finalizer released");
            Ok(Outcome::AwaitChange)
        } else {
            Ok(Outcome::Pending)
        }
    }

    /// Returns `true` once nothing is left at the provider.
    async fn teardown(
        &self,
        cluster: &MetalCluster,
        namespace: &str,
        status: &mut MetalClusterStatus,
    ) -> Result<bool> {
        if let Some(cluster_name) = cluster.cluster_name() {
            let machines = self
                .ctx
                .store
                .list_metal_machines(namespace, &cluster_name)
                .await?;
            if !machines.is_empty() {
                info!(remaining = machines.len(), "Waiting for MetalMachines to be deleted");
                status.conditions.mark_false(
                    READY,
                    WAITING_FOR_MACHINES_DELETION,
                    format!("{} MetalMachine(s) still exist", machines.len()),
                );
                return Ok(false);
            }
        }

        status
            .conditions
            .mark_false(READY, DELETING, "Deleting cluster infrastructure");

        if let Some(network) = status.network.clone() {
            if network.managed {
                match self.ctx.provider.delete_private_network(&network.id).await {
                    Ok(()) => info!(network_id = %network.id, "Deleted private network"),
                    Err(e) if e.is_not_found() => {
                        debug!(network_id = %network.id, "Private network already gone");
                    }
                    Err(e) => {
                        status.conditions.mark_false(
                            PRIVATE_NETWORK_READY,
                            DELETION_FAILED,
                            format!("Failed to delete private network {}: {e}", network.id),
                        );
                        return Err(e.into());
                    }
                }
            }
            status.network = None;
            status
                .conditions
                .mark_false(PRIVATE_NETWORK_READY, DELETING, "Private network deleted");
        }

        if let Some(key) = status.ssh_key.clone() {
            if key.managed {
                match self.ctx.provider.delete_ssh_key(&key.name).await {
                    Ok(()) => info!(key = %key.name, "Deleted SSH key"),
                    Err(e) if e.is_not_found() => debug!(key = %key.name, "SSH key already gone"),
                    Err(e) => {
                        status.conditions.mark_false(
                            SSH_KEY_READY,
                            DELETION_FAILED,
                            format!("Failed to delete SSH key {}: {e}", key.name),
                        );
                        return Err(e.into());
                    }
                }
            }
            status.ssh_key = None;
            status
                .conditions
                .mark_false(SSH_KEY_READY, DELETING, "SSH key deleted");
        }

        Ok(true)
    }

    /// Persist `status` if it differs from what was read. Returns the latest object.
    async fn write_status(
        &self,
        cluster: &MetalCluster,
        original: Option<&MetalClusterStatus>,
        status: MetalClusterStatus,
    ) -> Result<MetalCluster> {
        if original == Some(&status) {
            return Ok(cluster.clone());
        }
        let mut updated = cluster.clone();
        updated.status = Some(status);
        self.ctx.store.replace_metal_cluster_status(&updated).await
    }
}

fn reconcile_endpoint(cluster: &MetalCluster, status: &mut MetalClusterStatus) {
    match cluster.spec.control_plane_endpoint.as_ref() {
        Some(endpoint) if endpoint.is_set() => {
            status.conditions.mark_true(
                CONTROL_PLANE_ENDPOINT_READY,
                READY,
                format!("{}:{}", endpoint.host, endpoint.port),
            );
        }
        _ => {
            status.conditions.mark_false(
                CONTROL_PLANE_ENDPOINT_READY,
                WAITING_FOR_CONTROL_PLANE_ENDPOINT,
                "Control plane endpoint host and port are not set",
            );
        }
    }
}

fn mark_network(status: &mut MetalClusterStatus, network: &PrivateNetwork) {
    match network.status {
        NetworkStatus::Available => {
            status.conditions.mark_true(
                PRIVATE_NETWORK_READY,
                READY,
                format!("Private network {} is available", network.id),
            );
        }
        NetworkStatus::Deleting => {
            status.conditions.mark_false(
                PRIVATE_NETWORK_READY,
                FAILED,
                format!("Private network {} is being deleted by the provider", network.id),
            );
        }
        NetworkStatus::Creating | NetworkStatus::Unknown => {
            status.conditions.mark_false(
                PRIVATE_NETWORK_READY,
                CREATING,
                format!("Private network {} is not available yet", network.id),
            );
        }
    }
}

fn record_ssh_key(cluster: &MetalCluster, status: &mut MetalClusterStatus, key: &SshKey) {
    status.ssh_key = Some(SshKeyStatus {
        name: key.name.clone(),
        fingerprint: key.fingerprint.clone(),
        managed: cluster.owns(&key.tags),
    });
    status.conditions.mark_true(
        SSH_KEY_READY,
        READY,
        format!("SSH key {} is registered", key.name),
    );
}
