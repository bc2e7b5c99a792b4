//! Access to the Kubernetes objects the reconcilers read and write.
//!
//! Every write is a `replace` carrying the `resourceVersion` of the object
//! that was read, so concurrent modifications surface as
//! [`Error::Conflict`] instead of silently overwriting each other.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{ListParams, PostParams};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::crds::{Cluster, Machine, MetalCluster, MetalMachine};
use crate::types::{Error, Result, CLUSTER_NAME_LABEL};

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get_metal_cluster(&self, namespace: &str, name: &str)
        -> Result<Option<MetalCluster>>;

    async fn get_metal_machine(&self, namespace: &str, name: &str)
        -> Result<Option<MetalMachine>>;

    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<Cluster>>;

    async fn get_machine(&self, namespace: &str, name: &str) -> Result<Option<Machine>>;

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>>;

    /// `MetalMachine`s labelled with the given CAPI cluster name.
    async fn list_metal_machines(
        &self,
        namespace: &str,
        cluster_name: &str,
    ) -> Result<Vec<MetalMachine>>;

    /// Replace metadata and spec.
    async fn replace_metal_cluster(&self, cluster: &MetalCluster) -> Result<MetalCluster>;

    async fn replace_metal_cluster_status(&self, cluster: &MetalCluster) -> Result<MetalCluster>;

    /// Replace metadata and spec.
    async fn replace_metal_machine(&self, machine: &MetalMachine) -> Result<MetalMachine>;

    async fn replace_metal_machine_status(&self, machine: &MetalMachine) -> Result<MetalMachine>;
}

/// [`ObjectStore`] backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn replace<K>(&self, obj: &K) -> Result<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>
            + Clone
            + std::fmt::Debug
            + Serialize
            + DeserializeOwned,
        <K as Resource>::DynamicType: Default,
    {
        let (namespace, name) = object_key(obj)?;
        self.api::<K>(&namespace)
            .replace(&name, &PostParams::default(), obj)
            .await
            .map_err(|e| write_error(e, &namespace, &name))
    }

    async fn replace_status<K>(&self, obj: &K) -> Result<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>
            + Clone
            + std::fmt::Debug
            + Serialize
            + DeserializeOwned,
        <K as Resource>::DynamicType: Default,
    {
        let (namespace, name) = object_key(obj)?;
        let data = serde_json::to_vec(obj)?;
        self.api::<K>(&namespace)
            .replace_status(&name, &PostParams::default(), data)
            .await
            .map_err(|e| write_error(e, &namespace, &name))
    }
}

fn object_key<K: Resource>(obj: &K) -> Result<(String, String)> {
    let namespace = obj.namespace().ok_or(Error::MissingObjectKey)?;
    let name = obj.meta().name.clone().ok_or(Error::MissingObjectKey)?;
    Ok((namespace, name))
}

fn write_error(err: kube::Error, namespace: &str, name: &str) -> Error {
    match err {
        kube::Error::Api(response) if response.code == 409 => {
            debug!(namespace, name, "Write rejected, object changed since read");
            Error::Conflict(format!("{namespace}/{name}: {}", response.message))
        }
        other => Error::KubeError(other),
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get_metal_cluster(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<MetalCluster>> {
        Ok(self.api::<MetalCluster>(namespace).get_opt(name).await?)
    }

    async fn get_metal_machine(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<MetalMachine>> {
        Ok(self.api::<MetalMachine>(namespace).get_opt(name).await?)
    }

    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<Cluster>> {
        Ok(self.api::<Cluster>(namespace).get_opt(name).await?)
    }

    async fn get_machine(&self, namespace: &str, name: &str) -> Result<Option<Machine>> {
        Ok(self.api::<Machine>(namespace).get_opt(name).await?)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        Ok(self.api::<Secret>(namespace).get_opt(name).await?)
    }

    async fn list_metal_machines(
        &self,
        namespace: &str,
        cluster_name: &str,
    ) -> Result<Vec<MetalMachine>> {
        let params = ListParams::default().labels(&format!("{CLUSTER_NAME_LABEL}={cluster_name}"));
        let list = self.api::<MetalMachine>(namespace).list(&params).await?;
        Ok(list.items)
    }

    async fn replace_metal_cluster(&self, cluster: &MetalCluster) -> Result<MetalCluster> {
        self.replace(cluster).await
    }

    async fn replace_metal_cluster_status(&self, cluster: &MetalCluster) -> Result<MetalCluster> {
        self.replace_status(cluster).await
    }

    async fn replace_metal_machine(&self, machine: &MetalMachine) -> Result<MetalMachine> {
        self.replace(machine).await
    }

    async fn replace_metal_machine_status(&self, machine: &MetalMachine) -> Result<MetalMachine> {
        self.replace_status(machine).await
    }
}
