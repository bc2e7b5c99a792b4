//! Watch fan-in: turns object events into queue keys.
//!
//! Changes to a `MetalCluster` wake its machines, changes to a
//! `MetalMachine` wake its cluster, and the Cluster API kinds wake the
//! infrastructure objects they reference.

use std::sync::Arc;

use futures::StreamExt;
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::{Api, Client, Resource, ResourceExt};
use tracing::{debug, info, warn};

use super::{ObjectKey, ResourceKind, WorkQueue};
use crate::crds::{Cluster, Machine, MetalCluster, MetalMachine};
use crate::store::ObjectStore;
use crate::types::Result;

/// Maps watched objects to the keys that need reconciling.
pub struct WatchMapper {
    store: Arc<dyn ObjectStore>,
}

impl WatchMapper {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// The cluster itself and every `MetalMachine` that belongs to it.
    pub async fn metal_cluster_keys(&self, cluster: &MetalCluster) -> Result<Vec<ObjectKey>> {
        let Some(namespace) = cluster.namespace() else {
            return Ok(Vec::new());
        };
        let mut keys = vec![ObjectKey::new(
            ResourceKind::MetalCluster,
            &namespace,
            cluster.name_any(),
        )];
        if let Some(cluster_name) = cluster.cluster_name() {
            let machines = self.store.list_metal_machines(&namespace, &cluster_name).await?;
            keys.extend(machines.iter().map(|m| {
                ObjectKey::new(ResourceKind::MetalMachine, &namespace, m.name_any())
            }));
        }
        Ok(keys)
    }

    /// The machine itself and the `MetalCluster` of its cluster.
    pub async fn metal_machine_keys(&self, machine: &MetalMachine) -> Result<Vec<ObjectKey>> {
        let Some(namespace) = machine.namespace() else {
            return Ok(Vec::new());
        };
        let mut keys = vec![ObjectKey::new(
            ResourceKind::MetalMachine,
            &namespace,
            machine.name_any(),
        )];
        if let Some(cluster_name) = machine.cluster_name() {
            if let Some(cluster) = self.store.get_cluster(&namespace, &cluster_name).await? {
                keys.extend(cluster_key(&cluster));
            }
        }
        Ok(keys)
    }
}

/// `MetalMachine` referenced by a CAPI `Machine`.
pub fn machine_key(machine: &Machine) -> Option<ObjectKey> {
    let reference = &machine.spec.infrastructure_ref;
    if !reference.is_infrastructure_kind("MetalMachine") || reference.name.is_empty() {
        return None;
    }
    let namespace = reference.namespace.clone().or_else(|| machine.namespace())?;
    Some(ObjectKey::new(
        ResourceKind::MetalMachine,
        namespace,
        &reference.name,
    ))
}

/// `MetalCluster` referenced by a CAPI `Cluster`.
pub fn cluster_key(cluster: &Cluster) -> Option<ObjectKey> {
    let reference = cluster.spec.infrastructure_ref.as_ref()?;
    if !reference.is_infrastructure_kind("MetalCluster") || reference.name.is_empty() {
        return None;
    }
    let namespace = reference.namespace.clone().or_else(|| cluster.namespace())?;
    Some(ObjectKey::new(
        ResourceKind::MetalCluster,
        namespace,
        &reference.name,
    ))
}

fn api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <K as Resource>::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// Object carried by a watch event, if any.
fn event_object<K>(event: Event<K>) -> Option<K> {
    match event {
        Event::Apply(obj) | Event::InitApply(obj) | Event::Delete(obj) => Some(obj),
        Event::Init | Event::InitDone => None,
    }
}

fn enqueue_all(queue: &WorkQueue<ObjectKey>, keys: impl IntoIterator<Item = ObjectKey>) {
    for key in keys {
        debug!(%key, "Enqueue from watch");
        queue.add(key);
    }
}

fn log_watch_error<K>(
    result: std::result::Result<Event<K>, watcher::Error>,
    kind: &str,
) -> Option<Event<K>> {
    match result {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(error = %e, kind, "Watcher error, will retry");
            None
        }
    }
}

/// Watch the four kinds and feed the queue until the task is aborted.
pub async fn run(
    client: Client,
    namespace: Option<String>,
    store: Arc<dyn ObjectStore>,
    queue: Arc<WorkQueue<ObjectKey>>,
) {
    let namespace = namespace.as_deref();
    let config = watcher::Config::default().any_semantic();
    let mapper = WatchMapper::new(store);

    let metal_clusters = watcher::watcher(api::<MetalCluster>(&client, namespace), config.clone())
        .default_backoff();
    let metal_machines = watcher::watcher(api::<MetalMachine>(&client, namespace), config.clone())
        .default_backoff();
    let clusters = watcher::watcher(api::<Cluster>(&client, namespace), config.clone()).default_backoff();
    let machines = watcher::watcher(api::<Machine>(&client, namespace), config).default_backoff();

    let mut metal_clusters = std::pin::pin!(metal_clusters);
    let mut metal_machines = std::pin::pin!(metal_machines);
    let mut clusters = std::pin::pin!(clusters);
    let mut machines = std::pin::pin!(machines);

    info!(namespace = namespace.unwrap_or("<all>"), "Watching infrastructure objects");

    loop {
        tokio::select! {
            Some(result) = metal_clusters.next() => {
                if let Some(cluster) = log_watch_error(result, "MetalCluster").and_then(event_object) {
                    match mapper.metal_cluster_keys(&cluster).await {
                        Ok(keys) => enqueue_all(&queue, keys),
                        Err(e) => warn!(error = %e, "Failed to map MetalCluster event"),
                    }
                }
            }
            Some(result) = metal_machines.next() => {
                if let Some(machine) = log_watch_error(result, "MetalMachine").and_then(event_object) {
                    match mapper.metal_machine_keys(&machine).await {
                        Ok(keys) => enqueue_all(&queue, keys),
                        Err(e) => warn!(error = %e, "Failed to map MetalMachine event"),
                    }
                }
            }
            Some(result) = clusters.next() => {
                if let Some(cluster) = log_watch_error(result, "Cluster").and_then(event_object) {
                    enqueue_all(&queue, cluster_key(&cluster));
                }
            }
            Some(result) = machines.next() => {
                if let Some(machine) = log_watch_error(result, "Machine").and_then(event_object) {
                    enqueue_all(&queue, machine_key(&machine));
                }
            }
            else => {
                warn!("All watch streams ended");
                return;
            }
        }
    }
}
