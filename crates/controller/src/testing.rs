//! In-memory stand-ins for the API server and the compute provider.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{OwnerReference, Time};
use k8s_openapi::ByteString;
use kube::{Resource, ResourceExt};
use metal::{
    ComputeProvider, CreateInstanceRequest, CreateNetworkRequest, CreateSshKeyRequest, Instance,
    InstanceStatus, NetworkAttachment, NetworkStatus, PrivateNetwork, ProviderError,
    ReinstallRequest, RescueRequest, SshKey,
};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::conditions::vocabulary::{
    CONTROL_PLANE_ENDPOINT_READY, PRIVATE_NETWORK_READY, READY,
};
use crate::crds::{
    ApiEndpoint, Bootstrap, Cluster, ClusterSpec, Machine, MachineSpec, MachineStatus,
    MetalCluster, MetalClusterSpec, MetalClusterStatus, MetalMachine, MetalMachineSpec,
    ObjectReference, PrivateNetworkSpec, PrivateNetworkStatus,
};
use crate::store::ObjectStore;
use crate::types::{Error, Result, CLUSTER_NAME_LABEL};

pub(crate) const NAMESPACE: &str = "default";

type Key = (String, String);

/// One kind of object, with just enough API server behaviour for the reconcilers.
struct Objects<K> {
    items: Mutex<BTreeMap<Key, K>>,
    writes: AtomicUsize,
}

impl<K> Default for Objects<K> {
    fn default() -> Self {
        Self {
            items: Mutex::new(BTreeMap::new()),
            writes: AtomicUsize::new(0),
        }
    }
}

impl<K> Objects<K>
where
    K: Resource + Clone + Serialize + DeserializeOwned,
{
    fn insert(&self, mut obj: K) {
        let meta = obj.meta_mut();
        let name = meta.name.clone().unwrap_or_default();
        let namespace = meta.namespace.get_or_insert_with(|| NAMESPACE.to_string()).clone();
        meta.uid.get_or_insert_with(|| format!("uid-{name}"));
        meta.generation.get_or_insert(1);
        meta.resource_version.get_or_insert_with(|| "1".to_string());
        self.items.lock().unwrap().insert((namespace, name), obj);
    }

    fn get(&self, namespace: &str, name: &str) -> Option<K> {
        self.items
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    fn list(&self, namespace: &str) -> Vec<K> {
        self.items
            .lock()
            .unwrap()
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, obj)| obj.clone())
            .collect()
    }

    /// Mutate the stored object the way a user edit would.
    fn update(&self, name: &str, f: impl FnOnce(&mut K)) {
        let mut edited = self.get(NAMESPACE, name).expect("object exists");
        f(&mut edited);
        self.replace(&edited, false).expect("edit applies");
    }

    fn delete(&self, name: &str) {
        let key = (NAMESPACE.to_string(), name.to_string());
        let mut items = self.items.lock().unwrap();
        let Some(obj) = items.get_mut(&key) else {
            return;
        };
        if obj.finalizers().is_empty() {
            items.remove(&key);
        } else {
            obj.meta_mut().deletion_timestamp = Some(Time(chrono::Utc::now()));
        }
    }

    /// `replace` or `replace_status` with optimistic concurrency.
    fn replace(&self, obj: &K, status_only: bool) -> Result<K> {
        let namespace = obj.meta().namespace.clone().ok_or(Error::MissingObjectKey)?;
        let name = obj.meta().name.clone().ok_or(Error::MissingObjectKey)?;
        let key = (namespace.clone(), name.clone());

        let mut items = self.items.lock().unwrap();
        let Some(current) = items.get(&key) else {
            return Err(Error::Invariant(format!("{namespace}/{name} does not exist")));
        };
        if obj.meta().resource_version.is_some()
            && obj.meta().resource_version != current.meta().resource_version
        {
            return Err(Error::Conflict(format!("{namespace}/{name}")));
        }

        let current_json = serde_json::to_value(current)?;
        let mut next_json = serde_json::to_value(obj)?;
        let spec_changed = if status_only {
            let status = next_json["status"].take();
            next_json = current_json.clone();
            next_json["status"] = status;
            false
        } else {
            next_json["status"] = current_json["status"].clone();
            next_json["spec"] != current_json["spec"]
        };

        let mut next: K = serde_json::from_value(next_json)?;
        let version = current
            .meta()
            .resource_version
            .as_deref()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0)
            + 1;
        let generation = current.meta().generation.unwrap_or(1) + i64::from(spec_changed);
        next.meta_mut().resource_version = Some(version.to_string());
        next.meta_mut().generation = Some(generation);

        if next.meta().deletion_timestamp.is_some() && next.finalizers().is_empty() {
            items.remove(&key);
        } else {
            items.insert(key, next.clone());
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(next)
    }
}

/// [`ObjectStore`] over in-memory maps.
///
/// Objects inserted without namespace land in [`NAMESPACE`]. Writes check
/// `resourceVersion`, bump `generation` on spec changes and remove objects
/// whose last finalizer is released during deletion.
#[derive(Default)]
pub(crate) struct FakeStore {
    metal_clusters: Objects<MetalCluster>,
    metal_machines: Objects<MetalMachine>,
    clusters: Objects<Cluster>,
    machines: Objects<Machine>,
    secrets: Objects<Secret>,
    conflict_next_write: AtomicBool,
}

impl FakeStore {
    pub fn insert_metal_cluster(&self, obj: MetalCluster) {
        self.metal_clusters.insert(obj);
    }

    pub fn insert_metal_machine(&self, obj: MetalMachine) {
        self.metal_machines.insert(obj);
    }

    pub fn insert_cluster(&self, obj: Cluster) {
        self.clusters.insert(obj);
    }

    pub fn insert_machine(&self, obj: Machine) {
        self.machines.insert(obj);
    }

    pub fn insert_secret(&self, obj: Secret) {
        self.secrets.insert(obj);
    }

    pub fn metal_cluster(&self, name: &str) -> Option<MetalCluster> {
        self.metal_clusters.get(NAMESPACE, name)
    }

    pub fn metal_machine(&self, name: &str) -> Option<MetalMachine> {
        self.metal_machines.get(NAMESPACE, name)
    }

    pub fn metal_cluster_status(&self, name: &str) -> MetalClusterStatus {
        self.metal_cluster(name)
            .and_then(|c| c.status)
            .unwrap_or_default()
    }

    pub fn metal_machine_status(&self, name: &str) -> crate::crds::MetalMachineStatus {
        self.metal_machine(name)
            .and_then(|m| m.status)
            .unwrap_or_default()
    }

    /// Spec or metadata edit, as `kubectl edit` would do it.
    pub fn update_metal_machine(&self, name: &str, f: impl FnOnce(&mut MetalMachine)) {
        self.metal_machines.update(name, f);
    }

    pub fn update_metal_cluster(&self, name: &str, f: impl FnOnce(&mut MetalCluster)) {
        self.metal_clusters.update(name, f);
    }

    /// Request deletion: sets the deletion timestamp while finalizers remain.
    pub fn delete_metal_machine(&self, name: &str) {
        self.metal_machines.delete(name);
    }

    pub fn delete_metal_cluster(&self, name: &str) {
        self.metal_clusters.delete(name);
    }

    /// Writes to the infrastructure kinds so far.
    pub fn writes(&self) -> usize {
        self.metal_clusters.writes.load(Ordering::SeqCst)
            + self.metal_machines.writes.load(Ordering::SeqCst)
    }

    /// Fail the next infrastructure write with a conflict.
    pub fn conflict_next_write(&self) {
        self.conflict_next_write.store(true, Ordering::SeqCst);
    }

    fn check_conflict(&self) -> Result<()> {
        if self.conflict_next_write.swap(false, Ordering::SeqCst) {
            return Err(Error::Conflict("injected".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for FakeStore {
    async fn get_metal_cluster(&self, namespace: &str, name: &str) -> Result<Option<MetalCluster>> {
        Ok(self.metal_clusters.get(namespace, name))
    }

    async fn get_metal_machine(&self, namespace: &str, name: &str) -> Result<Option<MetalMachine>> {
        Ok(self.metal_machines.get(namespace, name))
    }

    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<Cluster>> {
        Ok(self.clusters.get(namespace, name))
    }

    async fn get_machine(&self, namespace: &str, name: &str) -> Result<Option<Machine>> {
        Ok(self.machines.get(namespace, name))
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        Ok(self.secrets.get(namespace, name))
    }

    async fn list_metal_machines(
        &self,
        namespace: &str,
        cluster_name: &str,
    ) -> Result<Vec<MetalMachine>> {
        Ok(self
            .metal_machines
            .list(namespace)
            .into_iter()
            .filter(|m| m.labels().get(CLUSTER_NAME_LABEL).map(String::as_str) == Some(cluster_name))
            .collect())
    }

    async fn replace_metal_cluster(&self, cluster: &MetalCluster) -> Result<MetalCluster> {
        self.check_conflict()?;
        self.metal_clusters.replace(cluster, false)
    }

    async fn replace_metal_cluster_status(&self, cluster: &MetalCluster) -> Result<MetalCluster> {
        self.check_conflict()?;
        self.metal_clusters.replace(cluster, true)
    }

    async fn replace_metal_machine(&self, machine: &MetalMachine) -> Result<MetalMachine> {
        self.check_conflict()?;
        self.metal_machines.replace(machine, false)
    }

    async fn replace_metal_machine_status(&self, machine: &MetalMachine) -> Result<MetalMachine> {
        self.check_conflict()?;
        self.metal_machines.replace(machine, true)
    }
}

#[derive(Default)]
struct ProviderState {
    instances: BTreeMap<String, Instance>,
    networks: BTreeMap<String, PrivateNetwork>,
    ssh_keys: BTreeMap<String, SshKey>,
    next_id: u64,
    calls: Vec<&'static str>,
    failures: HashMap<&'static str, VecDeque<ProviderError>>,
}

impl ProviderState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn call(&mut self, op: &'static str) -> Result<(), ProviderError> {
        self.calls.push(op);
        match self.failures.get_mut(op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// [`ComputeProvider`] keeping instances, networks and keys in memory.
///
/// Instances start `provisioning`; tests move them along with
/// [`FakeProvider::set_instance_status`]. Deletes take effect immediately.
#[derive(Default)]
pub(crate) struct FakeProvider {
    state: Mutex<ProviderState>,
}

impl FakeProvider {
    /// Make the next call of `op` fail with `err`.
    pub fn fail_next(&self, op: &'static str, err: ProviderError) {
        self.state
            .lock()
            .unwrap()
            .failures
            .entry(op)
            .or_default()
            .push_back(err);
    }

    pub fn count(&self, op: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| **c == op)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.state.lock().unwrap().calls.len()
    }

    pub fn instances(&self) -> Vec<Instance> {
        self.state.lock().unwrap().instances.values().cloned().collect()
    }

    pub fn instance(&self, id: &str) -> Option<Instance> {
        self.state.lock().unwrap().instances.get(id).cloned()
    }

    pub fn insert_instance(&self, instance: Instance) {
        self.state
            .lock()
            .unwrap()
            .instances
            .insert(instance.id.clone(), instance);
    }

    pub fn set_instance_status(&self, id: &str, status: InstanceStatus) {
        if let Some(instance) = self.state.lock().unwrap().instances.get_mut(id) {
            instance.status = status;
        }
    }

    pub fn remove_instance(&self, id: &str) {
        self.state.lock().unwrap().instances.remove(id);
    }

    pub fn networks(&self) -> Vec<PrivateNetwork> {
        self.state.lock().unwrap().networks.values().cloned().collect()
    }

    pub fn insert_network(&self, network: PrivateNetwork) {
        self.state
            .lock()
            .unwrap()
            .networks
            .insert(network.id.clone(), network);
    }

    pub fn set_network_status(&self, id: &str, status: NetworkStatus) {
        if let Some(network) = self.state.lock().unwrap().networks.get_mut(id) {
            network.status = status;
        }
    }

    pub fn ssh_key(&self, name: &str) -> Option<SshKey> {
        self.state.lock().unwrap().ssh_keys.get(name).cloned()
    }

    pub fn insert_ssh_key(&self, key: SshKey) {
        self.state
            .lock()
            .unwrap()
            .ssh_keys
            .insert(key.name.clone(), key);
    }
}

fn not_found(what: &str, id: &str) -> ProviderError {
    ProviderError::NotFound(format!("{what} {id}"))
}

#[async_trait]
impl ComputeProvider for FakeProvider {
    async fn create_instance(&self, req: CreateInstanceRequest) -> Result<Instance, ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.call("create_instance")?;
        let n = state.next_id();
        let instance = Instance {
            id: (1000 + n).to_string(),
            name: req.name,
            status: InstanceStatus::Provisioning,
            ipv4: Some(format!("192.0.2.{n}")),
            ipv6: None,
            private_networks: Vec::new(),
            product: req.product,
            region: req.region,
            tags: req.tags,
            created_at: Some(chrono::Utc::now()),
        };
        state.instances.insert(instance.id.clone(), instance.clone());
        Ok(instance)
    }

    async fn get_instance(&self, id: &str) -> Result<Instance, ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.call("get_instance")?;
        state
            .instances
            .get(id)
            .cloned()
            .ok_or_else(|| not_found("instance", id))
    }

    async fn find_instance(&self, name: &str) -> Result<Option<Instance>, ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.call("find_instance")?;
        Ok(state.instances.values().find(|i| i.name == name).cloned())
    }

    async fn delete_instance(&self, id: &str) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.call("delete_instance")?;
        state
            .instances
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| not_found("instance", id))
    }

    async fn reinstall_instance(&self, id: &str, _req: ReinstallRequest) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.call("reinstall_instance")?;
        let instance = state
            .instances
            .get_mut(id)
            .ok_or_else(|| not_found("instance", id))?;
        instance.status = InstanceStatus::Installing;
        Ok(())
    }

    async fn rescue_instance(&self, id: &str, _req: RescueRequest) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.call("rescue_instance")?;
        let instance = state
            .instances
            .get_mut(id)
            .ok_or_else(|| not_found("instance", id))?;
        instance.status = InstanceStatus::Rescue;
        Ok(())
    }

    async fn create_private_network(
        &self,
        req: CreateNetworkRequest,
    ) -> Result<PrivateNetwork, ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.call("create_private_network")?;
        let n = state.next_id();
        let network = PrivateNetwork {
            id: format!("net-{n}"),
            name: req.name,
            ip_range: req.ip_range,
            status: NetworkStatus::Available,
            tags: req.tags,
        };
        state.networks.insert(network.id.clone(), network.clone());
        Ok(network)
    }

    async fn get_private_network(&self, id: &str) -> Result<PrivateNetwork, ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.call("get_private_network")?;
        state
            .networks
            .get(id)
            .cloned()
            .ok_or_else(|| not_found("network", id))
    }

    async fn find_private_network(
        &self,
        name: &str,
    ) -> Result<Option<PrivateNetwork>, ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.call("find_private_network")?;
        Ok(state.networks.values().find(|n| n.name == name).cloned())
    }

    async fn delete_private_network(&self, id: &str) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.call("delete_private_network")?;
        state
            .networks
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| not_found("network", id))
    }

    async fn attach_private_network(
        &self,
        instance_id: &str,
        network_id: &str,
    ) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.call("attach_private_network")?;
        if !state.networks.contains_key(network_id) {
            return Err(not_found("network", network_id));
        }
        let n = state.next_id();
        let instance = state
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| not_found("instance", instance_id))?;
        if instance.is_attached_to(network_id) {
            return Err(ProviderError::Conflict(format!(
                "instance {instance_id} already attached to {network_id}"
            )));
        }
        instance.private_networks.push(NetworkAttachment {
            network_id: network_id.to_string(),
            ip: Some(format!("10.0.0.{n}")),
        });
        Ok(())
    }

    async fn detach_private_network(
        &self,
        instance_id: &str,
        network_id: &str,
    ) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.call("detach_private_network")?;
        let instance = state
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| not_found("instance", instance_id))?;
        if !instance.is_attached_to(network_id) {
            return Err(not_found("attachment", network_id));
        }
        instance
            .private_networks
            .retain(|attachment| attachment.network_id != network_id);
        Ok(())
    }

    async fn create_ssh_key(&self, req: CreateSshKeyRequest) -> Result<SshKey, ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.call("create_ssh_key")?;
        if state.ssh_keys.contains_key(&req.name) {
            return Err(ProviderError::Conflict(format!("ssh key {} exists", req.name)));
        }
        let key = SshKey {
            fingerprint: format!("fp-{}", req.name),
            name: req.name,
            public_key: req.public_key,
            tags: req.tags,
        };
        state.ssh_keys.insert(key.name.clone(), key.clone());
        Ok(key)
    }

    async fn get_ssh_key(&self, name: &str) -> Result<SshKey, ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.call("get_ssh_key")?;
        state
            .ssh_keys
            .get(name)
            .cloned()
            .ok_or_else(|| not_found("ssh key", name))
    }

    async fn delete_ssh_key(&self, name: &str) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.call("delete_ssh_key")?;
        state
            .ssh_keys
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| not_found("ssh key", name))
    }
}

fn infrastructure_ref(kind: &str, name: &str) -> ObjectReference {
    ObjectReference {
        api_version: Some("infrastructure.cluster.x-k8s.io/v1beta1".to_string()),
        kind: Some(kind.to_string()),
        name: name.to_string(),
        namespace: None,
    }
}

fn capi_owner(kind: &str, name: &str) -> OwnerReference {
    OwnerReference {
        api_version: "cluster.x-k8s.io/v1beta1".to_string(),
        kind: kind.to_string(),
        name: name.to_string(),
        uid: format!("uid-{name}"),
        controller: Some(true),
        ..OwnerReference::default()
    }
}

/// CAPI `Cluster` pointing at the `MetalCluster` `infra_name`.
pub(crate) fn capi_cluster(name: &str, infra_name: &str) -> Cluster {
    let mut cluster = Cluster::new(
        name,
        ClusterSpec {
            paused: false,
            infrastructure_ref: Some(infrastructure_ref("MetalCluster", infra_name)),
        },
    );
    cluster.metadata.namespace = Some(NAMESPACE.to_string());
    cluster
}

/// CAPI `Machine` pointing at the `MetalMachine` `infra_name`.
pub(crate) fn capi_machine(
    name: &str,
    cluster_name: &str,
    infra_name: &str,
    bootstrap_secret: Option<&str>,
) -> Machine {
    let mut machine = Machine::new(
        name,
        MachineSpec {
            cluster_name: cluster_name.to_string(),
            bootstrap: Bootstrap {
                data_secret_name: bootstrap_secret.map(ToString::to_string),
            },
            infrastructure_ref: infrastructure_ref("MetalMachine", infra_name),
            provider_id: None,
        },
    );
    machine.metadata.namespace = Some(NAMESPACE.to_string());
    machine.status = Some(MachineStatus::default());
    machine
}

/// `MetalCluster` owned by `capi_cluster_name`, with an endpoint and a private network.
pub(crate) fn metal_cluster(name: &str, capi_cluster_name: &str) -> MetalCluster {
    let mut cluster = MetalCluster::new(
        name,
        MetalClusterSpec {
            region: "fsn1".to_string(),
            control_plane_endpoint: Some(ApiEndpoint {
                host: "203.0.113.10".to_string(),
                port: 6443,
            }),
            private_network: Some(PrivateNetworkSpec {
                name: None,
                ip_range: "10.0.0.0/16".to_string(),
            }),
            ssh_key: None,
            tags: BTreeMap::new(),
        },
    );
    cluster.metadata.namespace = Some(NAMESPACE.to_string());
    cluster.metadata.owner_references = Some(vec![capi_owner("Cluster", capi_cluster_name)]);
    cluster
        .labels_mut()
        .insert(CLUSTER_NAME_LABEL.to_string(), capi_cluster_name.to_string());
    cluster
}

/// `MetalCluster` whose status already reports a ready network `net-ready`.
pub(crate) fn ready_metal_cluster(name: &str, capi_cluster_name: &str) -> MetalCluster {
    let mut cluster = metal_cluster(name, capi_cluster_name);
    let mut status = MetalClusterStatus {
        ready: true,
        network: Some(PrivateNetworkStatus {
            id: "net-ready".to_string(),
            name: format!("{NAMESPACE}-{name}"),
            ip_range: "10.0.0.0/16".to_string(),
            managed: true,
        }),
        ..MetalClusterStatus::default()
    };
    status
        .conditions
        .mark_true(PRIVATE_NETWORK_READY, READY, "available");
    status
        .conditions
        .mark_true(CONTROL_PLANE_ENDPOINT_READY, READY, "203.0.113.10:6443");
    status.conditions.set_summary(&cluster.required_conditions());
    cluster.status = Some(status);
    cluster
}

/// `MetalMachine` owned by the CAPI `Machine` of the same name.
pub(crate) fn metal_machine(name: &str, cluster_name: &str) -> MetalMachine {
    let mut machine = MetalMachine::new(
        name,
        MetalMachineSpec {
            provider_id: None,
            product: "c2-small-x86".to_string(),
            image: None,
            ssh_key_name: None,
            attach_private_network: true,
        },
    );
    machine.metadata.namespace = Some(NAMESPACE.to_string());
    machine.metadata.owner_references = Some(vec![capi_owner("Machine", name)]);
    machine
        .labels_mut()
        .insert(CLUSTER_NAME_LABEL.to_string(), cluster_name.to_string());
    machine
}

pub(crate) fn secret(name: &str, key: &str, value: &str) -> Secret {
    let mut secret = Secret::default();
    secret.metadata.name = Some(name.to_string());
    secret.metadata.namespace = Some(NAMESPACE.to_string());
    secret.data = Some(BTreeMap::from([(
        key.to_string(),
        ByteString(value.as_bytes().to_vec()),
    )]));
    secret
}
