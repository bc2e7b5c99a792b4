//! Scenario tests driving the reconcilers against the in-memory store and provider.


use std::sync::Arc;

use metal::ComputeProvider;

use super::{ClusterReconciler, MachineReconciler, Outcome, Reconciler};
use crate::testing::{
    capi_cluster, capi_machine, metal_cluster, metal_machine, secret, FakeProvider, FakeStore,
};
use crate::types::{Context, Result};

const CLUSTER: &str = "prod";
const MACHINE: &str = "worker-0";
const BOOTSTRAP_SECRET: &str = "worker-0-bootstrap";

struct Harness {
    store: Arc<FakeStore>,
    provider: Arc<FakeProvider>,
    clusters: ClusterReconciler,
    machines: MachineReconciler,
}

impl Harness {
    fn new() -> Self {
        let store = Arc::new(FakeStore::default());
        let provider = Arc::new(FakeProvider::default());
        let ctx = Arc::new(Context::new(store.clone(), provider.clone()));
        Self {
            clusters: ClusterReconciler::new(ctx.clone()),
            machines: MachineReconciler::new(ctx),
            store,
            provider,
        }
    }

    /// CAPI cluster `prod` and its `MetalCluster`.
    fn with_cluster() -> Self {
        let harness = Self::new();
        harness.store.insert_cluster(capi_cluster(CLUSTER, CLUSTER));
        harness
            .store
            .insert_metal_cluster(metal_cluster(CLUSTER, CLUSTER));
        harness
    }

    /// Ready cluster plus `worker-0` with bootstrap data.
    async fn with_machine() -> Self {
        let harness = Self::with_cluster();
        assert_eq!(harness.reconcile_cluster().await.unwrap(), Outcome::Done);
        harness.store.insert_machine(capi_machine(
            MACHINE,
            CLUSTER,
            MACHINE,
            Some(BOOTSTRAP_SECRET),
        ));
        harness
            .store
            .insert_secret(secret(BOOTSTRAP_SECRET, "value", "#cloud-config\n"));
        harness
            .store
            .insert_metal_machine(metal_machine(MACHINE, CLUSTER));
        harness
    }

    async fn reconcile_cluster(&self) -> Result<Outcome> {
        self.clusters.reconcile("default", CLUSTER).await
    }

    async fn reconcile_machine(&self) -> Result<Outcome> {
        self.machines.reconcile("default", MACHINE).await
    }

    /// Id of the instance recorded in `spec.providerID`.
    fn instance_id(&self) -> String {
        self.store
            .metal_machine(MACHINE)
            .unwrap()
            .instance_id()
            .unwrap()
            .unwrap()
    }

    /// Mark the CAPI machine's node as joined.
    fn join_node(&self) {
        let mut machine = capi_machine(MACHINE, CLUSTER, MACHINE, Some(BOOTSTRAP_SECRET));
        machine.status.as_mut().unwrap().node_ref = Some(crate::crds::ObjectReference {
            api_version: Some("v1".into()),
            kind: Some("Node".into()),
            name: MACHINE.into(),
            namespace: None,
        });
        self.store.insert_machine(machine);
    }

    /// Drive `worker-0` to ready: create, run, attach, join.
    async fn ready_machine(&self) {
        assert_eq!(self.reconcile_machine().await.unwrap(), Outcome::Pending);
        self.provider
            .set_instance_status(&self.instance_id(), metal::InstanceStatus::Running);
        assert_eq!(self.reconcile_machine().await.unwrap(), Outcome::Pending);
        assert_eq!(self.reconcile_machine().await.unwrap(), Outcome::Pending);
        self.join_node();
        assert_eq!(self.reconcile_machine().await.unwrap(), Outcome::Done);
    }
}

/// Store-backed reconcilers over an arbitrary provider, for strict mocks.
fn reconcilers_with(
    store: Arc<FakeStore>,
    provider: Arc<dyn ComputeProvider>,
) -> (ClusterReconciler, MachineReconciler) {
    let ctx = Arc::new(Context::new(store, provider));
    (ClusterReconciler::new(ctx.clone()), MachineReconciler::new(ctx))
}
