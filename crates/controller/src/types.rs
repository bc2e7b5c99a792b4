use std::sync::Arc;
use std::time::Duration;

use metal::{ComputeProvider, ProviderError};
use thiserror::Error;

use crate::store::ObjectStore;

/// Finalizer held on every `MetalCluster` until its provider resources are gone.
pub const CLUSTER_FINALIZER: &str = "metalcluster.infrastructure.cluster.x-k8s.io";

/// Finalizer held on every `MetalMachine` until its instance is gone.
pub const MACHINE_FINALIZER: &str = "metalmachine.infrastructure.cluster.x-k8s.io";

/// Label Cluster API puts on every object that belongs to a cluster.
pub const CLUSTER_NAME_LABEL: &str = "cluster.x-k8s.io/cluster-name";

/// Annotation that pauses reconciliation of a single object.
pub const PAUSED_ANNOTATION: &str = "cluster.x-k8s.io/paused";

/// Setting this annotation to a new token reinstalls the machine once.
pub const REINSTALL_ANNOTATION: &str = "metal.infrastructure.cluster.x-k8s.io/reinstall";

/// Setting this annotation to a new token boots the machine into rescue once.
pub const RESCUE_ANNOTATION: &str = "metal.infrastructure.cluster.x-k8s.io/rescue";

/// Prefix of provider-side tags that mark resources owned by a cluster.
pub const OWNED_TAG_PREFIX: &str = "metal.cluster.x-k8s.io/cluster-";

/// Value of the ownership tag.
pub const OWNED_TAG_VALUE: &str = "owned";

/// Provider-side tag carrying the UID of the `MetalMachine` that created an instance.
pub const MACHINE_UID_TAG: &str = "metal.cluster.x-k8s.io/machine-uid";

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Provider error: {0}")]
    ProviderError(#[from] ProviderError),

    #[error("Object changed since it was read: {0}")]
    Conflict(String),

    #[error("Missing object key")]
    MissingObjectKey,

    #[error("Invariant violated: {0}")]
    Invariant(String),

    #[error("Reconcile did not finish within {0:?}")]
    Timeout(Duration),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Shared handles every reconciler works through.
#[derive(Clone)]
pub struct Context {
    pub store: Arc<dyn ObjectStore>,
    pub provider: Arc<dyn ComputeProvider>,
}

impl Context {
    pub fn new(store: Arc<dyn ObjectStore>, provider: Arc<dyn ComputeProvider>) -> Self {
        Self { store, provider }
    }
}

/// Tag key that marks provider resources as owned by the given cluster.
pub fn owned_tag_key(cluster_name: &str) -> String {
    format!("{OWNED_TAG_PREFIX}{cluster_name}")
}
