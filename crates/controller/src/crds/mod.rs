pub mod capi;
pub mod metalcluster;
pub mod metalmachine;

pub use capi::{
    Bootstrap, Cluster, ClusterSpec, ClusterStatus, Machine, MachineSpec, MachineStatus,
    ObjectReference,
};
pub use metalcluster::*;
pub use metalmachine::*;

use kube::api::ObjectMeta;

/// API group of the Cluster API core kinds.
pub const CAPI_GROUP: &str = "cluster.x-k8s.io";

/// API group of the infrastructure kinds served by this controller.
pub const INFRASTRUCTURE_GROUP: &str = "infrastructure.cluster.x-k8s.io";

/// Name of the Cluster API owner of the given kind, if any.
pub(crate) fn capi_owner_name(meta: &ObjectMeta, kind: &str) -> Option<String> {
    meta.owner_references
        .as_ref()?
        .iter()
        .find(|owner| {
            owner.kind == kind
                && owner
                    .api_version
                    .split('/')
                    .next()
                    .is_some_and(|group| group == CAPI_GROUP)
        })
        .map(|owner| owner.name.clone())
}
