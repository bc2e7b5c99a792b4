//! Reconcilers for the infrastructure kinds.
//!
//! A reconciler is handed a namespace and name, re-reads everything it needs
//! and drives the provider one step closer to the desired state. What the
//! scheduler should do next is expressed through [`Outcome`].

mod cluster;
mod machine;

#[cfg(test)]
mod tests;

pub use cluster::ClusterReconciler;
pub use machine::MachineReconciler;

use async_trait::async_trait;
use kube::{Resource, ResourceExt};

use crate::crds::Cluster;
use crate::types::{Result, PAUSED_ANNOTATION};

/// Result of a successful reconcile, mapped to a requeue policy by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Converged; revisit after the resync interval.
    Done,
    /// Waiting on a dependency or the provider; revisit after the requeue interval.
    Pending,
    /// Nothing to do until the object or a related object changes.
    AwaitChange,
}

#[async_trait]
pub trait Reconciler: Send + Sync {
    async fn reconcile(&self, namespace: &str, name: &str) -> Result<Outcome>;
}

/// Lifecycle branch of an object with respect to a finalizer.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum FinalizerEvent {
    /// Finalizer missing on a live object.
    Add,
    /// Live object with the finalizer.
    Apply,
    /// Object being deleted while still holding the finalizer.
    Cleanup,
    /// Object being deleted and already released.
    Released,
}

pub(crate) fn finalizer_event<K: Resource>(obj: &K, finalizer: &str) -> FinalizerEvent {
    let held = obj.finalizers().iter().any(|f| f == finalizer);
    let deleting = obj.meta().deletion_timestamp.is_some();
    match (deleting, held) {
        (false, false) => FinalizerEvent::Add,
        (false, true) => FinalizerEvent::Apply,
        (true, true) => FinalizerEvent::Cleanup,
        (true, false) => FinalizerEvent::Released,
    }
}

pub(crate) fn with_finalizer<K: Resource + Clone>(obj: &K, finalizer: &str) -> K {
    let mut updated = obj.clone();
    let finalizers = updated.meta_mut().finalizers.get_or_insert_with(Vec::new);
    if !finalizers.iter().any(|f| f == finalizer) {
        finalizers.push(finalizer.to_string());
    }
    updated
}

pub(crate) fn without_finalizer<K: Resource + Clone>(obj: &K, finalizer: &str) -> K {
    let mut updated = obj.clone();
    if let Some(finalizers) = updated.meta_mut().finalizers.as_mut() {
        finalizers.retain(|f| f != finalizer);
    }
    updated
}

/// Paused through the owning cluster or the object's own annotation.
pub(crate) fn is_paused<K: Resource>(obj: &K, cluster: &Cluster) -> bool {
    cluster.spec.paused || obj.annotations().contains_key(PAUSED_ANNOTATION)
}
