use std::collections::HashMap;
use std::sync::Arc;

use super::ResourceKind;
use crate::reconcilers::Reconciler;

/// Kind to reconciler table, built once at start-up and handed to the scheduler.
#[derive(Default, Clone)]
pub struct Registry {
    reconcilers: HashMap<ResourceKind, Arc<dyn Reconciler>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn register(mut self, kind: ResourceKind, reconciler: Arc<dyn Reconciler>) -> Self {
        self.reconcilers.insert(kind, reconciler);
        self
    }

    pub fn get(&self, kind: ResourceKind) -> Option<Arc<dyn Reconciler>> {
        self.reconcilers.get(&kind).cloned()
    }

    pub fn kinds(&self) -> impl Iterator<Item = ResourceKind> + '_ {
        self.reconcilers.keys().copied()
    }
}
