//! In-memory view of the watched cluster objects

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::events::Event;
use crate::kinds::{KindObject, NamespacedName, Resource, ResourceKind};

/// Latest known version of every watched object
#[derive(Clone, Debug, Default)]
pub struct ClusterState {
    objects: HashMap<ResourceKind, BTreeMap<NamespacedName, Resource>>,
}

impl ClusterState {
    /// Store an object, returning the version it replaced
    pub fn upsert(&mut self, resource: Resource) -> Option<Resource> {
        self.objects
            .entry(resource.kind())
            .or_default()
            .insert(resource.nsname(), resource)
    }

    pub fn remove(&mut self, kind: ResourceKind, nsname: &NamespacedName) -> Option<Resource> {
        self.objects.get_mut(&kind)?.remove(nsname)
    }

    pub fn get(&self, kind: ResourceKind, nsname: &NamespacedName) -> Option<&Resource> {
        self.objects.get(&kind)?.get(nsname)
    }

    /// All stored objects of one kind, ordered by namespace and name
    pub fn objects<K: KindObject>(&self) -> impl Iterator<Item = &K> + '_ {
        self.objects
            .get(&K::KIND)
            .into_iter()
            .flat_map(|m| m.values())
            .filter_map(K::from_resource)
    }

    pub fn len(&self) -> usize {
        self.objects.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Applies events to a [`ClusterState`] and tracks whether anything changed
#[derive(Debug, Default)]
pub struct ChangeProcessor {
    state: ClusterState,
    changed: bool,
}

impl ChangeProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn capture(&mut self, event: &Event) {
        match event {
            Event::Upsert(resource) => self.capture_upsert(resource.clone()),
            Event::Delete { kind, nsname } => self.capture_delete(*kind, nsname),
        }
    }

    /// Record an object; it counts as a change unless the stored copy is the same revision
    pub fn capture_upsert(&mut self, resource: Resource) {
        let kind = resource.kind();
        let nsname = resource.nsname();
        let changed = match self.state.get(kind, &nsname) {
            None => true,
            Some(prev) => is_new_revision(prev, &resource),
        };

        if changed {
            debug!(kind = %kind, object = %nsname, "Captured change");
        }
        self.changed |= changed;
        self.state.upsert(resource);
    }

    /// Forget an object; it counts as a change only if it was known
    pub fn capture_delete(&mut self, kind: ResourceKind, nsname: &NamespacedName) {
        if self.state.remove(kind, nsname).is_some() {
            debug!(kind = %kind, object = %nsname, "Captured deletion");
            self.changed = true;
        }
    }

    /// The current view if anything changed since the last call
    pub fn process(&mut self) -> Option<&ClusterState> {
        if !std::mem::take(&mut self.changed) {
            return None;
        }
        Some(&self.state)
    }

    pub fn state(&self) -> &ClusterState {
        &self.state
    }
}

fn is_new_revision(prev: &Resource, cur: &Resource) -> bool {
    match (prev.generation(), cur.generation()) {
        (Some(p), Some(c)) => p != c,
        _ => prev.resource_version() != cur.resource_version(),
    }
}
