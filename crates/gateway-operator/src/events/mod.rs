//! Change events and the loop that batches them

mod event_loop;
mod first_batch;

pub use event_loop::{EventHandler, EventLoop, EventLoopError};
pub use first_batch::{FirstEventBatchPreparer, StoreBatchPreparer};

use crate::kinds::{NamespacedName, Resource, ResourceKind};

#[derive(Clone, Debug)]
pub enum Event {
    /// An object was created or changed
    Upsert(Resource),
    /// An object is gone; only its identity remains
    Delete {
        kind: ResourceKind,
        nsname: NamespacedName,
    },
}

impl Event {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Event::Upsert(resource) => resource.kind(),
            Event::Delete { kind, .. } => *kind,
        }
    }

    pub fn nsname(&self) -> NamespacedName {
        match self {
            Event::Upsert(resource) => resource.nsname(),
            Event::Delete { nsname, .. } => nsname.clone(),
        }
    }
}

/// Events gathered between two handler invocations, in arrival order
pub type EventBatch = Vec<Event>;
