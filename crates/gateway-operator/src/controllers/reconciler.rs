//! Per-kind reconciler that turns watch notifications into upsert and delete events

use std::marker::PhantomData;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::filter::NamespacedNameFilter;
use crate::events::Event;
use crate::kinds::{KindObject, NamespacedName, ResourceKind};
use crate::store::{ObjectStore, StoreError};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("failed to get {kind} {nsname}: {source}")]
    Get {
        kind: ResourceKind,
        nsname: NamespacedName,
        #[source]
        source: StoreError,
    },
}

/// Turns watch notifications for one kind into events
///
/// Every notification fetches the latest object: a present object becomes an
/// upsert and a missing one becomes a delete.
pub struct Reconciler<K> {
    store: Arc<dyn ObjectStore>,
    events: mpsc::Sender<Event>,
    filter: Option<NamespacedNameFilter>,
    _kind: PhantomData<fn() -> K>,
}

impl<K: KindObject> Reconciler<K> {
    pub fn new(store: Arc<dyn ObjectStore>, events: mpsc::Sender<Event>) -> Self {
        Self {
            store,
            events,
            filter: None,
            _kind: PhantomData,
        }
    }

    pub fn with_filter(mut self, filter: NamespacedNameFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Process one notification
    ///
    /// Fetch failures other than not-found are returned for the caller to
    /// retry. Cancellation while sending drops the event without error.
    #[instrument(skip(self, token), fields(kind = %K::KIND, object = %nsname))]
    pub async fn reconcile(
        &self,
        token: &CancellationToken,
        nsname: &NamespacedName,
    ) -> Result<(), ReconcileError> {
        if let Some(filter) = &self.filter {
            let (allow, reason) = filter(nsname);
            if !allow {
                info!(reason, "Skipping resource");
                return Ok(());
            }
        }

        let event = match self.store.get(K::KIND, nsname).await {
            Ok(resource) => Event::Upsert(resource),
            Err(e) if e.is_not_found() => Event::Delete {
                kind: K::KIND,
                nsname: nsname.clone(),
            },
            Err(e) => {
                warn!(error = %e, "Failed to get the resource");
                return Err(ReconcileError::Get {
                    kind: K::KIND,
                    nsname: nsname.clone(),
                    source: e,
                });
            }
        };
        let op = match event {
            Event::Upsert(_) => "Upserted",
            Event::Delete { .. } => "Deleted",
        };

        tokio::select! {
            _ = token.cancelled() => {
                info!("Did not process the resource because the token was cancelled");
                return Ok(());
            }
            sent = self.events.send(event) => {
                if sent.is_err() {
                    debug!("Event channel closed, dropping event");
                    return Ok(());
                }
            }
        }

        debug!("{op} the resource");
        Ok(())
    }
}
