//! Builds the initial batch from a full read of the cluster

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{Event, EventBatch};
use crate::kinds::{NamespacedName, ResourceKind};
use crate::store::{ObjectStore, StoreError};

/// Produces the batch the event loop handles before any watch events
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FirstEventBatchPreparer: Send + Sync {
    async fn prepare(&self) -> Result<EventBatch, StoreError>;
}

/// Lists whole kinds and fetches individual objects from the store
pub struct StoreBatchPreparer {
    store: Arc<dyn ObjectStore>,
    kinds: Vec<ResourceKind>,
    objects: Vec<(ResourceKind, NamespacedName)>,
}

impl StoreBatchPreparer {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        kinds: Vec<ResourceKind>,
        objects: Vec<(ResourceKind, NamespacedName)>,
    ) -> Self {
        Self {
            store,
            kinds,
            objects,
        }
    }
}

#[async_trait]
impl FirstEventBatchPreparer for StoreBatchPreparer {
    async fn prepare(&self) -> Result<EventBatch, StoreError> {
        let mut batch = EventBatch::new();

        for (kind, nsname) in &self.objects {
            match self.store.get(*kind, nsname).await {
                Ok(resource) => batch.push(Event::Upsert(resource)),
                Err(e) if e.is_not_found() => {
                    debug!(
                        kind = %kind,
                        object = %nsname,
                        "Object not found, not adding to first batch"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        for kind in &self.kinds {
            let objects = self.store.list(*kind).await?;
            debug!(kind = %kind, count = objects.len(), "Listed objects for first batch");
            batch.extend(objects.into_iter().map(Event::Upsert));
        }

        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{Gateway, GatewaySpec, NginxGateway, NginxGatewaySpec};
    use crate::kinds::{KindObject, Resource};
    use crate::store::MockObjectStore;
    use mockall::predicate::eq;

    fn gateway(name: &str) -> Resource {
        let mut gw = Gateway::new(name, GatewaySpec::default());
        gw.metadata.namespace = Some("default".to_string());
        gw.into_resource()
    }

    #[tokio::test]
    async fn test_prepare_lists_kinds_and_fetches_objects() {
        let config = NamespacedName::new("nginx-gateway", "config");
        let mut store = MockObjectStore::new();
        store
            .expect_get()
            .with(eq(ResourceKind::NginxGateway), eq(config.clone()))
            .times(1)
            .returning(|_, _| {
                let mut ng = NginxGateway::new("config", NginxGatewaySpec::default());
                ng.metadata.namespace = Some("nginx-gateway".to_string());
                Ok(ng.into_resource())
            });
        store
            .expect_list()
            .with(eq(ResourceKind::Gateway))
            .times(1)
            .returning(|_| Ok(vec![gateway("a"), gateway("b")]));

        let preparer = StoreBatchPreparer::new(
            Arc::new(store),
            vec![ResourceKind::Gateway],
            vec![(ResourceKind::NginxGateway, config)],
        );

        let batch = preparer.prepare().await.unwrap();

        let kinds: Vec<ResourceKind> = batch.iter().map(Event::kind).collect();
        assert_eq!(
            kinds,
            vec![
                ResourceKind::NginxGateway,
                ResourceKind::Gateway,
                ResourceKind::Gateway
            ]
        );
    }

    #[tokio::test]
    async fn test_prepare_skips_missing_object() {
        let mut store = MockObjectStore::new();
        store.expect_get().times(1).returning(|kind, nsname| {
            Err(StoreError::NotFound {
                kind,
                nsname: nsname.clone(),
            })
        });

        let preparer = StoreBatchPreparer::new(
            Arc::new(store),
            vec![],
            vec![(
                ResourceKind::NginxGateway,
                NamespacedName::new("nginx-gateway", "config"),
            )],
        );

        assert!(preparer.prepare().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_prepare_propagates_list_failure() {
        let mut store = MockObjectStore::new();
        store
            .expect_list()
            .times(1)
            .returning(|kind| Err(StoreError::NoStatus(kind)));

        let preparer = StoreBatchPreparer::new(Arc::new(store), vec![ResourceKind::Secret], vec![]);

        assert!(preparer.prepare().await.is_err());
    }
}
