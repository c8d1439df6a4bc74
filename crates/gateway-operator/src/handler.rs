//! Batch handler: cluster view, graph, data plane, then statuses
//!
//! Each batch is folded into the [`ChangeProcessor`]. When the view changed,
//! a new graph is built and applied, and the resulting statuses are submitted
//! to the group updater as the `all-graphs` group. The controller's own
//! NginxGateway configuration bypasses the graph and is reported under the
//! `nginx-gateway` group.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::api::NginxGateway;
use crate::events::{Event, EventBatch, EventHandler};
use crate::graph::{DataPlaneApplier, Graph, GraphBuilder, ReloadError};
use crate::health::HealthState;
use crate::kinds::{NamespacedName, Resource, ResourceKind};
use crate::logging::{LogLevelSetter, DEFAULT_LOG_LEVEL};
use crate::state::ChangeProcessor;
use crate::status::conditions;
use crate::status::prepare::{
    prepare_gateway_requests, prepare_nginx_gateway_request, prepare_requests,
};
use crate::status::{Clock, LeaderAwareGroupUpdater, Queue, QueueObject};

pub const ALL_GRAPHS_GROUP: &str = "all-graphs";
pub const NGINX_GATEWAY_GROUP: &str = "nginx-gateway";

/// Group name for statuses reported by the data plane for one gateway
pub fn gateway_group(gateway: &NamespacedName) -> String {
    format!("gateway:{gateway}")
}

#[derive(Debug, Clone)]
pub struct HandlerConfig {
    pub controller_name: String,
    pub update_gateway_class_status: bool,
}

pub struct EventHandlerImpl {
    config: HandlerConfig,
    processor: Mutex<ChangeProcessor>,
    builder: Arc<dyn GraphBuilder>,
    applier: Arc<dyn DataPlaneApplier>,
    status_updater: Arc<LeaderAwareGroupUpdater>,
    clock: Arc<dyn Clock>,
    health: Arc<HealthState>,
    deployments: Arc<Queue<QueueObject>>,
    log_level: Option<Arc<dyn LogLevelSetter>>,
    latest_graph: Mutex<Option<Arc<Graph>>>,
}

impl EventHandlerImpl {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: HandlerConfig,
        builder: Arc<dyn GraphBuilder>,
        applier: Arc<dyn DataPlaneApplier>,
        status_updater: Arc<LeaderAwareGroupUpdater>,
        clock: Arc<dyn Clock>,
        health: Arc<HealthState>,
        deployments: Arc<Queue<QueueObject>>,
    ) -> Self {
        Self {
            config,
            processor: Mutex::new(ChangeProcessor::new()),
            builder,
            applier,
            status_updater,
            clock,
            health,
            deployments,
            log_level: None,
            latest_graph: Mutex::new(None),
        }
    }

    pub fn with_log_level(mut self, log_level: Arc<dyn LogLevelSetter>) -> Self {
        self.log_level = Some(log_level);
        self
    }

    /// The graph built by the last batch that changed anything
    pub fn latest_graph(&self) -> Option<Arc<Graph>> {
        self.latest_graph.lock().clone()
    }

    /// Fold the batch into the processor, returning the control-config events
    fn capture(&self, batch: &EventBatch) -> Vec<Option<NginxGateway>> {
        let mut control = Vec::new();
        let mut processor = self.processor.lock();

        for event in batch {
            match event {
                Event::Upsert(Resource::NginxGateway(config)) => control.push(Some(config.clone())),
                Event::Delete {
                    kind: ResourceKind::NginxGateway,
                    ..
                } => control.push(None),
                other => processor.capture(other),
            }
        }

        control
    }

    /// Build a graph if the view changed since the last batch
    fn build_graph(&self) -> Option<Arc<Graph>> {
        let mut processor = self.processor.lock();
        let state = processor.process()?;
        Some(Arc::new(self.builder.build(state)))
    }

    async fn update_control_plane(&self, token: &CancellationToken, config: Option<NginxGateway>) {
        let Some(config) = config else {
            error!("NginxGateway configuration was deleted; using defaults");
            if let Err(e) = self.set_log_level(DEFAULT_LOG_LEVEL) {
                warn!(error = %e, "Failed to reset log level");
            }
            self.status_updater
                .update_group(token, NGINX_GATEWAY_GROUP, Vec::new())
                .await;
            return;
        };

        let level = config
            .spec
            .logging
            .as_ref()
            .and_then(|l| l.level.as_deref())
            .unwrap_or(DEFAULT_LOG_LEVEL);

        let condition = match config
            .spec
            .validate()
            .and_then(|()| self.set_log_level(level))
        {
            Ok(()) => {
                info!(level, "Updated control plane configuration");
                conditions::nginx_gateway_valid()
            }
            Err(e) => {
                let msg = "Failed to update control plane configuration";
                error!(error = %e, "{msg}");
                conditions::nginx_gateway_invalid(format!("{msg}: {e}"))
            }
        };

        let request = prepare_nginx_gateway_request(&config, condition, &self.clock.timestamp());
        self.status_updater
            .update_group(token, NGINX_GATEWAY_GROUP, vec![request])
            .await;
    }

    fn set_log_level(&self, level: &str) -> Result<(), String> {
        match &self.log_level {
            Some(setter) => setter.set_level(level),
            None => Ok(()),
        }
    }

    /// Write gateway statuses reported by the data plane until cancelled
    pub async fn run_status_queue(&self, token: CancellationToken) {
        info!("Starting deployment status consumer");
        while let Some(object) = self.deployments.dequeue(&token).await {
            self.write_deployment_status(&token, object).await;
        }
        info!("Deployment status consumer stopped");
    }

    async fn write_deployment_status(&self, token: &CancellationToken, object: QueueObject) {
        let Some(graph) = self.latest_graph() else {
            debug!(gateway = %object.gateway, "No graph built yet, dropping deployment status");
            return;
        };
        let Some(gateway) = graph.gateway(&object.gateway) else {
            debug!(
                gateway = %object.gateway,
                "Gateway not in the latest graph, dropping deployment status"
            );
            return;
        };

        let reload_error = object.error.map(ReloadError);
        if let Some(e) = &reload_error {
            warn!(gateway = %object.gateway, error = %e, "Data plane reported a failure");
        }

        let requests = prepare_gateway_requests(
            std::slice::from_ref(gateway),
            &[],
            &self.clock.timestamp(),
            reload_error.as_ref(),
        );
        self.status_updater
            .update_group(token, &gateway_group(&object.gateway), requests)
            .await;
    }
}

#[async_trait]
impl EventHandler for EventHandlerImpl {
    #[instrument(skip_all, fields(events = batch.len()))]
    async fn handle_event_batch(&self, token: &CancellationToken, batch: &EventBatch) {
        for config in self.capture(batch) {
            self.update_control_plane(token, config).await;
        }

        let Some(graph) = self.build_graph() else {
            info!("Handling events didn't result in configuration changes");
            self.health.mark_synced();
            return;
        };

        let reload_error = match self.applier.apply(&graph).await {
            Ok(()) => {
                info!(version = graph.version, "Configuration was successfully applied");
                None
            }
            Err(e) => {
                error!(version = graph.version, error = %e, "Failed to apply configuration");
                Some(e)
            }
        };

        *self.latest_graph.lock() = Some(graph.clone());

        let requests = prepare_requests(
            &graph.statuses,
            &self.config.controller_name,
            &self.clock.timestamp(),
            reload_error.as_ref(),
            self.config.update_gateway_class_status,
        );
        self.status_updater
            .update_group(token, ALL_GRAPHS_GROUP, requests)
            .await;

        self.health.mark_synced();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::nginx::Logging;
    use crate::api::{Gateway, GatewaySpec, GatewayStatus, NginxGatewaySpec};
    use crate::graph::{GraphGateway, GraphStatuses, MockDataPlaneApplier, MockGraphBuilder};
    use crate::kinds::KindObject;
    use crate::logging::MockLogLevelSetter;
    use crate::status::{FakeClock, Updater};
    use crate::store::{MockObjectStore, StoreError};
    use chrono::{TimeZone, Utc};

    const CONTROLLER: &str = "gateway.nginx.org/nginx-gateway-controller";

    fn gateway() -> Resource {
        let mut gw = Gateway::new("gw", GatewaySpec::default());
        gw.metadata.namespace = Some("default".to_string());
        gw.metadata.generation = Some(1);
        gw.into_resource()
    }

    fn control_config(level: Option<&str>) -> NginxGateway {
        let mut config = NginxGateway::new(
            "config",
            NginxGatewaySpec {
                logging: Some(Logging {
                    level: level.map(str::to_string),
                }),
            },
        );
        config.metadata.namespace = Some("nginx-gateway".to_string());
        config.metadata.generation = Some(1);
        config
    }

    fn graph() -> Graph {
        Graph {
            version: 1,
            statuses: GraphStatuses {
                gateways: vec![GraphGateway {
                    nsname: NamespacedName::new("default", "gw"),
                    generation: 1,
                    ..Default::default()
                }],
                ..Default::default()
            },
        }
    }

    /// Store that serves `objects` and records every status write
    fn recording_store(
        objects: Vec<Resource>,
        written: Arc<Mutex<Vec<Resource>>>,
    ) -> MockObjectStore {
        let mut store = MockObjectStore::new();
        store.expect_get().returning(move |kind, nsname| {
            objects
                .iter()
                .find(|o| o.kind() == kind && &o.nsname() == nsname)
                .cloned()
                .ok_or_else(|| StoreError::NotFound {
                    kind,
                    nsname: nsname.clone(),
                })
        });
        store.expect_update_status().returning(move |resource| {
            written.lock().push(resource.clone());
            Ok(())
        });
        store
    }

    struct Fixture {
        handler: EventHandlerImpl,
        group: Arc<LeaderAwareGroupUpdater>,
        health: Arc<HealthState>,
        deployments: Arc<Queue<QueueObject>>,
        written: Arc<Mutex<Vec<Resource>>>,
    }

    fn fixture(
        builder: MockGraphBuilder,
        applier: MockDataPlaneApplier,
        objects: Vec<Resource>,
    ) -> Fixture {
        let written = Arc::new(Mutex::new(Vec::new()));
        let store = recording_store(objects, written.clone());
        let group = Arc::new(LeaderAwareGroupUpdater::new(Updater::new(Arc::new(store))));
        let health = Arc::new(HealthState::new());
        let deployments = Arc::new(Queue::new());
        let clock = Arc::new(FakeClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));

        let handler = EventHandlerImpl::new(
            HandlerConfig {
                controller_name: CONTROLLER.to_string(),
                update_gateway_class_status: true,
            },
            Arc::new(builder),
            Arc::new(applier),
            group.clone(),
            clock,
            health.clone(),
            deployments.clone(),
        );

        Fixture {
            handler,
            group,
            health,
            deployments,
            written,
        }
    }

    fn gateway_status(resource: &Resource) -> GatewayStatus {
        match resource {
            Resource::Gateway(gw) => gw.status.clone().unwrap(),
            other => panic!("expected gateway, got {:?}", other.kind()),
        }
    }

    fn programmed(status: &GatewayStatus) -> &str {
        &status
            .conditions
            .iter()
            .find(|c| c.type_ == "Programmed")
            .unwrap()
            .status
    }

    #[tokio::test]
    async fn test_changed_batch_builds_applies_and_writes() {
        let mut builder = MockGraphBuilder::new();
        builder.expect_build().times(1).returning(|_| graph());
        let mut applier = MockDataPlaneApplier::new();
        applier.expect_apply().times(1).returning(|_| Ok(()));

        let f = fixture(builder, applier, vec![gateway()]);
        let token = CancellationToken::new();
        f.group.enable(&token).await.unwrap();

        f.handler
            .handle_event_batch(&token, &vec![Event::Upsert(gateway())])
            .await;

        let written = f.written.lock().clone();
        assert_eq!(written.len(), 1);
        let status = gateway_status(&written[0]);
        assert_eq!(programmed(&status), "True");
        assert_eq!(
            status.conditions[0].last_transition_time,
            "2024-01-01T00:00:00Z"
        );
        assert!(f.health.is_synced());
        assert_eq!(f.handler.latest_graph().unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_unchanged_batch_skips_graph() {
        let mut builder = MockGraphBuilder::new();
        builder.expect_build().times(1).returning(|_| graph());
        let mut applier = MockDataPlaneApplier::new();
        applier.expect_apply().times(1).returning(|_| Ok(()));

        let f = fixture(builder, applier, vec![gateway()]);
        let token = CancellationToken::new();

        f.handler
            .handle_event_batch(&token, &vec![Event::Upsert(gateway())])
            .await;
        // Same generation again: no change
        f.handler
            .handle_event_batch(&token, &vec![Event::Upsert(gateway())])
            .await;
    }

    #[tokio::test]
    async fn test_reload_failure_reported_in_status() {
        let mut builder = MockGraphBuilder::new();
        builder.expect_build().returning(|_| graph());
        let mut applier = MockDataPlaneApplier::new();
        applier
            .expect_apply()
            .returning(|_| Err(ReloadError("nginx reload failed".to_string())));

        let f = fixture(builder, applier, vec![gateway()]);
        let token = CancellationToken::new();
        f.group.enable(&token).await.unwrap();

        f.handler
            .handle_event_batch(&token, &vec![Event::Upsert(gateway())])
            .await;

        let written = f.written.lock().clone();
        assert_eq!(programmed(&gateway_status(&written[0])), "False");
    }

    #[tokio::test]
    async fn test_statuses_buffered_until_enabled() {
        let mut builder = MockGraphBuilder::new();
        builder.expect_build().returning(|_| graph());
        let mut applier = MockDataPlaneApplier::new();
        applier.expect_apply().returning(|_| Ok(()));

        let f = fixture(builder, applier, vec![gateway()]);
        let token = CancellationToken::new();

        f.handler
            .handle_event_batch(&token, &vec![Event::Upsert(gateway())])
            .await;
        assert!(f.written.lock().is_empty());
        assert!(f.health.is_synced());

        f.group.enable(&token).await.unwrap();
        assert_eq!(f.written.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_control_config_valid() {
        let mut builder = MockGraphBuilder::new();
        builder.expect_build().never();
        let mut log_level = MockLogLevelSetter::new();
        log_level
            .expect_set_level()
            .withf(|level| level == "debug")
            .times(1)
            .returning(|_| Ok(()));

        let config = control_config(Some("debug"));
        let f = fixture(
            builder,
            MockDataPlaneApplier::new(),
            vec![config.clone().into_resource()],
        );
        let handler = f.handler.with_log_level(Arc::new(log_level));
        let token = CancellationToken::new();
        f.group.enable(&token).await.unwrap();

        handler
            .handle_event_batch(&token, &vec![Event::Upsert(config.into_resource())])
            .await;

        let written = f.written.lock().clone();
        assert_eq!(written.len(), 1);
        let Resource::NginxGateway(config) = &written[0] else {
            panic!("expected NginxGateway");
        };
        let conds = &config.status.as_ref().unwrap().conditions;
        assert_eq!(conds[0].type_, "Valid");
        assert_eq!(conds[0].status, "True");
    }

    #[tokio::test]
    async fn test_control_config_invalid_level() {
        let config = control_config(Some("verbose"));
        let f = fixture(
            MockGraphBuilder::new(),
            MockDataPlaneApplier::new(),
            vec![config.clone().into_resource()],
        );
        let token = CancellationToken::new();
        f.group.enable(&token).await.unwrap();

        f.handler
            .handle_event_batch(&token, &vec![Event::Upsert(config.into_resource())])
            .await;

        let written = f.written.lock().clone();
        let Resource::NginxGateway(config) = &written[0] else {
            panic!("expected NginxGateway");
        };
        let cond = &config.status.as_ref().unwrap().conditions[0];
        assert_eq!(cond.status, "False");
        assert_eq!(cond.reason, "Invalid");
        assert!(cond
            .message
            .starts_with("Failed to update control plane configuration: "));
    }

    #[tokio::test]
    async fn test_control_config_delete_clears_buffered_group() {
        let config = control_config(None);
        let f = fixture(
            MockGraphBuilder::new(),
            MockDataPlaneApplier::new(),
            vec![config.clone().into_resource()],
        );
        let token = CancellationToken::new();

        f.handler
            .handle_event_batch(&token, &vec![Event::Upsert(config.into_resource())])
            .await;
        f.handler
            .handle_event_batch(
                &token,
                &vec![Event::Delete {
                    kind: ResourceKind::NginxGateway,
                    nsname: NamespacedName::new("nginx-gateway", "config"),
                }],
            )
            .await;

        f.group.enable(&token).await.unwrap();
        assert!(f.written.lock().is_empty());
    }

    #[tokio::test]
    async fn test_status_queue_writes_reported_error() {
        let mut builder = MockGraphBuilder::new();
        builder.expect_build().returning(|_| graph());
        let mut applier = MockDataPlaneApplier::new();
        applier.expect_apply().returning(|_| Ok(()));

        let f = fixture(builder, applier, vec![gateway()]);
        let token = CancellationToken::new();

        f.handler
            .handle_event_batch(&token, &vec![Event::Upsert(gateway())])
            .await;
        f.group.enable(&token).await.unwrap();
        assert_eq!(f.written.lock().len(), 1);

        f.deployments.enqueue(QueueObject {
            gateway: NamespacedName::new("default", "gw"),
            error: Some("data plane rejected configuration".to_string()),
        });
        // Unknown gateways are dropped
        f.deployments.enqueue(QueueObject {
            gateway: NamespacedName::new("default", "missing"),
            error: None,
        });

        let consumer_token = token.clone();
        let consumer = async {
            f.handler.run_status_queue(consumer_token).await;
        };
        let stopper = async {
            tokio::time::timeout(std::time::Duration::from_secs(5), async {
                while !f.deployments.is_empty() {
                    tokio::task::yield_now().await;
                }
            })
            .await
            .unwrap();
            // Let the consumer finish the last write
            for _ in 0..10 {
                tokio::task::yield_now().await;
            }
            token.cancel();
        };
        tokio::join!(consumer, stopper);

        let written = f.written.lock().clone();
        assert_eq!(written.len(), 2);
        assert_eq!(programmed(&gateway_status(&written[1])), "False");
    }

    #[test]
    fn test_gateway_group_name() {
        assert_eq!(
            gateway_group(&NamespacedName::new("default", "gw")),
            "gateway:default/gw"
        );
    }
}
