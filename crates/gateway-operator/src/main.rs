use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use k8s_openapi::api::core::v1::{Namespace, Secret, Service};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Api, Client};
use tokio::select;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use gateway_operator::api::{
    ClientSettingsPolicy, Gateway, GatewayClass, GrpcRoute, HttpRoute, NginxGateway,
    ObservabilityPolicy,
};
use gateway_operator::controllers::{
    self, single_object_filter, ControllerContext, NamespacedNameFilter, Reconciler,
};
use gateway_operator::events::{Event, EventLoop, StoreBatchPreparer};
use gateway_operator::graph::{AttachmentGraphBuilder, LoggingApplier};
use gateway_operator::handler::{EventHandlerImpl, HandlerConfig};
use gateway_operator::health::{run_health_server, HealthState};
use gateway_operator::kinds::{KindObject, ResourceKind};
use gateway_operator::leader::{LeaderElection, LeaderElectionConfig};
use gateway_operator::logging;
use gateway_operator::status::{LeaderAwareGroupUpdater, Queue, SystemClock, Updater};
use gateway_operator::store::{KubeStore, ObjectStore};
use gateway_operator::OperatorConfig;

const SHUTDOWN_GRACE_SECS: u64 = 10;

type TaskResult = (&'static str, Result<()>);

#[tokio::main]
async fn main() -> Result<()> {
    let log_level = logging::init();

    info!("gateway-operator starting");

    let config = OperatorConfig::from_env().context("Invalid operator configuration")?;
    let leader_config =
        LeaderElectionConfig::from_env().context("Invalid leader election configuration")?;

    info!(
        controller_name = %config.controller_name,
        gateway_class = %config.gateway_class_name,
        control_config = ?config.control_config,
        pod_ip = ?config.pod_ip,
        leader_election = leader_config.enabled(),
        "Loaded configuration"
    );

    let kube_client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    info!("Connected to Kubernetes cluster");

    let token = CancellationToken::new();
    let store: Arc<dyn ObjectStore> = Arc::new(KubeStore::new(kube_client.clone()));
    let (events_tx, events_rx) = mpsc::channel(config.event_channel_capacity);
    let deployments = Arc::new(Queue::new());
    let health = Arc::new(HealthState::new());
    let status_updater = Arc::new(LeaderAwareGroupUpdater::new(Updater::new(store.clone())));

    let handler = Arc::new(
        EventHandlerImpl::new(
            HandlerConfig {
                controller_name: config.controller_name.clone(),
                update_gateway_class_status: config.update_gateway_class_status,
            },
            Arc::new(graph_builder(&config)),
            Arc::new(LoggingApplier::new(deployments.clone())),
            status_updater.clone(),
            Arc::new(SystemClock),
            health.clone(),
            deployments,
        )
        .with_log_level(Arc::new(log_level)),
    );

    let first_batch = StoreBatchPreparer::new(
        store.clone(),
        ResourceKind::ALL
            .into_iter()
            .filter(|k| *k != ResourceKind::NginxGateway)
            .collect(),
        config
            .control_config
            .iter()
            .map(|nsname| (ResourceKind::NginxGateway, nsname.clone()))
            .collect(),
    );
    let event_loop =
        EventLoop::new(events_rx, handler.clone()).with_first_batch(Box::new(first_batch));

    let mut tasks = JoinSet::new();

    spawn_controllers(&mut tasks, &kube_client, &config, &store, &events_tx, &token);
    // Controllers hold the only senders; the loop ends when they all stop.
    drop(events_tx);

    spawn_task(&mut tasks, "event loop", {
        let token = token.clone();
        async move { event_loop.run(token).await.context("Event loop failed") }
    });

    spawn_task(&mut tasks, "health server", {
        let token = token.clone();
        let addr = SocketAddr::new(config.health_bind_address, config.health_port);
        async move {
            run_health_server(health, addr, token)
                .await
                .context("Health server failed")
        }
    });

    spawn_task(&mut tasks, "deployment status consumer", {
        let token = token.clone();
        async move {
            handler.run_status_queue(token).await;
            Ok(())
        }
    });

    spawn_task(
        &mut tasks,
        "status leadership",
        run_status_leadership(kube_client, leader_config, status_updater, token.clone()),
    );

    info!("All tasks spawned");

    let mut sigterm = signal(SignalKind::terminate()).context("Failed to setup SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to setup SIGINT handler")?;

    let outcome = select! {
        Some(joined) = tasks.join_next() => handle_task_exit(joined),
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully");
            Ok(())
        }
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully");
            Ok(())
        }
    };

    token.cancel();

    info!(
        grace_seconds = SHUTDOWN_GRACE_SECS,
        "Waiting for tasks to stop"
    );
    let drained = timeout(Duration::from_secs(SHUTDOWN_GRACE_SECS), async {
        while tasks.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!("Tasks did not stop within the grace period");
    }

    info!("Shutdown complete");
    outcome
}

fn graph_builder(config: &OperatorConfig) -> AttachmentGraphBuilder {
    let builder = AttachmentGraphBuilder::new(
        config.controller_name.clone(),
        config.gateway_class_name.clone(),
    );
    match config.pod_ip {
        Some(ip) => builder.with_pod_ip(ip.to_string()),
        None => builder,
    }
}

fn spawn_task<F>(tasks: &mut JoinSet<TaskResult>, name: &'static str, fut: F)
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    tasks.spawn(async move { (name, fut.await) });
}

/// Start one controller per watched kind
fn spawn_controllers(
    tasks: &mut JoinSet<TaskResult>,
    client: &Client,
    config: &OperatorConfig,
    store: &Arc<dyn ObjectStore>,
    events: &mpsc::Sender<Event>,
    token: &CancellationToken,
) {
    let mut spawner = ControllerSpawner {
        tasks,
        store,
        events,
        token,
    };

    spawner.spawn::<GatewayClass>(Api::all(client.clone()), None);
    spawner.spawn::<Gateway>(Api::all(client.clone()), None);
    spawner.spawn::<HttpRoute>(Api::all(client.clone()), None);
    spawner.spawn::<GrpcRoute>(Api::all(client.clone()), None);
    spawner.spawn::<ClientSettingsPolicy>(Api::all(client.clone()), None);
    spawner.spawn::<ObservabilityPolicy>(Api::all(client.clone()), None);
    spawner.spawn::<Service>(Api::all(client.clone()), None);
    spawner.spawn::<Secret>(Api::all(client.clone()), None);
    spawner.spawn::<Namespace>(Api::all(client.clone()), None);

    if let Some(nsname) = &config.control_config {
        spawner.spawn::<NginxGateway>(
            Api::namespaced(client.clone(), &nsname.namespace),
            Some(single_object_filter(nsname.clone())),
        );
    }

    info!(controllers = spawner.tasks.len(), "Controllers spawned");
}

struct ControllerSpawner<'a> {
    tasks: &'a mut JoinSet<TaskResult>,
    store: &'a Arc<dyn ObjectStore>,
    events: &'a mpsc::Sender<Event>,
    token: &'a CancellationToken,
}

impl ControllerSpawner<'_> {
    fn spawn<K: KindObject>(&mut self, api: Api<K>, filter: Option<NamespacedNameFilter>) {
        let mut reconciler = Reconciler::<K>::new(self.store.clone(), self.events.clone());
        if let Some(filter) = filter {
            reconciler = reconciler.with_filter(filter);
        }
        let ctx = Arc::new(ControllerContext::new(reconciler, self.token.clone()));

        spawn_task(&mut *self.tasks, K::KIND.as_str(), async move {
            controllers::run(api, WatcherConfig::default(), ctx).await;
            Ok(())
        });
    }
}

/// Enable status writes once this replica may write them
///
/// Without leader election every replica writes. With it, statuses stay
/// buffered until the lease is acquired.
async fn run_status_leadership(
    client: Client,
    config: LeaderElectionConfig,
    updater: Arc<LeaderAwareGroupUpdater>,
    token: CancellationToken,
) -> Result<()> {
    if !config.enabled() {
        info!("Leader election disabled, enabling status updates");
        updater
            .enable(&token)
            .await
            .context("Failed to enable status updates")?;
        token.cancelled().await;
        return Ok(());
    }

    let election = LeaderElection::new(client, &config);
    if !election.acquire(&token).await {
        return Ok(());
    }

    updater
        .enable(&token)
        .await
        .context("Failed to enable status updates")?;

    let renewal = election.spawn_renewal_task(token.clone());
    token.cancelled().await;

    if let Err(e) = renewal.await {
        warn!(error = %e, "Lease renewal task failed");
    }
    Ok(())
}

/// Turn a task exit into the process result
///
/// Every task runs until cancellation, so any exit reaching here is a failure
/// that should restart the pod.
fn handle_task_exit(joined: std::result::Result<TaskResult, JoinError>) -> Result<()> {
    match joined {
        Ok((name, Ok(()))) => {
            error!(task = name, "Task exited unexpectedly");
            bail!("{} exited unexpectedly", name)
        }
        Ok((name, Err(e))) => {
            error!(task = name, error = ?e, "Task failed");
            Err(e.context(format!("{name} failed")))
        }
        Err(e) if e.is_panic() => {
            error!("Task panicked");
            bail!("task panicked: {:?}", e.into_panic())
        }
        Err(e) => {
            error!(error = ?e, "Task failed to complete");
            bail!("task failed to complete: {}", e)
        }
    }
}
