//! Watch-driven controllers that feed the event channel
//!
//! Each watched kind runs one [`kube::runtime::Controller`]. Its reconcile
//! function only forwards the object's identity to a [`Reconciler`], which
//! fetches the latest copy and emits an upsert or delete event.
//!
//! The controller is driven by a reflector stream of touched objects, so a
//! deletion also triggers a reconcile. The reflector has already dropped the
//! object by then, which surfaces as `ObjectNotFound`.

pub mod filter;
pub mod reconciler;
pub mod retry;

pub use filter::{single_object_filter, NamespacedNameFilter};
pub use reconciler::{ReconcileError, Reconciler};

use std::sync::Arc;

use futures::StreamExt;
use kube::runtime::controller::{self, Action, Controller};
use kube::runtime::watcher::{self, Config as WatcherConfig};
use kube::runtime::{reflector, WatchStreamExt};
use kube::Api;
use kube::Resource as _;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::kinds::{KindObject, NamespacedName};
use retry::{compute_backoff, RetryTracker};

/// Shared state for one kind's controller
pub struct ControllerContext<K> {
    pub reconciler: Reconciler<K>,
    pub retry_tracker: RetryTracker,
    pub token: CancellationToken,
}

impl<K: KindObject> ControllerContext<K> {
    pub fn new(reconciler: Reconciler<K>, token: CancellationToken) -> Self {
        Self {
            reconciler,
            retry_tracker: RetryTracker::new(),
            token,
        }
    }
}

async fn reconcile<K: KindObject>(
    obj: Arc<K>,
    ctx: Arc<ControllerContext<K>>,
) -> Result<Action, ReconcileError> {
    let nsname = NamespacedName::from_meta(obj.meta());
    ctx.reconciler.reconcile(&ctx.token, &nsname).await?;
    ctx.retry_tracker.reset(&nsname.to_string());
    Ok(Action::await_change())
}

fn error_policy<K: KindObject>(
    obj: Arc<K>,
    error: &ReconcileError,
    ctx: Arc<ControllerContext<K>>,
) -> Action {
    let key = NamespacedName::from_meta(obj.meta()).to_string();
    let attempt = ctx.retry_tracker.increment(&key);

    warn!(
        kind = %K::KIND,
        object = %key,
        error = %error,
        attempt,
        "Reconciliation error"
    );

    compute_backoff(attempt)
}

/// Reconcile an object the controller no longer has in its cache
///
/// The controller reports deletions this way; the reconciler confirms the
/// object is gone and emits a delete event.
async fn reconcile_deleted<K: KindObject>(ctx: &ControllerContext<K>, nsname: NamespacedName) {
    let key = nsname.to_string();
    match ctx.reconciler.reconcile(&ctx.token, &nsname).await {
        Ok(()) => ctx.retry_tracker.reset(&key),
        Err(e) => warn!(
            kind = %K::KIND,
            object = %key,
            error = %e,
            "Failed to reconcile deleted resource"
        ),
    }
}

/// Run the controller for kind `K` until the token is cancelled
pub async fn run<K: KindObject>(
    api: Api<K>,
    config: WatcherConfig,
    ctx: Arc<ControllerContext<K>>,
) {
    let token = ctx.token.clone();
    let stream_ctx = ctx.clone();

    info!(kind = %K::KIND, "Starting controller");

    let (reader, writer) = reflector::store();
    let stream = watcher::watcher(api, config)
        .default_backoff()
        .reflect(writer)
        .touched_objects();

    let controller = Controller::for_stream(stream, reader)
        .run(reconcile::<K>, error_policy::<K>, ctx)
        .for_each(move |result| {
            let ctx = stream_ctx.clone();
            async move {
                match result {
                    Ok((obj_ref, _)) => {
                        debug!(kind = %K::KIND, object = %obj_ref, "Reconciled");
                    }
                    Err(controller::Error::ObjectNotFound(obj_ref)) => {
                        let nsname = NamespacedName::new(
                            obj_ref.namespace.unwrap_or_default(),
                            obj_ref.name,
                        );
                        reconcile_deleted(&ctx, nsname).await;
                    }
                    // Already logged by error_policy
                    Err(controller::Error::ReconcilerFailed(..)) => {}
                    Err(e) => {
                        error!(kind = %K::KIND, error = ?e, "Controller stream error");
                    }
                }
            }
        });

    tokio::select! {
        _ = token.cancelled() => {
            info!(kind = %K::KIND, "Controller stopped");
        }
        _ = controller => {
            warn!(kind = %K::KIND, "Controller stream ended");
        }
    }
}
