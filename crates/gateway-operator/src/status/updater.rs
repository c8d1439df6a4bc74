//! Writes desired statuses to the cluster
//!
//! For every request the updater reads the latest object, lets the request's
//! setter merge the desired status into it, and writes only when the setter
//! reports a change. Failures are logged and never abort sibling requests.

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::kinds::{NamespacedName, Resource, ResourceKind};
use crate::status::retry::{poll_with_backoff, retry_update_fn, Backoff, PollError};
use crate::store::ObjectStore;

/// Merges a desired status into a fetched object, returning whether it changed
#[derive(Clone)]
pub struct Setter(Arc<dyn Fn(&mut Resource) -> bool + Send + Sync>);

impl Setter {
    pub fn new(f: impl Fn(&mut Resource) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn apply(&self, resource: &mut Resource) -> bool {
        (self.0)(resource)
    }
}

impl fmt::Debug for Setter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Setter")
    }
}

/// One status write to attempt
#[derive(Clone, Debug)]
pub struct UpdateRequest {
    pub nsname: NamespacedName,
    pub kind: ResourceKind,
    pub setter: Setter,
}

impl UpdateRequest {
    pub fn new(kind: ResourceKind, nsname: NamespacedName, setter: Setter) -> Self {
        Self {
            nsname,
            kind,
            setter,
        }
    }
}

pub struct Updater {
    store: Arc<dyn ObjectStore>,
    backoff: Option<Backoff>,
}

impl Updater {
    /// Updater that makes a single attempt per request
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            backoff: None,
        }
    }

    /// Retry each request under `backoff` until it is written, unneeded, or gone
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = Some(backoff.normalized());
        self
    }

    /// Apply the requests in order
    ///
    /// Cancellation skips the remaining requests; it is not an error.
    #[instrument(skip_all, fields(requests = requests.len()))]
    pub async fn update(&self, token: &CancellationToken, requests: Vec<UpdateRequest>) {
        for request in requests {
            if token.is_cancelled() {
                debug!("Status update cancelled, skipping remaining requests");
                return;
            }

            if !request.kind.has_status() {
                warn!(
                    kind = %request.kind,
                    object = %request.nsname,
                    "Kind has no status subresource, skipping request"
                );
                continue;
            }

            match &self.backoff {
                None => self.update_once(&request).await,
                Some(backoff) => self.update_with_backoff(token, backoff, request).await,
            }
        }
    }

    async fn update_once(&self, request: &UpdateRequest) {
        let mut obj = match self.store.get(request.kind, &request.nsname).await {
            Ok(obj) => obj,
            Err(e) if e.is_not_found() => {
                debug!(
                    kind = %request.kind,
                    object = %request.nsname,
                    "Object no longer exists, skipping status update"
                );
                return;
            }
            Err(e) => {
                warn!(
                    kind = %request.kind,
                    object = %request.nsname,
                    error = %e,
                    "Failed to get the recent version of the object for status update"
                );
                return;
            }
        };

        if !request.setter.apply(&mut obj) {
            debug!(
                kind = %request.kind,
                object = %request.nsname,
                "Status is unchanged, skipping write"
            );
            return;
        }

        match self.store.update_status(&obj).await {
            Ok(()) => debug!(kind = %request.kind, object = %request.nsname, "Updated status"),
            Err(e) => warn!(
                kind = %request.kind,
                object = %request.nsname,
                error = %e,
                "Failed to update status"
            ),
        }
    }

    async fn update_with_backoff(
        &self,
        token: &CancellationToken,
        backoff: &Backoff,
        request: UpdateRequest,
    ) {
        let kind = request.kind;
        let nsname = request.nsname.clone();
        let condition = retry_update_fn(self.store.clone(), request);

        match poll_with_backoff(token, backoff, condition).await {
            Ok(()) => debug!(kind = %kind, object = %nsname, "Status update finished"),
            Err(PollError::Cancelled) => {
                info!(kind = %kind, object = %nsname, "Status update cancelled")
            }
            Err(e) => warn!(
                kind = %kind,
                object = %nsname,
                error = %e,
                "Giving up on status update"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{Condition, NginxGateway, NginxGatewaySpec, NginxGatewayStatus};
    use crate::status::setters::nginx_gateway_setter;
    use crate::store::{MockObjectStore, StoreError};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn nsname() -> NamespacedName {
        NamespacedName::new("nginx-gateway", "config")
    }

    fn ready_status() -> NginxGatewayStatus {
        NginxGatewayStatus {
            conditions: vec![Condition {
                type_: "Ready".to_string(),
                status: "True".to_string(),
                observed_generation: Some(1),
                last_transition_time: "2024-01-01T00:00:00Z".to_string(),
                reason: "Ready".to_string(),
                message: "ready".to_string(),
            }],
        }
    }

    fn request() -> UpdateRequest {
        UpdateRequest::new(
            ResourceKind::NginxGateway,
            nsname(),
            nginx_gateway_setter(ready_status()),
        )
    }

    fn empty_object() -> Resource {
        object("config")
    }

    fn object(name: &str) -> Resource {
        let mut ng = NginxGateway::new(name, NginxGatewaySpec::default());
        ng.metadata.namespace = Some("nginx-gateway".to_string());
        Resource::NginxGateway(ng)
    }

    fn request_for(name: &str) -> UpdateRequest {
        UpdateRequest::new(
            ResourceKind::NginxGateway,
            NamespacedName::new("nginx-gateway", name),
            nginx_gateway_setter(ready_status()),
        )
    }

    /// Store that keeps one object in memory and counts writes
    fn stateful_store(writes: Arc<AtomicUsize>) -> MockObjectStore {
        let stored = Arc::new(Mutex::new(empty_object()));
        let mut store = MockObjectStore::new();

        let read = stored.clone();
        store
            .expect_get()
            .returning(move |_, _| Ok(read.lock().clone()));
        store.expect_update_status().returning(move |obj| {
            writes.fetch_add(1, Ordering::SeqCst);
            *stored.lock() = obj.clone();
            Ok(())
        });
        store
    }

    #[tokio::test]
    async fn test_second_identical_update_does_not_write() {
        let writes = Arc::new(AtomicUsize::new(0));
        let updater = Updater::new(Arc::new(stateful_store(writes.clone())));
        let token = CancellationToken::new();

        updater.update(&token, vec![request()]).await;
        updater.update(&token, vec![request()]).await;

        assert_eq!(writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_not_found_is_skipped() {
        let mut store = MockObjectStore::new();
        store.expect_get().times(1).returning(|kind, nsname| {
            Err(StoreError::NotFound {
                kind,
                nsname: nsname.clone(),
            })
        });
        store.expect_update_status().never();

        let updater = Updater::new(Arc::new(store));
        updater.update(&CancellationToken::new(), vec![request()]).await;
    }

    #[tokio::test]
    async fn test_failed_request_does_not_abort_siblings() {
        let mut store = MockObjectStore::new();
        let gets = Arc::new(AtomicUsize::new(0));
        let counter = gets.clone();
        store.expect_get().times(2).returning(move |_, _| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(StoreError::NoStatus(ResourceKind::Secret))
            } else {
                Ok(empty_object())
            }
        });
        store.expect_update_status().times(1).returning(|_| Ok(()));

        let updater = Updater::new(Arc::new(store));
        updater
            .update(&CancellationToken::new(), vec![request(), request()])
            .await;

        assert_eq!(gets.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_write_failure_is_not_retried_by_default() {
        let mut store = MockObjectStore::new();
        store.expect_get().times(1).returning(|_, _| Ok(empty_object()));
        store.expect_update_status().times(1).returning(|obj| {
            Err(StoreError::Conflict {
                kind: obj.kind(),
                nsname: obj.nsname(),
            })
        });

        let updater = Updater::new(Arc::new(store));
        updater.update(&CancellationToken::new(), vec![request()]).await;
    }

    #[tokio::test]
    async fn test_cancelled_token_skips_all_requests() {
        let mut store = MockObjectStore::new();
        store.expect_get().never();
        store.expect_update_status().never();

        let token = CancellationToken::new();
        token.cancel();

        let updater = Updater::new(Arc::new(store));
        updater.update(&token, vec![request(), request()]).await;
    }

    #[tokio::test]
    async fn test_kind_without_status_never_reaches_store() {
        let mut store = MockObjectStore::new();
        store
            .expect_get()
            .withf(|kind, _| *kind == ResourceKind::NginxGateway)
            .times(1)
            .returning(|_, _| Ok(empty_object()));
        store.expect_update_status().times(1).returning(|_| Ok(()));

        let secret = UpdateRequest::new(
            ResourceKind::Secret,
            NamespacedName::new("default", "tls"),
            Setter::new(|_| true),
        );

        let updater = Updater::new(Arc::new(store));
        updater
            .update(&CancellationToken::new(), vec![secret, request()])
            .await;
    }

    #[tokio::test]
    async fn test_cancel_during_write_skips_remaining_requests() {
        let token = CancellationToken::new();
        let mut store = MockObjectStore::new();
        store
            .expect_get()
            .withf(|_, n| n.name == "a")
            .times(1)
            .returning(|_, _| Ok(object("a")));
        let cancel = token.clone();
        store.expect_update_status().times(1).returning(move |_| {
            cancel.cancel();
            Ok(())
        });

        let updater = Updater::new(Arc::new(store));
        updater
            .update(
                &token,
                vec![request_for("a"), request_for("b"), request_for("c")],
            )
            .await;
    }

    #[tokio::test]
    async fn test_cancel_during_get_finishes_current_request_only() {
        let token = CancellationToken::new();
        let mut store = MockObjectStore::new();
        let cancel = token.clone();
        store
            .expect_get()
            .withf(|_, n| n.name == "a")
            .times(1)
            .returning(move |_, _| {
                cancel.cancel();
                Ok(object("a"))
            });
        store
            .expect_update_status()
            .withf(|obj| obj.nsname().name == "a")
            .times(1)
            .returning(|_| Ok(()));

        let updater = Updater::new(Arc::new(store));
        updater
            .update(
                &token,
                vec![request_for("a"), request_for("b"), request_for("c")],
            )
            .await;
    }

    #[tokio::test]
    async fn test_requests_applied_in_caller_order() {
        let mut store = MockObjectStore::new();
        let mut seq = mockall::Sequence::new();
        for name in ["a", "b", "c"] {
            store
                .expect_get()
                .withf(move |_, n| n.name == name)
                .times(1)
                .in_sequence(&mut seq)
                .returning(move |_, _| Ok(object(name)));
            store
                .expect_update_status()
                .withf(move |obj| obj.nsname().name == name)
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_| Ok(()));
        }

        let updater = Updater::new(Arc::new(store));
        updater
            .update(
                &CancellationToken::new(),
                vec![request_for("a"), request_for("b"), request_for("c")],
            )
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_backoff_retries_conflicts() {
        let mut store = MockObjectStore::new();
        store.expect_get().times(2).returning(|_, _| Ok(empty_object()));
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        store.expect_update_status().times(2).returning(move |obj| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(StoreError::Conflict {
                    kind: obj.kind(),
                    nsname: obj.nsname(),
                })
            } else {
                Ok(())
            }
        });

        let updater = Updater::new(Arc::new(store)).with_backoff(Backoff {
            duration: Duration::from_millis(10),
            ..Backoff::default()
        });
        updater.update(&CancellationToken::new(), vec![request()]).await;

        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
