//! Access to cluster objects
//!
//! The rest of the operator talks to the API server only through
//! [`ObjectStore`], which lets the status pipeline be tested against a mock.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Secret, Service};
use k8s_openapi::NamespaceResourceScope;
use kube::api::{ListParams, Patch, PatchParams};
use kube::{Api, Client};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use crate::api::{
    ClientSettingsPolicy, Gateway, GatewayClass, GrpcRoute, HttpRoute, NginxGateway,
    ObservabilityPolicy,
};
use crate::kinds::{KindObject, NamespacedName, Resource, ResourceKind};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {nsname} not found")]
    NotFound {
        kind: ResourceKind,
        nsname: NamespacedName,
    },

    #[error("conflict writing {kind} {nsname}: the object has been modified")]
    Conflict {
        kind: ResourceKind,
        nsname: NamespacedName,
    },

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0} has no status subresource")]
    NoStatus(ResourceKind),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// Reads objects and writes their status subresource
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch the latest version of an object
    async fn get(&self, kind: ResourceKind, nsname: &NamespacedName)
        -> Result<Resource, StoreError>;

    /// Write the status of an object
    ///
    /// Fails with [`StoreError::Conflict`] if the object changed since it was read.
    async fn update_status(&self, resource: &Resource) -> Result<(), StoreError>;

    /// List every object of a kind across all namespaces
    async fn list(&self, kind: ResourceKind) -> Result<Vec<Resource>, StoreError>;
}

/// [`ObjectStore`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn namespaced<K>(&self, namespace: &str) -> Api<K>
    where
        K: KindObject + kube::Resource<Scope = NamespaceResourceScope>,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn cluster<K: KindObject>(&self) -> Api<K> {
        Api::all(self.client.clone())
    }

    async fn get_from<K: KindObject>(
        api: Api<K>,
        nsname: &NamespacedName,
    ) -> Result<Resource, StoreError> {
        match api.get(&nsname.name).await {
            Ok(obj) => Ok(obj.into_resource()),
            Err(e) => Err(map_kube_error(e, K::KIND, nsname)),
        }
    }

    async fn list_from<K: KindObject>(api: Api<K>) -> Result<Vec<Resource>, StoreError> {
        let list = api.list(&ListParams::default()).await?;
        Ok(list.items.into_iter().map(KindObject::into_resource).collect())
    }

    async fn patch_status_on<K: KindObject>(api: Api<K>, obj: &K) -> Result<(), StoreError> {
        let nsname = NamespacedName::from_meta(obj.meta());
        let patch = status_patch(obj)?;

        debug!(kind = %K::KIND, object = %nsname, "Patching status");

        api.patch_status(&nsname.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| map_kube_error(e, K::KIND, &nsname))?;
        Ok(())
    }
}

/// Merge patch carrying the object's status and the resource version it was read at
fn status_patch<K: KindObject>(obj: &K) -> Result<Value, StoreError> {
    let value = serde_json::to_value(obj)?;
    let status = value.get("status").cloned().unwrap_or(Value::Null);
    Ok(json!({
        "metadata": { "resourceVersion": obj.meta().resource_version },
        "status": status,
    }))
}

fn map_kube_error(err: kube::Error, kind: ResourceKind, nsname: &NamespacedName) -> StoreError {
    match err {
        kube::Error::Api(ae) if ae.code == 404 => StoreError::NotFound {
            kind,
            nsname: nsname.clone(),
        },
        kube::Error::Api(ae) if ae.code == 409 => StoreError::Conflict {
            kind,
            nsname: nsname.clone(),
        },
        e => StoreError::Kube(e),
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get(
        &self,
        kind: ResourceKind,
        nsname: &NamespacedName,
    ) -> Result<Resource, StoreError> {
        let ns = nsname.namespace.as_str();
        match kind {
            ResourceKind::GatewayClass => Self::get_from(self.cluster::<GatewayClass>(), nsname).await,
            ResourceKind::Gateway => Self::get_from(self.namespaced::<Gateway>(ns), nsname).await,
            ResourceKind::HttpRoute => Self::get_from(self.namespaced::<HttpRoute>(ns), nsname).await,
            ResourceKind::GrpcRoute => Self::get_from(self.namespaced::<GrpcRoute>(ns), nsname).await,
            ResourceKind::ClientSettingsPolicy => {
                Self::get_from(self.namespaced::<ClientSettingsPolicy>(ns), nsname).await
            }
            ResourceKind::ObservabilityPolicy => {
                Self::get_from(self.namespaced::<ObservabilityPolicy>(ns), nsname).await
            }
            ResourceKind::NginxGateway => {
                Self::get_from(self.namespaced::<NginxGateway>(ns), nsname).await
            }
            ResourceKind::Service => Self::get_from(self.namespaced::<Service>(ns), nsname).await,
            ResourceKind::Secret => Self::get_from(self.namespaced::<Secret>(ns), nsname).await,
            ResourceKind::Namespace => Self::get_from(self.cluster::<Namespace>(), nsname).await,
        }
    }

    async fn update_status(&self, resource: &Resource) -> Result<(), StoreError> {
        let kind = resource.kind();
        if !kind.has_status() {
            return Err(StoreError::NoStatus(kind));
        }

        let ns = resource.metadata().namespace.clone().unwrap_or_default();
        match resource {
            Resource::GatewayClass(o) => Self::patch_status_on(self.cluster(), o).await,
            Resource::Gateway(o) => Self::patch_status_on(self.namespaced(&ns), o).await,
            Resource::HttpRoute(o) => Self::patch_status_on(self.namespaced(&ns), o).await,
            Resource::GrpcRoute(o) => Self::patch_status_on(self.namespaced(&ns), o).await,
            Resource::ClientSettingsPolicy(o) => {
                Self::patch_status_on(self.namespaced(&ns), o).await
            }
            Resource::ObservabilityPolicy(o) => {
                Self::patch_status_on(self.namespaced(&ns), o).await
            }
            Resource::NginxGateway(o) => Self::patch_status_on(self.namespaced(&ns), o).await,
            Resource::Service(_) | Resource::Secret(_) | Resource::Namespace(_) => {
                Err(StoreError::NoStatus(kind))
            }
        }
    }

    async fn list(&self, kind: ResourceKind) -> Result<Vec<Resource>, StoreError> {
        match kind {
            ResourceKind::GatewayClass => Self::list_from(self.cluster::<GatewayClass>()).await,
            ResourceKind::Gateway => Self::list_from(self.cluster::<Gateway>()).await,
            ResourceKind::HttpRoute => Self::list_from(self.cluster::<HttpRoute>()).await,
            ResourceKind::GrpcRoute => Self::list_from(self.cluster::<GrpcRoute>()).await,
            ResourceKind::ClientSettingsPolicy => {
                Self::list_from(self.cluster::<ClientSettingsPolicy>()).await
            }
            ResourceKind::ObservabilityPolicy => {
                Self::list_from(self.cluster::<ObservabilityPolicy>()).await
            }
            ResourceKind::NginxGateway => Self::list_from(self.cluster::<NginxGateway>()).await,
            ResourceKind::Service => Self::list_from(self.cluster::<Service>()).await,
            ResourceKind::Secret => Self::list_from(self.cluster::<Secret>()).await,
            ResourceKind::Namespace => Self::list_from(self.cluster::<Namespace>()).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{GatewaySpec, NginxGatewaySpec, NginxGatewayStatus};
    use http::{Request, Response, StatusCode};
    use kube::client::Body;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::{Arc, Mutex};
    use std::task::{Context, Poll};

    /// Records requests and answers with a fixed status code and body
    #[derive(Clone)]
    struct MockKubeService {
        status: StatusCode,
        body: String,
        requests: Arc<Mutex<Vec<(String, String)>>>,
    }

    impl MockKubeService {
        fn new(status: StatusCode, body: Value) -> Self {
            Self {
                status,
                body: body.to_string(),
                requests: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl tower::Service<Request<Body>> for MockKubeService {
        type Response = Response<Body>;
        type Error = std::convert::Infallible;
        type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, req: Request<Body>) -> Self::Future {
            self.requests
                .lock()
                .unwrap()
                .push((req.method().to_string(), req.uri().path().to_string()));
            let response = Response::builder()
                .status(self.status)
                .header("content-type", "application/json")
                .body(Body::from(self.body.clone().into_bytes()))
                .unwrap();
            Box::pin(async move { Ok(response) })
        }
    }

    fn api_error(code: u16, reason: &str) -> Value {
        json!({
            "kind": "Status",
            "apiVersion": "v1",
            "metadata": {},
            "status": "Failure",
            "message": reason,
            "reason": reason,
            "code": code,
        })
    }

    #[test]
    fn test_status_patch_carries_resource_version() {
        let mut ng = NginxGateway::new("config", NginxGatewaySpec::default());
        ng.metadata.namespace = Some("nginx-gateway".to_string());
        ng.metadata.resource_version = Some("42".to_string());
        ng.status = Some(NginxGatewayStatus::default());

        let patch = status_patch(&ng).unwrap();

        assert_eq!(patch["metadata"]["resourceVersion"], "42");
        assert_eq!(patch["status"], json!({ "conditions": [] }));
    }

    #[tokio::test]
    async fn test_get_maps_404_to_not_found() {
        let svc = MockKubeService::new(StatusCode::NOT_FOUND, api_error(404, "NotFound"));
        let store = KubeStore::new(Client::new(svc.clone(), "default"));

        let err = store
            .get(ResourceKind::Gateway, &NamespacedName::new("default", "missing"))
            .await
            .unwrap_err();

        assert!(err.is_not_found());
        let requests = svc.requests.lock().unwrap();
        assert_eq!(
            requests[0].1,
            "/apis/gateway.networking.k8s.io/v1/namespaces/default/gateways/missing"
        );
    }

    #[tokio::test]
    async fn test_update_status_maps_409_to_conflict() {
        let svc = MockKubeService::new(StatusCode::CONFLICT, api_error(409, "Conflict"));
        let store = KubeStore::new(Client::new(svc.clone(), "default"));

        let mut gw = Gateway::new("gw", GatewaySpec::default());
        gw.metadata.namespace = Some("default".to_string());
        gw.metadata.resource_version = Some("1".to_string());

        let err = store
            .update_status(&Resource::Gateway(gw))
            .await
            .unwrap_err();

        assert!(err.is_conflict());
        let requests = svc.requests.lock().unwrap();
        assert_eq!(requests[0].0, "PATCH");
        assert!(requests[0].1.ends_with("/gateways/gw/status"));
    }

    #[tokio::test]
    async fn test_update_status_rejects_kind_without_status() {
        let svc = MockKubeService::new(StatusCode::OK, json!({}));
        let store = KubeStore::new(Client::new(svc.clone(), "default"));

        let err = store
            .update_status(&Resource::Secret(Secret::default()))
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::NoStatus(ResourceKind::Secret)));
        assert!(svc.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cluster_scoped_get_uses_cluster_path() {
        let svc = MockKubeService::new(StatusCode::NOT_FOUND, api_error(404, "NotFound"));
        let store = KubeStore::new(Client::new(svc.clone(), "default"));

        let _ = store
            .get(ResourceKind::GatewayClass, &NamespacedName::cluster("nginx"))
            .await;

        let requests = svc.requests.lock().unwrap();
        assert_eq!(
            requests[0].1,
            "/apis/gateway.networking.k8s.io/v1/gatewayclasses/nginx"
        );
    }
}
