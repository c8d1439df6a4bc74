//! Resource identity and the closed set of watched kinds

use std::fmt;

use k8s_openapi::api::core::v1::{Namespace, Secret, Service};
use kube::api::ObjectMeta;
use kube::Resource as _;

use crate::api::{
    ClientSettingsPolicy, Gateway, GatewayClass, GrpcRoute, HttpRoute, NginxGateway,
    ObservabilityPolicy,
};

/// Namespace and name of a cluster object
///
/// Cluster-scoped objects use an empty namespace.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NamespacedName {
    pub namespace: String,
    pub name: String,
}

impl NamespacedName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Identity of a cluster-scoped object
    pub fn cluster(name: impl Into<String>) -> Self {
        Self::new("", name)
    }

    /// Build from object metadata
    pub fn from_meta(meta: &ObjectMeta) -> Self {
        Self {
            namespace: meta.namespace.clone().unwrap_or_default(),
            name: meta.name.clone().unwrap_or_default(),
        }
    }
}

impl fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

/// Every kind the operator watches
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    GatewayClass,
    Gateway,
    HttpRoute,
    GrpcRoute,
    ClientSettingsPolicy,
    ObservabilityPolicy,
    NginxGateway,
    Service,
    Secret,
    Namespace,
}

impl ResourceKind {
    /// All kinds, in the order the first batch lists them
    pub const ALL: [ResourceKind; 10] = [
        ResourceKind::GatewayClass,
        ResourceKind::Gateway,
        ResourceKind::HttpRoute,
        ResourceKind::GrpcRoute,
        ResourceKind::ClientSettingsPolicy,
        ResourceKind::ObservabilityPolicy,
        ResourceKind::NginxGateway,
        ResourceKind::Service,
        ResourceKind::Secret,
        ResourceKind::Namespace,
    ];

    /// Whether the kind has a status subresource this operator writes
    pub fn has_status(self) -> bool {
        !matches!(
            self,
            ResourceKind::Service | ResourceKind::Secret | ResourceKind::Namespace
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::GatewayClass => "GatewayClass",
            ResourceKind::Gateway => "Gateway",
            ResourceKind::HttpRoute => "HTTPRoute",
            ResourceKind::GrpcRoute => "GRPCRoute",
            ResourceKind::ClientSettingsPolicy => "ClientSettingsPolicy",
            ResourceKind::ObservabilityPolicy => "ObservabilityPolicy",
            ResourceKind::NginxGateway => "NginxGateway",
            ResourceKind::Service => "Service",
            ResourceKind::Secret => "Secret",
            ResourceKind::Namespace => "Namespace",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One object of any watched kind
#[derive(Clone, Debug)]
pub enum Resource {
    GatewayClass(GatewayClass),
    Gateway(Gateway),
    HttpRoute(HttpRoute),
    GrpcRoute(GrpcRoute),
    ClientSettingsPolicy(ClientSettingsPolicy),
    ObservabilityPolicy(ObservabilityPolicy),
    NginxGateway(NginxGateway),
    Service(Service),
    Secret(Secret),
    Namespace(Namespace),
}

impl Resource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Resource::GatewayClass(_) => ResourceKind::GatewayClass,
            Resource::Gateway(_) => ResourceKind::Gateway,
            Resource::HttpRoute(_) => ResourceKind::HttpRoute,
            Resource::GrpcRoute(_) => ResourceKind::GrpcRoute,
            Resource::ClientSettingsPolicy(_) => ResourceKind::ClientSettingsPolicy,
            Resource::ObservabilityPolicy(_) => ResourceKind::ObservabilityPolicy,
            Resource::NginxGateway(_) => ResourceKind::NginxGateway,
            Resource::Service(_) => ResourceKind::Service,
            Resource::Secret(_) => ResourceKind::Secret,
            Resource::Namespace(_) => ResourceKind::Namespace,
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            Resource::GatewayClass(o) => o.meta(),
            Resource::Gateway(o) => o.meta(),
            Resource::HttpRoute(o) => o.meta(),
            Resource::GrpcRoute(o) => o.meta(),
            Resource::ClientSettingsPolicy(o) => o.meta(),
            Resource::ObservabilityPolicy(o) => o.meta(),
            Resource::NginxGateway(o) => o.meta(),
            Resource::Service(o) => o.meta(),
            Resource::Secret(o) => o.meta(),
            Resource::Namespace(o) => o.meta(),
        }
    }

    pub fn nsname(&self) -> NamespacedName {
        NamespacedName::from_meta(self.metadata())
    }

    pub fn generation(&self) -> Option<i64> {
        self.metadata().generation
    }

    pub fn resource_version(&self) -> Option<&str> {
        self.metadata().resource_version.as_deref()
    }
}

/// A concrete object type that is one variant of [`Resource`]
pub trait KindObject:
    kube::Resource<DynamicType = ()>
    + Clone
    + fmt::Debug
    + serde::de::DeserializeOwned
    + serde::Serialize
    + Send
    + Sync
    + 'static
{
    const KIND: ResourceKind;

    fn into_resource(self) -> Resource;

    fn from_resource(resource: &Resource) -> Option<&Self>;
}

macro_rules! kind_object {
    ($($ty:ty => $variant:ident),+ $(,)?) => {
        $(
            impl KindObject for $ty {
                const KIND: ResourceKind = ResourceKind::$variant;

                fn into_resource(self) -> Resource {
                    Resource::$variant(self)
                }

                fn from_resource(resource: &Resource) -> Option<&Self> {
                    match resource {
                        Resource::$variant(o) => Some(o),
                        _ => None,
                    }
                }
            }

            impl From<$ty> for Resource {
                fn from(o: $ty) -> Self {
                    Resource::$variant(o)
                }
            }
        )+
    };
}

kind_object! {
    GatewayClass => GatewayClass,
    Gateway => Gateway,
    HttpRoute => HttpRoute,
    GrpcRoute => GrpcRoute,
    ClientSettingsPolicy => ClientSettingsPolicy,
    ObservabilityPolicy => ObservabilityPolicy,
    NginxGateway => NginxGateway,
    Service => Service,
    Secret => Secret,
    Namespace => Namespace,
}
