//! Desired-state graph and the collaborators that build and apply it
//!
//! [`GraphBuilder`] turns the in-memory cluster view into a [`Graph`] whose
//! [`GraphStatuses`] feed status preparation; [`DataPlaneApplier`] pushes a
//! graph to the data plane and reports whether the reload worked.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::api::{
    ClientSettingsPolicy, Gateway, GatewayClass, GatewayStatusAddress, GrpcRoute, HttpRoute,
    LocalPolicyTargetReference, ObservabilityPolicy, ParentReference, RouteGroupKind,
};
use crate::kinds::{NamespacedName, ResourceKind};
use crate::state::ClusterState;
use crate::status::conditions::{Condition, ConditionStatus};
use crate::status::queue::{Queue, QueueObject};

const GATEWAY_API_GROUP: &str = "gateway.networking.k8s.io";
const IP_ADDRESS_TYPE: &str = "IPAddress";

#[derive(Clone, Debug, Default)]
pub struct Graph {
    /// Increments with every build
    pub version: u64,
    pub statuses: GraphStatuses,
}

impl Graph {
    pub fn gateway(&self, nsname: &NamespacedName) -> Option<&GraphGateway> {
        self.statuses.gateways.iter().find(|g| &g.nsname == nsname)
    }
}

/// Everything status preparation needs from a graph
#[derive(Clone, Debug, Default)]
pub struct GraphStatuses {
    /// The class this controller serves, if it exists
    pub gateway_class: Option<GraphObject>,
    /// Other classes naming this controller
    pub ignored_gateway_classes: Vec<GraphObject>,
    pub gateways: Vec<GraphGateway>,
    pub ignored_gateways: Vec<GraphObject>,
    pub routes: Vec<GraphRoute>,
    pub policies: Vec<GraphPolicy>,
}

/// An object with controller-computed conditions
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GraphObject {
    pub nsname: NamespacedName,
    pub generation: i64,
    pub conditions: Vec<Condition>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct GraphGateway {
    pub nsname: NamespacedName,
    pub generation: i64,
    pub conditions: Vec<Condition>,
    pub addresses: Vec<GatewayStatusAddress>,
    pub listeners: Vec<GraphListener>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct GraphListener {
    pub name: String,
    pub conditions: Vec<Condition>,
    pub supported_kinds: Vec<RouteGroupKind>,
    pub attached_routes: i32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GraphRoute {
    /// HTTPRoute or GRPCRoute
    pub kind: ResourceKind,
    pub nsname: NamespacedName,
    pub generation: i64,
    pub conditions: Vec<Condition>,
    pub parents: Vec<GraphParentRef>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct GraphParentRef {
    pub gateway: NamespacedName,
    pub section_name: Option<String>,
    /// Set when the route could not attach to this parent
    pub failed_condition: Option<Condition>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GraphPolicy {
    /// ClientSettingsPolicy or ObservabilityPolicy
    pub kind: ResourceKind,
    pub nsname: NamespacedName,
    pub generation: i64,
    pub conditions: Vec<Condition>,
    pub ancestors: Vec<ParentReference>,
}

/// Builds the desired-state graph from the cluster view
#[cfg_attr(test, mockall::automock)]
pub trait GraphBuilder: Send + Sync {
    fn build(&self, state: &ClusterState) -> Graph;
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct ReloadError(pub String);

/// Applies a graph to the data plane
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DataPlaneApplier: Send + Sync {
    async fn apply(&self, graph: &Graph) -> Result<(), ReloadError>;
}

/// Computes which gateways, routes and policies this controller owns and how
/// they attach to each other
pub struct AttachmentGraphBuilder {
    controller_name: String,
    gateway_class_name: String,
    /// Reported on every managed gateway
    addresses: Vec<GatewayStatusAddress>,
    version: std::sync::atomic::AtomicU64,
}

impl AttachmentGraphBuilder {
    pub fn new(controller_name: impl Into<String>, gateway_class_name: impl Into<String>) -> Self {
        Self {
            controller_name: controller_name.into(),
            gateway_class_name: gateway_class_name.into(),
            addresses: Vec::new(),
            version: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Report `ip` as the address of every managed gateway
    pub fn with_pod_ip(mut self, ip: impl Into<String>) -> Self {
        self.addresses = vec![GatewayStatusAddress {
            type_: Some(IP_ADDRESS_TYPE.to_string()),
            value: ip.into(),
        }];
        self
    }

    fn gateway_classes(&self, state: &ClusterState) -> (Option<GraphObject>, Vec<GraphObject>) {
        let mut winner = None;
        let mut ignored = Vec::new();

        for gc in state.objects::<GatewayClass>() {
            if gc.spec.controller_name != self.controller_name {
                continue;
            }
            let object = GraphObject {
                nsname: NamespacedName::from_meta(&gc.metadata),
                generation: gc.metadata.generation.unwrap_or_default(),
                conditions: Vec::new(),
            };
            if object.nsname.name == self.gateway_class_name {
                winner = Some(object);
            } else {
                ignored.push(object);
            }
        }

        (winner, ignored)
    }

    /// Gateways of the served class, and gateways of declined classes
    fn gateways(
        &self,
        state: &ClusterState,
        ignored_classes: &[GraphObject],
    ) -> (Vec<GraphGateway>, Vec<GraphObject>) {
        let ignored = state
            .objects::<Gateway>()
            .filter(|gw| {
                ignored_classes
                    .iter()
                    .any(|gc| gc.nsname.name == gw.spec.gateway_class_name)
            })
            .map(|gw| GraphObject {
                nsname: NamespacedName::from_meta(&gw.metadata),
                generation: gw.metadata.generation.unwrap_or_default(),
                conditions: Vec::new(),
            })
            .collect();

        let managed = state
            .objects::<Gateway>()
            .filter(|gw| gw.spec.gateway_class_name == self.gateway_class_name)
            .map(|gw| GraphGateway {
                nsname: NamespacedName::from_meta(&gw.metadata),
                generation: gw.metadata.generation.unwrap_or_default(),
                conditions: Vec::new(),
                addresses: self.addresses.clone(),
                listeners: gw
                    .spec
                    .listeners
                    .iter()
                    .map(|l| GraphListener {
                        name: l.name.clone(),
                        conditions: Vec::new(),
                        supported_kinds: supported_kinds(&l.protocol),
                        attached_routes: 0,
                    })
                    .collect(),
            })
            .collect();

        (managed, ignored)
    }

    fn route(
        kind: ResourceKind,
        meta: &kube::api::ObjectMeta,
        parent_refs: &[ParentReference],
        gateways: &mut [GraphGateway],
    ) -> Option<GraphRoute> {
        let nsname = NamespacedName::from_meta(meta);
        let mut parents = Vec::new();

        for parent_ref in parent_refs {
            let gateway = NamespacedName::new(
                parent_ref
                    .namespace
                    .clone()
                    .unwrap_or_else(|| nsname.namespace.clone()),
                parent_ref.name.clone(),
            );
            let Some(gw) = gateways.iter_mut().find(|g| g.nsname == gateway) else {
                continue;
            };

            let mut attached = false;
            for listener in gw.listeners.iter_mut() {
                let section_matches = parent_ref
                    .section_name
                    .as_deref()
                    .map_or(true, |s| s == listener.name);
                let kind_supported = listener
                    .supported_kinds
                    .iter()
                    .any(|k| k.kind == kind.as_str());
                if section_matches && kind_supported {
                    listener.attached_routes += 1;
                    attached = true;
                }
            }

            parents.push(GraphParentRef {
                gateway,
                section_name: parent_ref.section_name.clone(),
                failed_condition: (!attached).then(|| {
                    Condition::new(
                        "Accepted",
                        ConditionStatus::False,
                        "NoMatchingParent",
                        "No listener matches the parent reference",
                    )
                }),
            });
        }

        (!parents.is_empty()).then(|| GraphRoute {
            kind,
            nsname,
            generation: meta.generation.unwrap_or_default(),
            conditions: Vec::new(),
            parents,
        })
    }

    fn policy(
        kind: ResourceKind,
        meta: &kube::api::ObjectMeta,
        targets: &[LocalPolicyTargetReference],
        gateways: &[GraphGateway],
        routes: &[GraphRoute],
    ) -> Option<GraphPolicy> {
        let nsname = NamespacedName::from_meta(meta);
        let mut ancestors: BTreeSet<NamespacedName> = BTreeSet::new();

        for target in targets.iter().filter(|t| t.group == GATEWAY_API_GROUP) {
            let target_nsname = NamespacedName::new(nsname.namespace.clone(), target.name.clone());
            match target.kind.as_str() {
                "Gateway" => {
                    if gateways.iter().any(|g| g.nsname == target_nsname) {
                        ancestors.insert(target_nsname);
                    }
                }
                "HTTPRoute" | "GRPCRoute" => {
                    for route in routes
                        .iter()
                        .filter(|r| r.kind.as_str() == target.kind && r.nsname == target_nsname)
                    {
                        ancestors.extend(route.parents.iter().map(|p| p.gateway.clone()));
                    }
                }
                _ => {}
            }
        }

        (!ancestors.is_empty()).then(|| GraphPolicy {
            kind,
            nsname,
            generation: meta.generation.unwrap_or_default(),
            conditions: Vec::new(),
            ancestors: ancestors
                .into_iter()
                .map(|gw| ParentReference {
                    group: Some(GATEWAY_API_GROUP.to_string()),
                    kind: Some("Gateway".to_string()),
                    namespace: Some(gw.namespace),
                    name: gw.name,
                    ..Default::default()
                })
                .collect(),
        })
    }
}

fn supported_kinds(protocol: &str) -> Vec<RouteGroupKind> {
    let kind = |k: &str| RouteGroupKind {
        group: Some(GATEWAY_API_GROUP.to_string()),
        kind: k.to_string(),
    };
    match protocol {
        "HTTP" | "HTTPS" => vec![kind("HTTPRoute"), kind("GRPCRoute")],
        _ => Vec::new(),
    }
}

impl GraphBuilder for AttachmentGraphBuilder {
    fn build(&self, state: &ClusterState) -> Graph {
        let (gateway_class, ignored_gateway_classes) = self.gateway_classes(state);

        let (mut gateways, ignored_gateways) = if gateway_class.is_some() {
            self.gateways(state, &ignored_gateway_classes)
        } else {
            (Vec::new(), Vec::new())
        };

        let mut routes = Vec::new();
        for route in state.objects::<HttpRoute>() {
            routes.extend(Self::route(
                ResourceKind::HttpRoute,
                &route.metadata,
                &route.spec.parent_refs,
                &mut gateways,
            ));
        }
        for route in state.objects::<GrpcRoute>() {
            routes.extend(Self::route(
                ResourceKind::GrpcRoute,
                &route.metadata,
                &route.spec.parent_refs,
                &mut gateways,
            ));
        }

        let mut policies = Vec::new();
        for policy in state.objects::<ClientSettingsPolicy>() {
            policies.extend(Self::policy(
                ResourceKind::ClientSettingsPolicy,
                &policy.metadata,
                std::slice::from_ref(&policy.spec.target_ref),
                &gateways,
                &routes,
            ));
        }
        for policy in state.objects::<ObservabilityPolicy>() {
            policies.extend(Self::policy(
                ResourceKind::ObservabilityPolicy,
                &policy.metadata,
                &policy.spec.target_refs,
                &gateways,
                &routes,
            ));
        }

        let version = self
            .version
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
            + 1;

        Graph {
            version,
            statuses: GraphStatuses {
                gateway_class,
                ignored_gateway_classes,
                gateways,
                ignored_gateways,
                routes,
                policies,
            },
        }
    }
}

/// Applier that records each graph and reports the outcome per gateway
pub struct LoggingApplier {
    deployments: Arc<Queue<QueueObject>>,
}

impl LoggingApplier {
    pub fn new(deployments: Arc<Queue<QueueObject>>) -> Self {
        Self { deployments }
    }
}

#[async_trait]
impl DataPlaneApplier for LoggingApplier {
    async fn apply(&self, graph: &Graph) -> Result<(), ReloadError> {
        info!(
            version = graph.version,
            gateways = graph.statuses.gateways.len(),
            routes = graph.statuses.routes.len(),
            policies = graph.statuses.policies.len(),
            "Applied configuration"
        );

        for gateway in &graph.statuses.gateways {
            self.deployments.enqueue(QueueObject {
                gateway: gateway.nsname.clone(),
                error: None,
            });
        }
        Ok(())
    }
}
