//! Turn graph statuses into status update requests
//!
//! Every producer lists default conditions first and the graph's specific
//! conditions after them, so [`deduplicate`] lets the specific ones win.

use crate::api::{
    GatewayClassStatus, GatewayStatus, ListenerStatus, NginxGateway, NginxGatewayStatus,
    ParentReference, PolicyAncestorStatus, RouteParentStatus,
};
use crate::graph::{GraphGateway, GraphObject, GraphPolicy, GraphRoute, GraphStatuses, ReloadError};
use crate::kinds::{NamespacedName, ResourceKind};

use super::conditions::{self, convert, deduplicate, Condition};
use super::setters::{
    gateway_class_setter, gateway_setter, nginx_gateway_setter, policy_setter, route_setter,
};
use super::updater::UpdateRequest;

/// Requests for every object in the graph
///
/// `reload_error` is the outcome of applying the graph to the data plane.
pub fn prepare_requests(
    statuses: &GraphStatuses,
    controller_name: &str,
    time: &str,
    reload_error: Option<&ReloadError>,
    update_gateway_class: bool,
) -> Vec<UpdateRequest> {
    let mut reqs = Vec::new();

    if update_gateway_class {
        reqs.extend(prepare_gateway_class_requests(
            statuses.gateway_class.as_ref(),
            &statuses.ignored_gateway_classes,
            time,
        ));
    }
    reqs.extend(prepare_gateway_requests(
        &statuses.gateways,
        &statuses.ignored_gateways,
        time,
        reload_error,
    ));
    reqs.extend(prepare_route_requests(
        &statuses.routes,
        controller_name,
        time,
        reload_error,
    ));
    reqs.extend(prepare_policy_requests(&statuses.policies, controller_name, time));

    reqs
}

pub fn prepare_gateway_class_requests(
    gateway_class: Option<&GraphObject>,
    ignored: &[GraphObject],
    time: &str,
) -> Vec<UpdateRequest> {
    let mut reqs = Vec::with_capacity(ignored.len() + 1);

    if let Some(gc) = gateway_class {
        let mut conds = conditions::default_gateway_class_conditions();
        conds.extend(gc.conditions.iter().cloned());

        reqs.push(UpdateRequest::new(
            ResourceKind::GatewayClass,
            gc.nsname.clone(),
            gateway_class_setter(GatewayClassStatus {
                conditions: convert(&deduplicate(conds), gc.generation, time),
            }),
        ));
    }

    for gc in ignored {
        reqs.push(UpdateRequest::new(
            ResourceKind::GatewayClass,
            gc.nsname.clone(),
            gateway_class_setter(GatewayClassStatus {
                conditions: convert(&[conditions::gateway_class_conflict()], gc.generation, time),
            }),
        ));
    }

    reqs
}

pub fn prepare_gateway_requests(
    gateways: &[GraphGateway],
    ignored: &[GraphObject],
    time: &str,
    reload_error: Option<&ReloadError>,
) -> Vec<UpdateRequest> {
    let mut reqs = Vec::with_capacity(gateways.len() + ignored.len());

    for gw in gateways {
        reqs.push(prepare_gateway_request(gw, time, reload_error));
    }

    for gw in ignored {
        reqs.push(UpdateRequest::new(
            ResourceKind::Gateway,
            gw.nsname.clone(),
            gateway_setter(GatewayStatus {
                conditions: convert(&conditions::gateway_conflict(), gw.generation, time),
                ..Default::default()
            }),
        ));
    }

    reqs
}

fn prepare_gateway_request(
    gw: &GraphGateway,
    time: &str,
    reload_error: Option<&ReloadError>,
) -> UpdateRequest {
    let listeners = gw
        .listeners
        .iter()
        .map(|l| {
            let mut conds = conditions::default_listener_conditions();
            conds.extend(l.conditions.iter().cloned());
            if reload_error.is_some() {
                conds.push(conditions::listener_not_programmed_invalid(
                    conditions::LISTENER_MESSAGE_FAILED_RELOAD,
                ));
            }

            ListenerStatus {
                name: l.name.clone(),
                supported_kinds: l.supported_kinds.clone(),
                attached_routes: l.attached_routes,
                conditions: convert(&deduplicate(conds), gw.generation, time),
            }
        })
        .collect();

    let mut conds = conditions::default_gateway_conditions();
    conds.extend(gw.conditions.iter().cloned());
    if reload_error.is_some() {
        conds.push(conditions::gateway_not_programmed_invalid(
            conditions::GATEWAY_MESSAGE_FAILED_RELOAD,
        ));
    }

    UpdateRequest::new(
        ResourceKind::Gateway,
        gw.nsname.clone(),
        gateway_setter(GatewayStatus {
            addresses: gw.addresses.clone(),
            conditions: convert(&deduplicate(conds), gw.generation, time),
            listeners,
        }),
    )
}

pub fn prepare_route_requests(
    routes: &[GraphRoute],
    controller_name: &str,
    time: &str,
    reload_error: Option<&ReloadError>,
) -> Vec<UpdateRequest> {
    routes
        .iter()
        .map(|route| {
            let parents = route
                .parents
                .iter()
                .map(|parent| {
                    let mut conds: Vec<Condition> = conditions::default_route_conditions();
                    conds.extend(route.conditions.iter().cloned());
                    conds.extend(parent.failed_condition.iter().cloned());
                    if reload_error.is_some() {
                        conds.push(conditions::route_gateway_not_programmed(
                            conditions::ROUTE_MESSAGE_FAILED_RELOAD,
                        ));
                    }

                    RouteParentStatus {
                        parent_ref: ParentReference {
                            namespace: Some(parent.gateway.namespace.clone()),
                            name: parent.gateway.name.clone(),
                            section_name: parent.section_name.clone(),
                            ..Default::default()
                        },
                        controller_name: controller_name.to_string(),
                        conditions: convert(&deduplicate(conds), route.generation, time),
                    }
                })
                .collect();

            UpdateRequest::new(
                route.kind,
                route.nsname.clone(),
                route_setter(controller_name.to_string(), parents),
            )
        })
        .collect()
}

/// Policies without ancestors get no request
pub fn prepare_policy_requests(
    policies: &[GraphPolicy],
    controller_name: &str,
    time: &str,
) -> Vec<UpdateRequest> {
    policies
        .iter()
        .filter(|p| !p.ancestors.is_empty())
        .map(|policy| {
            let ancestors = policy
                .ancestors
                .iter()
                .map(|ancestor| {
                    let mut conds = vec![conditions::policy_accepted()];
                    conds.extend(policy.conditions.iter().cloned());

                    PolicyAncestorStatus {
                        ancestor_ref: ancestor.clone(),
                        controller_name: controller_name.to_string(),
                        conditions: convert(&deduplicate(conds), policy.generation, time),
                    }
                })
                .collect();

            UpdateRequest::new(
                policy.kind,
                policy.nsname.clone(),
                policy_setter(controller_name.to_string(), ancestors),
            )
        })
        .collect()
}

/// Request reporting whether the control-plane configuration was applied
pub fn prepare_nginx_gateway_request(
    config: &NginxGateway,
    condition: Condition,
    time: &str,
) -> UpdateRequest {
    let generation = config.metadata.generation.unwrap_or_default();
    UpdateRequest::new(
        ResourceKind::NginxGateway,
        NamespacedName::from_meta(&config.metadata),
        nginx_gateway_setter(NginxGatewayStatus {
            conditions: convert(&[condition], generation, time),
        }),
    )
}
