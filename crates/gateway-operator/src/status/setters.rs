//! Status equality and merge logic per kind
//!
//! Each setter compares the desired status against what is stored on the
//! fetched object and only mutates it when something observable differs.
//! Route parents and policy ancestors written by other controllers are
//! carried over untouched.

use tracing::error;

use crate::api::{
    Condition, GatewayClassStatus, GatewayStatus, NginxGatewayStatus, ParentReference,
    PolicyAncestorStatus, PolicyStatus, RouteParentStatus, RouteStatus,
};
use crate::kinds::{Resource, ResourceKind};
use crate::status::updater::Setter;

/// Compare optional values, treating absent as the default value
pub fn options_equal<T: Default + PartialEq>(a: &Option<T>, b: &Option<T>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a == b,
        (Some(v), None) | (None, Some(v)) => *v == T::default(),
    }
}

/// Order-sensitive comparison of condition lists
///
/// `lastTransitionTime` is ignored.
pub fn conditions_equal(prev: &[Condition], cur: &[Condition]) -> bool {
    prev.len() == cur.len()
        && prev.iter().zip(cur).all(|(p, c)| {
            p.type_ == c.type_
                && p.status == c.status
                && p.reason == c.reason
                && p.message == c.message
                && p.observed_generation == c.observed_generation
        })
}

fn parent_ref_equal(a: &ParentReference, b: &ParentReference) -> bool {
    a.name == b.name
        && options_equal(&a.namespace, &b.namespace)
        && options_equal(&a.section_name, &b.section_name)
}

fn ancestor_ref_equal(a: &ParentReference, b: &ParentReference) -> bool {
    a.name == b.name
        && options_equal(&a.namespace, &b.namespace)
        && options_equal(&a.group, &b.group)
        && options_equal(&a.kind, &b.kind)
}

fn route_parent_status_equal(a: &RouteParentStatus, b: &RouteParentStatus) -> bool {
    a.controller_name == b.controller_name
        && parent_ref_equal(&a.parent_ref, &b.parent_ref)
        && conditions_equal(&a.conditions, &b.conditions)
}

fn ancestor_status_equal(a: &PolicyAncestorStatus, b: &PolicyAncestorStatus) -> bool {
    a.controller_name == b.controller_name
        && ancestor_ref_equal(&a.ancestor_ref, &b.ancestor_ref)
        && conditions_equal(&a.conditions, &b.conditions)
}

/// Order-insensitive comparison of the entries owned by `controller_name`
fn owned_entries_equal<T>(
    controller_name: &str,
    prev: &[T],
    cur: &[T],
    owner: impl Fn(&T) -> &str,
    eq: impl Fn(&T, &T) -> bool,
) -> bool {
    let prev: Vec<&T> = prev.iter().filter(|&e| owner(e) == controller_name).collect();
    let cur: Vec<&T> = cur.iter().filter(|&e| owner(e) == controller_name).collect();

    prev.len() == cur.len()
        && prev.iter().all(|&p| cur.iter().any(|&c| eq(p, c)))
        && cur.iter().all(|&c| prev.iter().any(|&p| eq(c, p)))
}

pub fn route_status_equal(
    controller_name: &str,
    prev: &[RouteParentStatus],
    cur: &[RouteParentStatus],
) -> bool {
    owned_entries_equal(
        controller_name,
        prev,
        cur,
        |p| p.controller_name.as_str(),
        route_parent_status_equal,
    )
}

pub fn policy_status_equal(
    controller_name: &str,
    prev: &[PolicyAncestorStatus],
    cur: &[PolicyAncestorStatus],
) -> bool {
    owned_entries_equal(
        controller_name,
        prev,
        cur,
        |a| a.controller_name.as_str(),
        ancestor_status_equal,
    )
}

pub fn gateway_status_equal(prev: &GatewayStatus, cur: &GatewayStatus) -> bool {
    let addresses_equal = prev.addresses.len() == cur.addresses.len()
        && prev
            .addresses
            .iter()
            .zip(&cur.addresses)
            .all(|(a, b)| options_equal(&a.type_, &b.type_) && a.value == b.value);
    if !addresses_equal {
        return false;
    }

    if !conditions_equal(&prev.conditions, &cur.conditions) {
        return false;
    }

    prev.listeners.len() == cur.listeners.len()
        && prev.listeners.iter().zip(&cur.listeners).all(|(a, b)| {
            a.name == b.name
                && a.attached_routes == b.attached_routes
                && conditions_equal(&a.conditions, &b.conditions)
                && a.supported_kinds.len() == b.supported_kinds.len()
                && a
                    .supported_kinds
                    .iter()
                    .zip(&b.supported_kinds)
                    .all(|(k1, k2)| k1.kind == k2.kind && options_equal(&k1.group, &k2.group))
        })
}

fn mismatch(expected: &str, actual: ResourceKind) -> bool {
    error!(
        expected,
        actual = %actual,
        "Status setter applied to an object of the wrong kind"
    );
    false
}

pub fn gateway_class_setter(status: GatewayClassStatus) -> Setter {
    Setter::new(move |resource| {
        let kind = resource.kind();
        let Resource::GatewayClass(gc) = resource else {
            return mismatch("GatewayClass", kind);
        };
        let prev = gc.status.as_ref().map(|s| s.conditions.as_slice()).unwrap_or_default();
        if conditions_equal(prev, &status.conditions) {
            return false;
        }
        gc.status = Some(status.clone());
        true
    })
}

pub fn gateway_setter(status: GatewayStatus) -> Setter {
    Setter::new(move |resource| {
        let kind = resource.kind();
        let Resource::Gateway(gw) = resource else {
            return mismatch("Gateway", kind);
        };
        let prev = gw.status.clone().unwrap_or_default();
        if gateway_status_equal(&prev, &status) {
            return false;
        }
        gw.status = Some(status.clone());
        true
    })
}

/// Setter for HTTPRoute and GRPCRoute
///
/// `parents` holds only this controller's entries; other controllers' entries
/// on the stored object are kept ahead of them.
pub fn route_setter(controller_name: String, parents: Vec<RouteParentStatus>) -> Setter {
    Setter::new(move |resource| {
        let kind = resource.kind();
        let current = match resource {
            Resource::HttpRoute(r) => &mut r.status,
            Resource::GrpcRoute(r) => &mut r.status,
            _ => return mismatch("HTTPRoute or GRPCRoute", kind),
        };
        let prev = current.as_ref().map(|s| s.parents.as_slice()).unwrap_or_default();

        let mut merged: Vec<RouteParentStatus> = prev
            .iter()
            .filter(|p| p.controller_name != controller_name)
            .cloned()
            .collect();
        merged.extend(parents.iter().cloned());

        if route_status_equal(&controller_name, prev, &merged) {
            return false;
        }
        *current = Some(RouteStatus { parents: merged });
        true
    })
}

/// Setter for ClientSettingsPolicy and ObservabilityPolicy
pub fn policy_setter(controller_name: String, ancestors: Vec<PolicyAncestorStatus>) -> Setter {
    Setter::new(move |resource| {
        let kind = resource.kind();
        let current = match resource {
            Resource::ClientSettingsPolicy(p) => &mut p.status,
            Resource::ObservabilityPolicy(p) => &mut p.status,
            _ => return mismatch("policy", kind),
        };
        let prev = current.as_ref().map(|s| s.ancestors.as_slice()).unwrap_or_default();

        let mut merged: Vec<PolicyAncestorStatus> = prev
            .iter()
            .filter(|a| a.controller_name != controller_name)
            .cloned()
            .collect();
        merged.extend(ancestors.iter().cloned());

        if policy_status_equal(&controller_name, prev, &merged) {
            return false;
        }
        *current = Some(PolicyStatus { ancestors: merged });
        true
    })
}

pub fn nginx_gateway_setter(status: NginxGatewayStatus) -> Setter {
    Setter::new(move |resource| {
        let kind = resource.kind();
        let Resource::NginxGateway(ng) = resource else {
            return mismatch("NginxGateway", kind);
        };
        let prev = ng.status.as_ref().map(|s| s.conditions.as_slice()).unwrap_or_default();
        if conditions_equal(prev, &status.conditions) {
            return false;
        }
        ng.status = Some(status.clone());
        true
    })
}
