//! Resource types watched by the operator
//!
//! A subset of the Gateway API (`gateway.networking.k8s.io`) plus the
//! controller-owned CRDs in `gateway.nginx.org`. Only the fields the status
//! pipeline reads or writes are modelled; unknown fields are ignored on
//! deserialization.

pub mod gateway;
pub mod nginx;
pub mod policy;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub use gateway::{
    GatewayClass, GatewayClassSpec, GatewayClassStatus, Gateway, GatewaySpec, GatewayStatus,
    GatewayStatusAddress, GrpcRoute, GrpcRouteSpec, HttpRoute, HttpRouteSpec, Listener,
    ListenerStatus, RouteGroupKind, RouteParentStatus, RouteStatus,
};
pub use nginx::{NginxGateway, NginxGatewaySpec, NginxGatewayStatus};
pub use policy::{
    ClientSettingsPolicy, ClientSettingsPolicySpec, LocalPolicyTargetReference,
    ObservabilityPolicy, ObservabilityPolicySpec, PolicyAncestorStatus, PolicyStatus,
};

/// Kubernetes-style status condition as written to the API
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition (e.g., "Accepted", "Programmed")
    #[serde(rename = "type")]
    pub type_: String,
    /// Status: "True", "False", or "Unknown"
    pub status: String,
    /// Generation of the spec the condition was computed from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    /// Last time the condition was written (RFC 3339)
    #[serde(default)]
    pub last_transition_time: String,
    /// Machine-readable reason for the condition
    #[serde(default)]
    pub reason: String,
    /// Human-readable message
    #[serde(default)]
    pub message: String,
}

/// Reference from a route (or policy ancestor) to its parent resource
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ParentReference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_condition() {
        let yaml = r#"
type: Accepted
status: "True"
observedGeneration: 3
lastTransitionTime: "2024-01-01T00:00:00Z"
reason: Accepted
message: Route is accepted
"#;
        let cond: Condition = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cond.type_, "Accepted");
        assert_eq!(cond.status, "True");
        assert_eq!(cond.observed_generation, Some(3));
        assert_eq!(cond.reason, "Accepted");
    }

    #[test]
    fn test_parent_reference_skips_unset_fields() {
        let parent = ParentReference {
            name: "gateway".to_string(),
            ..Default::default()
        };
        let json = serde_json::to_value(&parent).unwrap();
        assert_eq!(json, serde_json::json!({ "name": "gateway" }));
    }
}
