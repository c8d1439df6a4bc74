//! Attached policy CRDs (`gateway.nginx.org/v1alpha1`)
//!
//! Policies report per-ancestor status entries, each owned by the controller
//! that wrote it.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{Condition, ParentReference};

/// Reference to the resource a policy attaches to
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LocalPolicyTargetReference {
    pub group: String,
    pub kind: String,
    pub name: String,
}

/// ClientSettingsPolicy spec
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "gateway.nginx.org",
    version = "v1alpha1",
    kind = "ClientSettingsPolicy",
    plural = "clientsettingspolicies",
    shortname = "cspolicy",
    status = "PolicyStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ClientSettingsPolicySpec {
    pub target_ref: LocalPolicyTargetReference,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<ClientBody>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClientBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
}

/// ObservabilityPolicy spec
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "gateway.nginx.org",
    version = "v1alpha1",
    kind = "ObservabilityPolicy",
    plural = "observabilitypolicies",
    status = "PolicyStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ObservabilityPolicySpec {
    #[serde(default)]
    pub target_refs: Vec<LocalPolicyTargetReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracing: Option<TracingSettings>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TracingSettings {
    pub strategy: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ratio: Option<i32>,
}

/// Status shared by all policy kinds
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PolicyStatus {
    #[serde(default)]
    pub ancestors: Vec<PolicyAncestorStatus>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PolicyAncestorStatus {
    pub ancestor_ref: ParentReference,
    pub controller_name: String,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_client_settings_policy() {
        let yaml = r#"
targetRef:
  group: gateway.networking.k8s.io
  kind: Gateway
  name: gateway
body:
  maxSize: 10m
"#;
        let spec: ClientSettingsPolicySpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.target_ref.kind, "Gateway");
        assert_eq!(
            spec.body.and_then(|b| b.max_size).as_deref(),
            Some("10m")
        );
    }

    #[test]
    fn test_deserialize_observability_policy() {
        let yaml = r#"
targetRefs:
  - group: gateway.networking.k8s.io
    kind: HTTPRoute
    name: coffee
tracing:
  strategy: ratio
  ratio: 25
"#;
        let spec: ObservabilityPolicySpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.target_refs.len(), 1);
        assert_eq!(spec.tracing.unwrap().ratio, Some(25));
    }
}
