//! NginxGateway CRD: the controller's own runtime configuration object

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::Condition;

/// NginxGateway spec
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "gateway.nginx.org",
    version = "v1alpha1",
    kind = "NginxGateway",
    plural = "nginxgateways",
    status = "NginxGatewayStatus",
    namespaced,
    printcolumn = r#"{"name":"Valid", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Valid\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct NginxGatewaySpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<Logging>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Logging {
    /// One of "info", "debug", "error"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NginxGatewayStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl NginxGatewaySpec {
    /// Validate the spec, returning a message describing the first problem
    pub fn validate(&self) -> Result<(), String> {
        match self.logging.as_ref().and_then(|l| l.level.as_deref()) {
            None | Some("info") | Some("debug") | Some("error") => Ok(()),
            Some(other) => Err(format!(
                "spec.logging.level: Unsupported value: \"{other}\": supported values: \"info\", \"debug\", \"error\""
            )),
        }
    }
}
