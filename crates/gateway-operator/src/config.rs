//! Operator configuration read from the pod environment

use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use tracing::warn;

use crate::health::{DEFAULT_HEALTH_BIND_ADDRESS, DEFAULT_HEALTH_PORT};
use crate::kinds::NamespacedName;

pub const DEFAULT_CONTROLLER_NAME: &str = "gateway.nginx.org/nginx-gateway-controller";
pub const DEFAULT_GATEWAY_CLASS_NAME: &str = "nginx";
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Value of `controllerName` on GatewayClasses this operator serves
    pub controller_name: String,
    /// Name of the GatewayClass this operator serves
    pub gateway_class_name: String,
    /// The controller-internal NginxGateway configuration object
    pub control_config: Option<NamespacedName>,
    pub update_gateway_class_status: bool,
    /// Reported as the address of every managed Gateway
    pub pod_ip: Option<IpAddr>,
    pub health_bind_address: IpAddr,
    pub health_port: u16,
    pub event_channel_capacity: usize,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            controller_name: DEFAULT_CONTROLLER_NAME.to_string(),
            gateway_class_name: DEFAULT_GATEWAY_CLASS_NAME.to_string(),
            control_config: None,
            update_gateway_class_status: true,
            pod_ip: None,
            health_bind_address: DEFAULT_HEALTH_BIND_ADDRESS,
            health_port: DEFAULT_HEALTH_PORT,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl OperatorConfig {
    /// Load configuration from environment variables.
    ///
    /// - `GATEWAY_CONTROLLER_NAME` (default: `gateway.nginx.org/nginx-gateway-controller`)
    /// - `GATEWAY_CLASS_NAME` (default: `nginx`)
    /// - `POD_NAMESPACE` and `CONTROL_CONFIG_NAME`: both set to watch the
    ///   NginxGateway configuration object
    /// - `UPDATE_GATEWAY_CLASS_STATUS` (default: true)
    /// - `POD_IP`: written to Gateway status addresses when set
    /// - `HEALTH_BIND_ADDRESS` (default: `0.0.0.0`)
    /// - `HEALTH_PORT` (default: 8081)
    /// - `EVENT_CHANNEL_CAPACITY` (default: 1)
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let control_config = match (
            non_empty_env("POD_NAMESPACE"),
            non_empty_env("CONTROL_CONFIG_NAME"),
        ) {
            (Some(namespace), Some(name)) => Some(NamespacedName::new(namespace, name)),
            (None, Some(name)) => {
                warn!(
                    name = %name,
                    "CONTROL_CONFIG_NAME set without POD_NAMESPACE, not watching control config"
                );
                None
            }
            _ => None,
        };

        // A malformed pod IP would be published on every Gateway, so reject it
        let pod_ip = non_empty_env("POD_IP")
            .map(|ip| {
                ip.parse::<IpAddr>()
                    .with_context(|| format!("POD_IP {ip:?} is not an IP address"))
            })
            .transpose()?;

        let config = Self {
            controller_name: non_empty_env("GATEWAY_CONTROLLER_NAME")
                .unwrap_or(defaults.controller_name),
            gateway_class_name: non_empty_env("GATEWAY_CLASS_NAME")
                .unwrap_or(defaults.gateway_class_name),
            control_config,
            update_gateway_class_status: parse_env(
                "UPDATE_GATEWAY_CLASS_STATUS",
                defaults.update_gateway_class_status,
            ),
            pod_ip,
            health_bind_address: parse_env(
                "HEALTH_BIND_ADDRESS",
                defaults.health_bind_address,
            ),
            health_port: parse_env("HEALTH_PORT", defaults.health_port),
            event_channel_capacity: parse_env(
                "EVENT_CHANNEL_CAPACITY",
                defaults.event_channel_capacity,
            ),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.controller_name.is_empty(),
            "controller name cannot be empty"
        );
        ensure!(
            self.controller_name.contains('/'),
            "controller name {:?} must be a domain-prefixed path (e.g. example.com/controller)",
            self.controller_name
        );
        ensure!(
            !self.gateway_class_name.is_empty(),
            "gateway class name cannot be empty"
        );
        ensure!(
            self.event_channel_capacity > 0,
            "event channel capacity must be at least 1"
        );
        Ok(())
    }
}

fn non_empty_env(var_name: &str) -> Option<String> {
    std::env::var(var_name).ok().filter(|v| !v.is_empty())
}

/// Parse an environment variable, falling back to `default` with a warning
fn parse_env<T>(var_name: &str, default: T) -> T
where
    T: FromStr + std::fmt::Debug,
    T::Err: std::fmt::Display,
{
    match std::env::var(var_name) {
        Ok(v) => match v.parse::<T>() {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(
                    env_var = var_name,
                    value = %v,
                    error = %e,
                    default = ?default,
                    "Failed to parse env var, using default"
                );
                default
            }
        },
        Err(_) => default,
    }
}

/// Parse a whole number of seconds from an environment variable
pub(crate) fn parse_secs_env(var_name: &str, default: Duration) -> Duration {
    Duration::from_secs(parse_env(var_name, default.as_secs()))
}
