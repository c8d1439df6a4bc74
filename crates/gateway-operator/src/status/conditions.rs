//! Controller-side conditions and their conversion to API conditions
//!
//! Producers list default conditions first and more specific ones after;
//! [`deduplicate`] then keeps the last condition of each type.

use std::collections::HashMap;
use std::fmt;

use crate::api;

/// Condition status values
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl ConditionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ConditionStatus::True => "True",
            ConditionStatus::False => "False",
            ConditionStatus::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A condition before it is stamped with generation and time
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Condition {
    pub type_: String,
    pub status: ConditionStatus,
    pub reason: String,
    pub message: String,
}

impl Condition {
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
        }
    }
}

pub const GATEWAY_MESSAGE_FAILED_RELOAD: &str = "The Gateway is not programmed due to a failure to \
    reload nginx with the configuration. Please see the nginx container logs for any possible configuration issues";

pub const LISTENER_MESSAGE_FAILED_RELOAD: &str = "The Listener is not programmed due to a failure to \
    reload nginx with the configuration. Please see the nginx container logs for any possible configuration issues.";

pub const ROUTE_MESSAGE_FAILED_RELOAD: &str = "The Gateway is not programmed due to a failure to \
    reload nginx with the configuration. Please see the nginx container logs for any possible configuration issues. \
    NGINX may still be configured for this Route. However, future updates to this resource will not be configured \
    until the Gateway is programmed again";

/// Remove conditions with duplicate types
///
/// The last condition of each type wins; the result keeps the order in which
/// each distinct type first appeared.
pub fn deduplicate(conds: Vec<Condition>) -> Vec<Condition> {
    let mut positions: HashMap<String, usize> = HashMap::with_capacity(conds.len());
    let mut result: Vec<Condition> = Vec::with_capacity(conds.len());

    for cond in conds {
        match positions.get(&cond.type_) {
            Some(&idx) => result[idx] = cond,
            None => {
                positions.insert(cond.type_.clone(), result.len());
                result.push(cond);
            }
        }
    }

    result
}

/// Stamp conditions with the source generation and transition time
pub fn convert(conds: &[Condition], observed_generation: i64, time: &str) -> Vec<api::Condition> {
    conds
        .iter()
        .map(|c| api::Condition {
            type_: c.type_.clone(),
            status: c.status.as_str().to_string(),
            observed_generation: Some(observed_generation),
            last_transition_time: time.to_string(),
            reason: c.reason.clone(),
            message: c.message.clone(),
        })
        .collect()
}

pub fn default_gateway_class_conditions() -> Vec<Condition> {
    vec![
        Condition::new(
            "Accepted",
            ConditionStatus::True,
            "Accepted",
            "GatewayClass is accepted",
        ),
        Condition::new(
            "SupportedVersion",
            ConditionStatus::True,
            "SupportedVersion",
            "Gateway API CRD versions are supported",
        ),
    ]
}

pub fn gateway_class_conflict() -> Condition {
    Condition::new(
        "Accepted",
        ConditionStatus::False,
        "GatewayClassConflict",
        "The resource is ignored due to a conflicting GatewayClass resource",
    )
}

pub fn default_gateway_conditions() -> Vec<Condition> {
    vec![
        Condition::new(
            "Accepted",
            ConditionStatus::True,
            "Accepted",
            "Gateway is accepted",
        ),
        Condition::new(
            "Programmed",
            ConditionStatus::True,
            "Programmed",
            "Gateway is programmed",
        ),
    ]
}

/// Conditions for a gateway this controller declines to program
pub fn gateway_conflict() -> Vec<Condition> {
    const MESSAGE: &str = "The resource is ignored due to a conflicting Gateway resource";
    vec![
        Condition::new("Accepted", ConditionStatus::False, "GatewayConflict", MESSAGE),
        Condition::new("Programmed", ConditionStatus::False, "GatewayConflict", MESSAGE),
    ]
}

pub fn gateway_not_programmed_invalid(msg: impl Into<String>) -> Condition {
    Condition::new("Programmed", ConditionStatus::False, "Invalid", msg)
}

pub fn default_listener_conditions() -> Vec<Condition> {
    vec![
        Condition::new(
            "Accepted",
            ConditionStatus::True,
            "Accepted",
            "Listener is accepted",
        ),
        Condition::new(
            "Programmed",
            ConditionStatus::True,
            "Programmed",
            "Listener is programmed",
        ),
        Condition::new(
            "ResolvedRefs",
            ConditionStatus::True,
            "ResolvedRefs",
            "All references are resolved",
        ),
        Condition::new(
            "Conflicted",
            ConditionStatus::False,
            "NoConflicts",
            "No conflicts",
        ),
    ]
}

pub fn listener_not_programmed_invalid(msg: impl Into<String>) -> Condition {
    Condition::new("Programmed", ConditionStatus::False, "Invalid", msg)
}

pub fn default_route_conditions() -> Vec<Condition> {
    vec![
        Condition::new(
            "Accepted",
            ConditionStatus::True,
            "Accepted",
            "The route is accepted",
        ),
        Condition::new(
            "ResolvedRefs",
            ConditionStatus::True,
            "ResolvedRefs",
            "All references are resolved",
        ),
    ]
}

pub fn route_gateway_not_programmed(msg: impl Into<String>) -> Condition {
    Condition::new(
        "Accepted",
        ConditionStatus::False,
        "GatewayNotProgrammed",
        msg,
    )
}

pub fn nginx_gateway_valid() -> Condition {
    Condition::new(
        "Valid",
        ConditionStatus::True,
        "Valid",
        "NginxGateway is valid",
    )
}

pub fn nginx_gateway_invalid(msg: impl Into<String>) -> Condition {
    Condition::new("Valid", ConditionStatus::False, "Invalid", msg)
}

pub fn policy_accepted() -> Condition {
    Condition::new(
        "Accepted",
        ConditionStatus::True,
        "Accepted",
        "Policy is accepted",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cond(type_: &str, message: &str) -> Condition {
        Condition::new(type_, ConditionStatus::True, "Reason", message)
    }

    #[test]
    fn test_deduplicate_last_wins_first_seen_order() {
        let input = vec![cond("X", "1"), cond("Y", "2"), cond("X", "3")];

        let result = deduplicate(input);

        assert_eq!(result, vec![cond("X", "3"), cond("Y", "2")]);
    }

    #[test]
    fn test_deduplicate_empty_and_unique() {
        assert!(deduplicate(vec![]).is_empty());

        let unique = vec![cond("A", "a"), cond("B", "b"), cond("C", "c")];
        assert_eq!(deduplicate(unique.clone()), unique);
    }

    #[test]
    fn test_defaults_overridden_by_specific() {
        let mut conds = default_gateway_conditions();
        conds.push(gateway_not_programmed_invalid(GATEWAY_MESSAGE_FAILED_RELOAD));

        let result = deduplicate(conds);

        assert_eq!(result.len(), 2);
        assert_eq!(result[0].type_, "Accepted");
        assert_eq!(result[1].type_, "Programmed");
        assert_eq!(result[1].status, ConditionStatus::False);
        assert_eq!(result[1].reason, "Invalid");
    }

    #[test]
    fn test_convert_stamps_generation_and_time() {
        let converted = convert(&[nginx_gateway_valid()], 7, "2024-01-01T00:00:00Z");

        assert_eq!(converted.len(), 1);
        assert_eq!(converted[0].type_, "Valid");
        assert_eq!(converted[0].status, "True");
        assert_eq!(converted[0].observed_generation, Some(7));
        assert_eq!(converted[0].last_transition_time, "2024-01-01T00:00:00Z");
        assert_eq!(converted[0].message, "NginxGateway is valid");
    }
}
