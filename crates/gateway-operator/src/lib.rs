//! gateway-operator: Gateway API status synchronization control plane

pub mod api;
pub mod config;
pub mod controllers;
pub mod events;
pub mod graph;
pub mod handler;
pub mod health;
pub mod kinds;
pub mod leader;
pub mod logging;
pub mod state;
pub mod status;
pub mod store;

pub use config::OperatorConfig;
pub use kinds::{NamespacedName, Resource, ResourceKind};
