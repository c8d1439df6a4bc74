//! Leader-gated status updates
//!
//! Until this instance becomes leader, the latest requests of each group are
//! buffered instead of written. Enabling flushes every buffered group once;
//! after that, updates go straight through.

use std::collections::HashMap;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::status::updater::{UpdateRequest, Updater};

/// Wiring bugs the process cannot recover from
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("leader-aware group updater is already enabled")]
    AlreadyEnabled,
}

#[derive(Default)]
struct GroupState {
    enabled: bool,
    groups: HashMap<String, Vec<UpdateRequest>>,
}

pub struct LeaderAwareGroupUpdater {
    updater: Updater,
    state: Mutex<GroupState>,
}

impl LeaderAwareGroupUpdater {
    /// Create a disabled group updater
    pub fn new(updater: Updater) -> Self {
        Self {
            updater,
            state: Mutex::new(GroupState::default()),
        }
    }

    /// Submit the current requests for a group
    ///
    /// While disabled, the requests replace whatever was buffered for the
    /// group, and an empty list drops the group.
    pub async fn update_group(
        &self,
        token: &CancellationToken,
        name: &str,
        requests: Vec<UpdateRequest>,
    ) {
        let mut state = self.state.lock().await;

        if state.enabled {
            self.updater.update(token, requests).await;
            return;
        }

        if requests.is_empty() {
            state.groups.remove(name);
            debug!(group = name, "Cleared buffered status updates");
        } else {
            debug!(
                group = name,
                requests = requests.len(),
                "Not leader, buffering status updates"
            );
            state.groups.insert(name.to_string(), requests);
        }
    }

    /// Start writing and flush every buffered group
    ///
    /// Must be called at most once.
    pub async fn enable(&self, token: &CancellationToken) -> Result<(), FatalError> {
        let mut state = self.state.lock().await;

        if state.enabled {
            error!("Group updater enabled twice");
            return Err(FatalError::AlreadyEnabled);
        }
        state.enabled = true;

        let groups = std::mem::take(&mut state.groups);
        info!(groups = groups.len(), "Enabled status updates, flushing buffered groups");

        for (name, requests) in groups {
            debug!(group = %name, "Flushing buffered status updates");
            self.updater.update(token, requests).await;
        }

        Ok(())
    }

    pub async fn is_enabled(&self) -> bool {
        self.state.lock().await.enabled
    }
}
