//! Requeue policy with exponential backoff for failed reconciliations

use std::collections::HashMap;
use std::time::Duration;

use kube::runtime::controller::Action;
use parking_lot::Mutex;
use tracing::{debug, warn};

/// Maximum number of retries before giving up
const MAX_RETRIES: u32 = 10;

/// Base delay for exponential backoff (seconds)
const BASE_DELAY_SECS: u64 = 5;

/// Maximum delay between retries (1 hour)
const MAX_DELAY_SECS: u64 = 3600;

/// Tracks retry attempts per object
///
/// Called from `error_policy`, which is synchronous, so the lock never spans
/// an await.
#[derive(Debug, Default)]
pub struct RetryTracker {
    /// Map of object key to retry count
    attempts: Mutex<HashMap<String, u32>>,
}

impl RetryTracker {
    pub fn new() -> Self {
        Self {
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Increment retry count for an object and return the new count
    pub fn increment(&self, key: &str) -> u32 {
        let mut attempts = self.attempts.lock();
        let count = attempts.entry(key.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// Reset retry count (call on successful reconciliation)
    pub fn reset(&self, key: &str) {
        self.attempts.lock().remove(key);
    }

    pub fn get(&self, key: &str) -> u32 {
        self.attempts.lock().get(key).copied().unwrap_or(0)
    }
}

/// Determine the requeue action for a failed attempt
pub fn compute_backoff(attempt: u32) -> Action {
    if attempt >= MAX_RETRIES {
        warn!(
            attempt,
            max_retries = MAX_RETRIES,
            "Max retries exceeded, waiting for resource change"
        );
        return Action::await_change();
    }

    // 5s, 10s, 20s, 40s, ... up to 1 hour
    let delay_secs = BASE_DELAY_SECS * 2u64.pow(attempt.saturating_sub(1));
    let capped_delay = delay_secs.min(MAX_DELAY_SECS);
    debug!(
        attempt,
        delay_secs = capped_delay,
        "Scheduling retry with exponential backoff"
    );
    Action::requeue(Duration::from_secs(capped_delay))
}
