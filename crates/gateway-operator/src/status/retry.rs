//! Retry-until-done status writes
//!
//! [`retry_update_fn`] turns one [`UpdateRequest`] into a condition that can be
//! polled repeatedly; [`poll_with_backoff`] drives any such condition with
//! exponential backoff.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use rand::Rng;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::status::updater::UpdateRequest;
use crate::store::{ObjectStore, StoreError};

/// Exponential backoff parameters
#[derive(Clone, Debug, PartialEq)]
pub struct Backoff {
    /// Delay before the second attempt
    pub duration: Duration,
    /// Multiplier applied to the delay after each attempt
    pub factor: f64,
    /// Up to this fraction of the delay is added at random
    pub jitter: f64,
    /// Maximum number of attempts
    pub steps: u32,
    /// Upper bound on the delay
    pub cap: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            duration: Duration::from_millis(200),
            factor: 2.0,
            jitter: 0.5,
            steps: 4,
            cap: Duration::from_secs(3),
        }
    }
}

impl Backoff {
    /// Clamp parameters into a usable range
    ///
    /// At least one attempt is made and delays never shrink. Jitter is kept
    /// within `0.0..=1.0`; NaN becomes no jitter.
    pub fn normalized(mut self) -> Self {
        self.steps = self.steps.max(1);
        if !self.factor.is_finite() || self.factor < 1.0 {
            self.factor = 1.0;
        }
        self.jitter = if self.jitter.is_nan() {
            0.0
        } else {
            self.jitter.clamp(0.0, 1.0)
        };
        self
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 {
            return delay;
        }
        let extra = rand::thread_rng().gen_range(0.0..=self.jitter);
        delay.saturating_add(scale(delay, extra, self.cap))
    }

    fn next(&self, delay: Duration) -> Duration {
        scale(delay, self.factor, self.cap).min(self.cap)
    }
}

/// `delay * factor`, or `overflow` when that is not a representable duration
fn scale(delay: Duration, factor: f64, overflow: Duration) -> Duration {
    Duration::try_from_secs_f64(delay.as_secs_f64() * factor).unwrap_or(overflow)
}

#[derive(Debug, Error)]
pub enum PollError<E: std::error::Error + 'static> {
    #[error("condition not met after {0} attempts")]
    Exhausted(u32),

    #[error("polling cancelled")]
    Cancelled,

    #[error("condition failed: {0}")]
    Condition(#[source] E),
}

/// Run `condition` until it reports done, fails, runs out of steps, or the token is cancelled
pub async fn poll_with_backoff<F, Fut, E>(
    token: &CancellationToken,
    backoff: &Backoff,
    mut condition: F,
) -> Result<(), PollError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
    E: std::error::Error + 'static,
{
    let backoff = backoff.clone().normalized();
    let mut delay = backoff.duration;

    for attempt in 1..=backoff.steps {
        if token.is_cancelled() {
            return Err(PollError::Cancelled);
        }

        match condition().await {
            Ok(true) => return Ok(()),
            Ok(false) => {}
            Err(e) => return Err(PollError::Condition(e)),
        }

        if attempt == backoff.steps {
            break;
        }

        let wait = backoff.jittered(delay);
        debug!(attempt, delay_ms = wait.as_millis() as u64, "Condition not met, backing off");
        tokio::select! {
            _ = token.cancelled() => return Err(PollError::Cancelled),
            _ = tokio::time::sleep(wait) => {}
        }
        delay = backoff.next(delay);
    }

    Err(PollError::Exhausted(backoff.steps))
}

/// Build a condition that performs one read-merge-write cycle per call
///
/// The condition reports done when the object is gone, when no change is
/// needed, or when the write succeeds. Read and write failures report not done
/// so the driver decides when to try again.
pub fn retry_update_fn(
    store: Arc<dyn ObjectStore>,
    request: UpdateRequest,
) -> impl Fn() -> BoxFuture<'static, Result<bool, StoreError>> + Send + Sync {
    move || {
        let store = store.clone();
        let request = request.clone();
        async move {
            let mut obj = match store.get(request.kind, &request.nsname).await {
                Ok(obj) => obj,
                Err(e) if e.is_not_found() => return Ok(true),
                Err(e) => {
                    debug!(
                        kind = %request.kind,
                        object = %request.nsname,
                        error = %e,
                        "Failed to get object, will retry"
                    );
                    return Ok(false);
                }
            };

            if !request.setter.apply(&mut obj) {
                return Ok(true);
            }

            if let Err(e) = store.update_status(&obj).await {
                debug!(
                    kind = %request.kind,
                    object = %request.nsname,
                    conflict = e.is_conflict(),
                    error = %e,
                    "Failed to update status, will retry"
                );
                return Ok(false);
            }

            Ok(true)
        }
        .boxed()
    }
}
