//! Leader election for running multiple operator replicas safely.
//!
//! Uses the Kubernetes Lease API via `kube-leader-election`. Every replica
//! watches the cluster and keeps its view current, but only the lease holder
//! writes statuses: acquiring the lease enables the group updater, and losing
//! it exits the process.
//!
//! ```text
//! ┌──────────────────────┐     ┌──────────────────────┐
//! │   Pod A (Leader)     │     │   Pod B (Standby)    │
//! │ events + status      │     │ events, statuses     │
//! │ writes enabled       │     │ buffered per group   │
//! └──────────┬───────────┘     └──────────┬───────────┘
//!            │                            │
//!            ▼                            ▼
//!       ┌──────────────────────────────────────┐
//!       │     Lease: gateway-operator-leader   │
//!       └──────────────────────────────────────┘
//! ```

use std::time::Duration;

use anyhow::{ensure, Context, Result};
use k8s_openapi::api::coordination::v1::Lease;
use kube::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, trace, warn};

use crate::config::parse_secs_env;

/// Maximum consecutive renewal failures before exiting.
const MAX_RENEWAL_FAILURES: u32 = 3;

/// Configuration for leader election.
///
/// Use [`LeaderElectionConfig::from_env()`] to read it from the pod
/// environment, or [`LeaderElectionConfig::new()`] for validated
/// programmatic construction.
#[derive(Debug, Clone)]
pub struct LeaderElectionConfig {
    enabled: bool,
    lease_name: String,
    namespace: String,
    holder_id: String,
    lease_duration: Duration,
    renew_interval: Duration,
}

impl LeaderElectionConfig {
    /// Create an enabled configuration.
    ///
    /// # Errors
    ///
    /// Fails if any name is empty or if `renew_interval >= lease_duration`.
    pub fn new(
        lease_name: String,
        namespace: String,
        holder_id: String,
        lease_duration: Duration,
        renew_interval: Duration,
    ) -> Result<Self> {
        ensure!(!lease_name.is_empty(), "lease_name cannot be empty");
        ensure!(!namespace.is_empty(), "namespace cannot be empty");
        ensure!(!holder_id.is_empty(), "holder_id cannot be empty");
        ensure!(
            renew_interval < lease_duration,
            "renew_interval ({:?}) must be less than lease_duration ({:?})",
            renew_interval,
            lease_duration
        );

        Ok(Self {
            enabled: true,
            lease_name,
            namespace,
            holder_id,
            lease_duration,
            renew_interval,
        })
    }

    /// Leader election off: this replica writes statuses from startup.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            lease_name: String::new(),
            namespace: String::new(),
            holder_id: String::new(),
            lease_duration: Duration::from_secs(15),
            renew_interval: Duration::from_secs(5),
        }
    }

    /// Load configuration from environment variables.
    ///
    /// - `LEADER_ELECTION_ENABLED`: "true" to enable (default: false)
    /// - `LEADER_ELECTION_LEASE_NAME`: Lease name (required if enabled)
    /// - `POD_NAMESPACE`: Namespace for the lease (required if enabled)
    /// - `POD_NAME`: holder identity (required if enabled)
    /// - `LEADER_ELECTION_LEASE_DURATION`: TTL in seconds (default: 15)
    /// - `LEADER_ELECTION_RENEW_INTERVAL`: renewal interval in seconds (default: 5)
    pub fn from_env() -> Result<Self> {
        let enabled = std::env::var("LEADER_ELECTION_ENABLED")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        if !enabled {
            return Ok(Self::disabled());
        }

        let lease_name = std::env::var("LEADER_ELECTION_LEASE_NAME")
            .context("LEADER_ELECTION_LEASE_NAME required when leader election is enabled")?;
        let namespace = std::env::var("POD_NAMESPACE")
            .context("POD_NAMESPACE required when leader election is enabled")?;
        let holder_id = std::env::var("POD_NAME")
            .context("POD_NAME required when leader election is enabled")?;

        Self::new(
            lease_name,
            namespace,
            holder_id,
            parse_secs_env("LEADER_ELECTION_LEASE_DURATION", Duration::from_secs(15)),
            parse_secs_env("LEADER_ELECTION_RENEW_INTERVAL", Duration::from_secs(5)),
        )
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn lease_name(&self) -> &str {
        &self.lease_name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    pub fn lease_duration(&self) -> Duration {
        self.lease_duration
    }

    pub fn renew_interval(&self) -> Duration {
        self.renew_interval
    }
}

/// Current holder recorded on a lease
fn holder_of(lease: Option<&Lease>) -> &str {
    lease
        .and_then(|l| l.spec.as_ref())
        .and_then(|s| s.holder_identity.as_deref())
        .unwrap_or("unknown")
}

/// Leader election manager using Kubernetes Lease API.
pub struct LeaderElection {
    lease_lock: LeaseLock,
    renew_interval: Duration,
}

impl LeaderElection {
    pub fn new(client: Client, config: &LeaderElectionConfig) -> Self {
        let lease_lock = LeaseLock::new(
            client,
            config.namespace(),
            LeaseLockParams {
                holder_id: config.holder_id().to_string(),
                lease_name: config.lease_name().to_string(),
                lease_ttl: config.lease_duration(),
            },
        );

        Self {
            lease_lock,
            renew_interval: config.renew_interval(),
        }
    }

    /// Block until this replica holds the lease.
    ///
    /// Returns `false` if the token is cancelled first.
    pub async fn acquire(&self, token: &CancellationToken) -> bool {
        info!("Attempting to acquire leadership");

        loop {
            match self.lease_lock.try_acquire_or_renew().await {
                Ok(result) if result.acquired_lease => {
                    info!(holder = %holder_of(result.lease.as_ref()), "Leadership acquired");
                    return true;
                }
                Ok(result) => {
                    info!(
                        current_holder = %holder_of(result.lease.as_ref()),
                        "Another pod is leader, waiting"
                    );
                }
                Err(e) => {
                    warn!(error = %e, "Failed to check leadership, retrying");
                }
            }

            tokio::select! {
                _ = token.cancelled() => return false,
                _ = tokio::time::sleep(self.renew_interval) => {}
            }
        }
    }

    /// Spawn a background task that renews the lease until the token is
    /// cancelled.
    ///
    /// Losing the lease to another pod, or [`MAX_RENEWAL_FAILURES`]
    /// consecutive renewal errors, exits the process so a restarted pod can
    /// rejoin as a standby.
    pub fn spawn_renewal_task(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.renew_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            let mut consecutive_failures: u32 = 0;

            info!(
                interval_secs = self.renew_interval.as_secs(),
                max_failures = MAX_RENEWAL_FAILURES,
                "Starting lease renewal loop"
            );

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        info!("Lease renewal stopped");
                        return;
                    }
                    _ = interval.tick() => {}
                }

                match self.lease_lock.try_acquire_or_renew().await {
                    Ok(result) if result.acquired_lease => {
                        if consecutive_failures > 0 {
                            info!(
                                previous_failures = consecutive_failures,
                                "Lease renewed after transient failures"
                            );
                        }
                        consecutive_failures = 0;
                        trace!("Lease renewed");
                    }
                    Ok(result) => {
                        error!(
                            new_holder = %holder_of(result.lease.as_ref()),
                            "Lost leadership to another pod, exiting"
                        );
                        std::process::exit(1);
                    }
                    Err(e) => {
                        consecutive_failures += 1;
                        if consecutive_failures >= MAX_RENEWAL_FAILURES {
                            error!(
                                error = %e,
                                consecutive_failures,
                                "Failed to renew lease, exiting"
                            );
                            std::process::exit(1);
                        }
                        warn!(
                            error = %e,
                            attempt = consecutive_failures,
                            max_attempts = MAX_RENEWAL_FAILURES,
                            "Transient lease renewal failure, will retry"
                        );
                    }
                }
            }
        })
    }
}
