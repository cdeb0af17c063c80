//! Connection health checking and replica routing
//!
//! This module holds the driver-independent half of the connection pool
//! manager: the bounded ping-retry loop used at bootstrap and the lock-free
//! round-robin router that spreads reads over replicas. The sqlx-specific
//! half lives in [`sql::pool`](crate::sql::pool).

use crate::config::SqlSettings;
use crate::hooks::StoreHooks;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Which connection of the pool a role refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionRole {
    /// The single writable connection
    Primary,
    /// General read replica by position
    Replica(usize),
    /// Search replica by position
    SearchReplica(usize),
}

impl fmt::Display for ConnectionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionRole::Primary => write!(f, "master"),
            ConnectionRole::Replica(i) => write!(f, "replica-{}", i),
            ConnectionRole::SearchReplica(i) => write!(f, "search-replica-{}", i),
        }
    }
}

/// Bounded retry policy for bootstrap pings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub attempts: u32,
    /// Delay between attempts
    pub delay: Duration,
    /// Timeout of one attempt
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 18,
            delay: Duration::from_secs(10),
            timeout: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &SqlSettings) -> Self {
        Self {
            attempts: settings.ping_attempts.max(1),
            delay: settings.ping_delay,
            timeout: settings.ping_timeout,
        }
    }
}

/// Successful ping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingReport {
    /// Attempts used, counting the successful one
    pub attempts: u32,
    /// Duration of the successful attempt
    pub response_time: Duration,
}

/// Every attempt failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingFailure {
    pub attempts: u32,
    pub last_error: String,
}

/// Ping `role` until it answers or the retry budget is spent.
///
/// Each attempt is bounded by `policy.timeout`; a timed-out attempt counts as
/// a failure. The caller decides whether exhaustion is fatal.
pub async fn ping_with_retry<F, Fut, E>(
    role: ConnectionRole,
    policy: &RetryPolicy,
    hooks: &dyn StoreHooks,
    mut ping: F,
) -> Result<PingReport, PingFailure>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: fmt::Display,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        info!("Pinging SQL {} database (attempt {}/{})", role, attempt, attempts);

        let start = Instant::now();
        let last_error = match tokio::time::timeout(policy.timeout, ping()).await {
            Ok(Ok(())) => {
                let response_time = start.elapsed();
                debug!("Ping of {} answered in {}ms", role, response_time.as_millis());
                return Ok(PingReport {
                    attempts: attempt,
                    response_time,
                });
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("ping timed out after {:?}", policy.timeout),
        };

        if attempt >= attempts {
            error!(
                "Failed to ping {} after {} attempts: {}",
                role, attempts, last_error
            );
            hooks.on_connection_failure(role, &last_error);
            return Err(PingFailure {
                attempts,
                last_error,
            });
        }

        warn!(
            "Failed to ping {} (attempt {}/{}), retrying in {:?}: {}",
            role, attempt, attempts, policy.delay, last_error
        );
        hooks.on_connection_retry(role, attempt, &last_error);
        tokio::time::sleep(policy.delay).await;
    }
}

/// A connection picked by the router, tagged with its role
#[derive(Debug)]
pub struct Route<'a, T> {
    pub role: ConnectionRole,
    pub conn: &'a T,
}

/// Primary plus replica sets with independent round-robin cursors.
///
/// Cursors advance with a single atomic increment, so concurrent readers
/// fan out evenly without taking a lock.
#[derive(Debug)]
pub struct ReplicaRouter<T> {
    primary: T,
    /// Healthy replicas paired with their configured position
    replicas: Vec<(usize, T)>,
    search_replicas: Vec<(usize, T)>,
    rr_counter: AtomicUsize,
    sr_counter: AtomicUsize,
}

impl<T> ReplicaRouter<T> {
    pub fn new(primary: T, replicas: Vec<T>, search_replicas: Vec<T>) -> Self {
        Self::with_indices(
            primary,
            replicas.into_iter().enumerate().collect(),
            search_replicas.into_iter().enumerate().collect(),
        )
    }

    /// Build from replicas that keep their configured index, so roles stay
    /// stable when some of the configured replicas were left out
    pub fn with_indices(primary: T, replicas: Vec<(usize, T)>, search_replicas: Vec<(usize, T)>) -> Self {
        Self {
            primary,
            replicas,
            search_replicas,
            rr_counter: AtomicUsize::new(0),
            sr_counter: AtomicUsize::new(0),
        }
    }

    /// Writes always land here
    pub fn primary(&self) -> Route<'_, T> {
        Route {
            role: ConnectionRole::Primary,
            conn: &self.primary,
        }
    }

    /// Next general read replica, or the primary when none are configured
    pub fn next_replica(&self) -> Route<'_, T> {
        if self.replicas.is_empty() {
            return self.primary();
        }

        let (index, conn) = &self.replicas[self.rr_counter.fetch_add(1, Ordering::Relaxed) % self.replicas.len()];
        Route {
            role: ConnectionRole::Replica(*index),
            conn,
        }
    }

    /// Next search replica, falling back to the general replicas
    pub fn next_search_replica(&self) -> Route<'_, T> {
        if self.search_replicas.is_empty() {
            return self.next_replica();
        }

        let (index, conn) =
            &self.search_replicas[self.sr_counter.fetch_add(1, Ordering::Relaxed) % self.search_replicas.len()];
        Route {
            role: ConnectionRole::SearchReplica(*index),
            conn,
        }
    }

    /// The connection serving `role`, if it is in rotation
    pub fn get(&self, role: ConnectionRole) -> Option<&T> {
        let (entries, wanted) = match role {
            ConnectionRole::Primary => return Some(&self.primary),
            ConnectionRole::Replica(index) => (&self.replicas, index),
            ConnectionRole::SearchReplica(index) => (&self.search_replicas, index),
        };
        entries
            .iter()
            .find(|(index, _)| *index == wanted)
            .map(|(_, conn)| conn)
    }

    pub fn replica_count(&self) -> usize {
        self.replicas.len()
    }

    pub fn search_replica_count(&self) -> usize {
        self.search_replicas.len()
    }

    /// Every connection, primary first
    pub fn all(&self) -> impl Iterator<Item = &T> {
        std::iter::once(&self.primary)
            .chain(self.replicas.iter().map(|(_, conn)| conn))
            .chain(self.search_replicas.iter().map(|(_, conn)| conn))
    }
}
