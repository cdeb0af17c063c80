//! sqlx pools for the primary, read replicas and search replicas

use crate::config::{Driver, SqlSettings};
use crate::connection::{ping_with_retry, ConnectionRole, ReplicaRouter, RetryPolicy, Route};
use crate::error::BootstrapError;
use crate::hooks::StoreHooks;
use sqlx::any::{AnyConnectOptions, AnyPoolOptions};
use sqlx::{AnyPool, ConnectOptions};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

/// Every pool the backing store talks to
pub struct ConnectionPool {
    driver: Driver,
    router: ReplicaRouter<AnyPool>,
    hooks: Arc<dyn StoreHooks>,
}

impl ConnectionPool {
    /// Open and health-check every configured pool.
    ///
    /// The primary must answer a ping within the retry budget. A replica that
    /// cannot be opened or never answers is logged and left out of rotation.
    pub async fn open(
        settings: &SqlSettings,
        hooks: Arc<dyn StoreHooks>,
    ) -> Result<Self, BootstrapError> {
        settings.validate()?;
        let driver = settings.driver()?;
        sqlx::any::install_default_drivers();

        let policy = RetryPolicy::from_settings(settings);
        let primary = build_pool(settings, &settings.data_source, ConnectionRole::Primary)?;

        info!("Opening {} primary connection pool", driver);
        if let Err(failure) = ping_with_retry(ConnectionRole::Primary, &policy, hooks.as_ref(), || {
            ping(primary.clone())
        })
        .await
        {
            primary.close().await;
            return Err(BootstrapError::PrimaryUnreachable {
                attempts: failure.attempts,
                last_error: failure.last_error,
            });
        }

        let replicas = open_replicas(
            settings,
            &settings.data_source_replicas,
            ConnectionRole::Replica,
            &policy,
            hooks.as_ref(),
        )
        .await;
        let search_replicas = open_replicas(
            settings,
            &settings.data_source_search_replicas,
            ConnectionRole::SearchReplica,
            &policy,
            hooks.as_ref(),
        )
        .await;

        info!(
            "Connection pools ready: {} replica(s), {} search replica(s)",
            replicas.len(),
            search_replicas.len()
        );

        Ok(Self {
            driver,
            router: ReplicaRouter::with_indices(primary, replicas, search_replicas),
            hooks,
        })
    }

    pub fn driver(&self) -> Driver {
        self.driver
    }

    /// The writable pool
    pub fn primary(&self) -> Route<'_, AnyPool> {
        self.router.primary()
    }

    /// Next read pool in rotation, the primary when no replica is healthy
    pub fn next_replica(&self) -> Route<'_, AnyPool> {
        let route = self.router.next_replica();
        self.hooks.on_replica_selected(route.role);
        route
    }

    /// Next search pool in rotation, falling back to the read replicas
    pub fn next_search_replica(&self) -> Route<'_, AnyPool> {
        let route = self.router.next_search_replica();
        self.hooks.on_replica_selected(route.role);
        route
    }

    /// The pool serving `role`, if it is in rotation
    pub fn get(&self, role: ConnectionRole) -> Option<&AnyPool> {
        self.router.get(role)
    }

    pub fn replica_count(&self) -> usize {
        self.router.replica_count()
    }

    pub fn search_replica_count(&self) -> usize {
        self.router.search_replica_count()
    }

    /// Close every pool; in-flight queries finish first
    pub async fn close(&self) {
        for pool in self.router.all() {
            pool.close().await;
        }
        info!("Closed all connection pools");
    }
}

async fn ping(pool: AnyPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(&pool).await.map(|_| ())
}

fn build_pool(
    settings: &SqlSettings,
    data_source: &str,
    role: ConnectionRole,
) -> Result<AnyPool, BootstrapError> {
    let mut options = AnyConnectOptions::from_str(data_source).map_err(|source| {
        BootstrapError::Open {
            target: role.to_string(),
            source,
        }
    })?;
    if !settings.trace {
        options = options.disable_statement_logging();
    }

    Ok(AnyPoolOptions::new()
        .max_connections(settings.max_open_conns)
        .min_connections(settings.max_idle_conns.min(settings.max_open_conns))
        .max_lifetime(settings.conn_max_lifetime)
        .acquire_timeout(settings.query_timeout)
        .connect_lazy_with(options))
}

/// Open the healthy replicas, each paired with its configured index
async fn open_replicas(
    settings: &SqlSettings,
    sources: &[String],
    role: fn(usize) -> ConnectionRole,
    policy: &RetryPolicy,
    hooks: &dyn StoreHooks,
) -> Vec<(usize, AnyPool)> {
    let mut pools = Vec::with_capacity(sources.len());

    for (index, source) in sources.iter().enumerate() {
        let role = role(index);
        let pool = match build_pool(settings, source, role) {
            Ok(pool) => pool,
            Err(e) => {
                warn!("Dropping {} from rotation: {}", role, e);
                hooks.on_connection_failure(role, &e.to_string());
                continue;
            }
        };

        match ping_with_retry(role, policy, hooks, || ping(pool.clone())).await {
            Ok(_) => pools.push((index, pool)),
            Err(failure) => {
                warn!(
                    "Dropping {} from rotation after {} failed pings: {}",
                    role, failure.attempts, failure.last_error
                );
                pool.close().await;
            }
        }
    }

    pools
}
