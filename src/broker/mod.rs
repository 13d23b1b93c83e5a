//! Endpoint construction and multi-endpoint composition
//!
//! An [`Endpoint`] binds one reconfigurable connector to pool-tuning
//! parameters on top of the [`bb8`] pooling facility. The
//! [`LogicalHandle`] composer assembles one writer endpoint and N reader
//! endpoints into a single routed handle.

mod handle;
mod policy;

pub use handle::{BrokerConfig, LogicalHandle};
pub use policy::{Random, ReplicaPolicy, RoundRobin};

use crate::auth::AuthProvider;
use crate::connection::{Driver, ReconfigurableConnector, ReconfigurePredicate, TrustCache};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Pool-tuning parameters for one endpoint. Everything except `max_open` is
/// optional; sizing and idle management are delegated to the pooling facility.
#[derive(Debug, Clone)]
pub struct PoolLimits {
    /// Maximum number of open connections
    pub max_open: u32,
    /// Number of idle connections the pool keeps warm
    pub min_idle: Option<u32>,
    /// Close connections idle for longer than this
    pub max_idle_time: Option<Duration>,
    /// Close connections older than this regardless of use
    pub max_lifetime: Option<Duration>,
    /// How long an acquire waits for a free connection before timing out
    pub acquire_timeout: Duration,
}

impl Default for PoolLimits {
    fn default() -> Self {
        Self {
            max_open: 10,
            min_idle: None,
            max_idle_time: None,
            max_lifetime: None,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

/// Configuration for one logical endpoint. Cloned by the broker at
/// composition time; the caller's copy stays untouched.
#[derive(Clone)]
pub struct EndpointConfig {
    /// Endpoint name, used in errors, logs and metrics
    pub name: String,
    /// The authentication provider for this endpoint
    pub provider: Arc<dyn AuthProvider>,
    /// Optional reconfiguration predicate; absent means "always reconfigure"
    pub predicate: Option<ReconfigurePredicate>,
    /// Pool-tuning parameters
    pub limits: PoolLimits,
}

impl EndpointConfig {
    /// Create an endpoint configuration with default pool limits.
    pub fn new(name: impl Into<String>, provider: Arc<dyn AuthProvider>) -> Self {
        Self {
            name: name.into(),
            provider,
            predicate: None,
            limits: PoolLimits::default(),
        }
    }

    /// Gate reconfiguration behind a predicate. Ignored (with a log line) for
    /// providers whose credentials are too short-lived to skip refresh.
    pub fn with_predicate(mut self, predicate: ReconfigurePredicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    /// Set pool-tuning parameters.
    pub fn with_limits(mut self, limits: PoolLimits) -> Self {
        self.limits = limits;
        self
    }
}

impl std::fmt::Debug for EndpointConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointConfig")
            .field("name", &self.name)
            .field("predicate", &self.predicate.as_ref().map(|_| "<fn>"))
            .field("limits", &self.limits)
            .finish()
    }
}

/// Adapter between a [`ReconfigurableConnector`] and the pooling facility.
pub struct ConnectionManager<D: Driver> {
    connector: Arc<ReconfigurableConnector<D>>,
    driver: Arc<D>,
}

impl<D: Driver> std::fmt::Debug for ConnectionManager<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("endpoint", &self.connector.endpoint())
            .finish()
    }
}

#[async_trait]
impl<D: Driver> bb8::ManageConnection for ConnectionManager<D> {
    type Connection = D::Connection;
    type Error = Error;

    async fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        self.connector.connect().await
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> std::result::Result<(), Self::Error> {
        self.driver.ping(conn).await
    }

    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        self.driver.is_broken(conn)
    }
}

/// One logical database target: a reconfigurable connector bound to a pool.
pub struct Endpoint<D: Driver> {
    name: String,
    pool: bb8::Pool<ConnectionManager<D>>,
}

impl<D: Driver> std::fmt::Debug for Endpoint<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint").field("name", &self.name).finish()
    }
}

impl<D: Driver> Endpoint<D> {
    /// Build an endpoint from its configuration.
    ///
    /// Fails fast on configuration defects (the provider's `validate`), so a
    /// missing region or port never survives to the first connection attempt.
    /// No physical connection is made here; the pool dials lazily.
    pub fn build(driver: Arc<D>, trust: Arc<TrustCache>, config: EndpointConfig) -> Result<Self> {
        config
            .provider
            .validate()
            .map_err(|e| e.for_endpoint(&config.name))?;

        let predicate = if config.provider.forces_reconfigure() {
            if config.predicate.is_some() {
                debug!(
                    endpoint = %config.name,
                    "provider forces reconfiguration per connect; ignoring supplied predicate"
                );
            }
            None
        } else {
            config.predicate.clone()
        };

        let connector = Arc::new(ReconfigurableConnector::new(
            config.name.clone(),
            driver.clone(),
            config.provider.clone(),
            predicate,
            trust,
        ));

        let manager = ConnectionManager { connector, driver };
        let limits = &config.limits;
        let pool = bb8::Pool::builder()
            .max_size(limits.max_open)
            .min_idle(limits.min_idle)
            .idle_timeout(limits.max_idle_time)
            .max_lifetime(limits.max_lifetime)
            .connection_timeout(limits.acquire_timeout)
            .build_unchecked(manager);

        Ok(Self {
            name: config.name,
            pool,
        })
    }

    /// The endpoint name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Acquire a pooled connection, reconfiguring the factory first if the
    /// endpoint's predicate requires it.
    pub async fn acquire(&self) -> Result<bb8::PooledConnection<'_, ConnectionManager<D>>> {
        self.pool.get().await.map_err(|e| match e {
            bb8::RunError::User(e) => e,
            bb8::RunError::TimedOut => Error::PoolTimeout(self.name.clone()),
        })
    }

    /// Pool state: (open connections, idle connections).
    pub fn pool_state(&self) -> (u32, u32) {
        let state = self.pool.state();
        (state.connections, state.idle_connections)
    }
}
