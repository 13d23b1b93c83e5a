//! Multi-endpoint composition
//!
//! [`LogicalHandle::open`] assembles one writer endpoint and zero or more
//! reader endpoints into a single logical database handle with a replica
//! selection policy. Exactly one endpoint is designated primary; when no
//! writer is supplied, the first reader is promoted and removed from the
//! replica set so it is never counted twice.

use super::policy::{ReplicaPolicy, RoundRobin};
use super::{ConnectionManager, Endpoint, EndpointConfig};
use crate::connection::{Driver, TrustCache};
use crate::{Error, Result};
use std::sync::Arc;
use tracing::debug;

/// Caller-facing composition input: one optional writer, any number of
/// readers, and an optional replica selection policy.
pub struct BrokerConfig {
    /// Writer endpoint; when absent the first reader is promoted to primary
    pub writer: Option<EndpointConfig>,
    /// Reader endpoints, in replica-set order
    pub readers: Vec<EndpointConfig>,
    /// Replica selection policy; strict round-robin when absent
    pub policy: Option<Box<dyn ReplicaPolicy>>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl BrokerConfig {
    /// Empty configuration.
    pub fn new() -> Self {
        Self {
            writer: None,
            readers: Vec::new(),
            policy: None,
        }
    }

    /// Set the writer endpoint.
    pub fn writer(mut self, config: EndpointConfig) -> Self {
        self.writer = Some(config);
        self
    }

    /// Append a reader endpoint.
    pub fn reader(mut self, config: EndpointConfig) -> Self {
        self.readers.push(config);
        self
    }

    /// Set the replica selection policy.
    pub fn policy(mut self, policy: Box<dyn ReplicaPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }
}

impl std::fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("writer", &self.writer)
            .field("readers", &self.readers)
            .field("policy", &self.policy.as_ref().map(|_| "<policy>"))
            .finish()
    }
}

/// The composed, externally visible handle: one primary endpoint plus an
/// immutable, ordered replica set. Adding endpoints requires rebuilding the
/// handle.
pub struct LogicalHandle<D: Driver> {
    primary: Endpoint<D>,
    replicas: Vec<Endpoint<D>>,
    policy: Box<dyn ReplicaPolicy>,
}

impl<D: Driver> std::fmt::Debug for LogicalHandle<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogicalHandle")
            .field("primary", &self.primary)
            .field("replicas", &self.replicas)
            .finish()
    }
}

impl<D: Driver> LogicalHandle<D> {
    /// Compose a handle against the process-wide trust cache.
    pub fn open(driver: Arc<D>, config: BrokerConfig) -> Result<Self> {
        Self::open_with_trust(driver, config, TrustCache::global())
    }

    /// Compose a handle against a specific trust cache.
    ///
    /// No physical connection is made eagerly; each endpoint's pool dials on
    /// first acquire.
    pub fn open_with_trust(
        driver: Arc<D>,
        config: BrokerConfig,
        trust: Arc<TrustCache>,
    ) -> Result<Self> {
        let mut readers = config.readers;

        let primary_config = match config.writer {
            Some(writer) => writer,
            None => {
                if readers.is_empty() {
                    return Err(Error::Config(
                        "a logical handle requires at least one endpoint".into(),
                    ));
                }
                // Promote the first reader; it must not stay in the replica
                // set as well.
                readers.remove(0)
            }
        };

        debug!(
            primary = %primary_config.name,
            replicas = readers.len(),
            "composing logical handle"
        );

        let primary = Endpoint::build(driver.clone(), trust.clone(), primary_config)?;
        let replicas = readers
            .into_iter()
            .map(|reader| Endpoint::build(driver.clone(), trust.clone(), reader))
            .collect::<Result<Vec<_>>>()?;

        let policy = config
            .policy
            .unwrap_or_else(|| Box::new(RoundRobin::default()));

        Ok(Self {
            primary,
            replicas,
            policy,
        })
    }

    /// The primary (writer) endpoint.
    pub fn primary(&self) -> &Endpoint<D> {
        &self.primary
    }

    /// The replica set, in registration order. Empty for single-endpoint
    /// handles, which route everything to the primary.
    pub fn replicas(&self) -> &[Endpoint<D>] {
        &self.replicas
    }

    /// The endpoint the next read would be routed to, without acquiring.
    pub fn read_endpoint(&self) -> &Endpoint<D> {
        if self.replicas.is_empty() {
            &self.primary
        } else {
            let index = self.policy.select(self.replicas.len());
            &self.replicas[index]
        }
    }

    /// Acquire a connection from the primary endpoint.
    pub async fn acquire_write(
        &self,
    ) -> Result<bb8::PooledConnection<'_, ConnectionManager<D>>> {
        self.primary.acquire().await
    }

    /// Acquire a connection from a reader endpoint chosen by the replica
    /// policy, or from the primary when the handle has no replicas.
    pub async fn acquire_read(
        &self,
    ) -> Result<bb8::PooledConnection<'_, ConnectionManager<D>>> {
        self.read_endpoint().acquire().await
    }
}
