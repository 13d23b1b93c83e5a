//! Reconfigurable connection factory
//!
//! A [`ReconfigurableConnector`] sits between the pooling facility and a
//! [`Driver`]. On every connection request it decides, via an optional
//! caller-supplied predicate, whether to reuse its cached connection
//! parameters or resolve fresh ones from the endpoint's
//! [`AuthProvider`](crate::AuthProvider). The decision and any rebuild are
//! serialized under the endpoint's own lock; the physical dial happens outside
//! it, so slow network I/O never blocks reconfiguration checks.
//!
//! No predicate means "always reconfigure": the safe default when credentials
//! are short-lived, since a stale token is worse than extra resolution work.

use super::transport::Driver;
use super::trust::TrustCache;
use crate::auth::{AuthProvider, ConnectionParameters};
use crate::metrics::{counters, labels};
use crate::Result;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// Decides whether the cached factory should be discarded and rebuilt before
/// the next physical connection. Errors propagate to the caller without
/// touching the cache.
pub type ReconfigurePredicate =
    Arc<dyn Fn() -> BoxFuture<'static, Result<bool>> + Send + Sync>;

/// Wrap an async closure into a [`ReconfigurePredicate`].
pub fn reconfigure_when<F, Fut>(f: F) -> ReconfigurePredicate
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<bool>> + Send + 'static,
{
    Arc::new(move || Box::pin(f()))
}

/// A predicate that requests reconfiguration once the previous one is older
/// than `interval` — the common rotation-interval policy for credentials with
/// a known lifetime.
///
/// The timestamp marks the moment reconfiguration was *requested*; if the
/// rebuild then fails, the next connection attempt within the interval reuses
/// the still-valid cached factory instead of hammering the credential source.
pub fn reconfigure_older_than(interval: Duration) -> ReconfigurePredicate {
    let last = Arc::new(Mutex::new(None::<Instant>));
    Arc::new(move || {
        let last = last.clone();
        Box::pin(async move {
            let mut last = last.lock().await;
            match *last {
                Some(at) if at.elapsed() < interval => Ok(false),
                _ => {
                    *last = Some(Instant::now());
                    Ok(true)
                }
            }
        })
    })
}

/// A connection factory whose authentication material can be regenerated per
/// connection attempt.
///
/// State machine: unconfigured (no cached parameters) → configured; a
/// configured connector goes stale whenever the predicate signals so, and
/// returns to configured on a successful rebuild. A failed rebuild fails only
/// the in-flight attempt: the previous cache survives untouched, and the next
/// attempt retries reconfiguration from scratch.
pub struct ReconfigurableConnector<D: Driver> {
    endpoint: String,
    driver: Arc<D>,
    provider: Arc<dyn AuthProvider>,
    predicate: Option<ReconfigurePredicate>,
    trust: Arc<TrustCache>,
    cached: Mutex<Option<Arc<ConnectionParameters>>>,
}

impl<D: Driver> ReconfigurableConnector<D> {
    /// Create a connector for one endpoint.
    pub fn new(
        endpoint: impl Into<String>,
        driver: Arc<D>,
        provider: Arc<dyn AuthProvider>,
        predicate: Option<ReconfigurePredicate>,
        trust: Arc<TrustCache>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            driver,
            provider,
            predicate,
            trust,
            cached: Mutex::new(None),
        }
    }

    /// The endpoint this connector belongs to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Produce one physical connection, reconfiguring first if required.
    pub async fn connect(&self) -> Result<D::Connection> {
        let params = self.prepare().await?;

        // The dial runs outside the reconfiguration lock.
        match self.driver.connect(&params).await {
            Ok(conn) => {
                counters::dial(self.driver.name(), labels::OUTCOME_SUCCESS);
                Ok(conn)
            }
            Err(e) => {
                counters::dial(self.driver.name(), labels::OUTCOME_ERROR);
                Err(e.for_endpoint(&self.endpoint))
            }
        }
    }

    /// Serialized reconfiguration check and (if needed) rebuild.
    async fn prepare(&self) -> Result<Arc<ConnectionParameters>> {
        let mut cached = self.cached.lock().await;

        let reconfigure = match (cached.as_ref(), &self.predicate) {
            // Nothing cached yet, or no predicate supplied: rebuild.
            (None, _) | (_, None) => true,
            (Some(_), Some(predicate)) => {
                predicate().await.map_err(|e| e.for_endpoint(&self.endpoint))?
            }
        };

        if reconfigure {
            debug!(endpoint = %self.endpoint, "reconfiguring connection factory");
            match self.rebuild().await {
                Ok(params) => {
                    counters::reconfigure(&self.endpoint, labels::OUTCOME_SUCCESS);
                    let params = Arc::new(params);
                    *cached = Some(params.clone());
                    return Ok(params);
                }
                Err(e) => {
                    // The previous cache stays valid; only this attempt fails.
                    counters::reconfigure(&self.endpoint, labels::OUTCOME_ERROR);
                    return Err(e.for_endpoint(&self.endpoint));
                }
            }
        }

        match cached.as_ref() {
            Some(params) => Ok(params.clone()),
            // Unreachable: reconfigure is forced whenever the cache is empty.
            None => Err(crate::Error::Config(format!(
                "endpoint '{}' has no configured connection factory",
                self.endpoint
            ))),
        }
    }

    /// Resolve the provider and, when TLS is required, register the per-host
    /// TLS configuration before the parameters become visible.
    async fn rebuild(&self) -> Result<ConnectionParameters> {
        let mut params = self.provider.resolve().await?;

        if self.provider.requires_tls() {
            let key = params.address();
            self.trust.register_host(key.clone(), params.host.clone()).await?;
            params.tls_host = Some(key);
        }

        Ok(params)
    }
}

impl<D: Driver> std::fmt::Debug for ReconfigurableConnector<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconfigurableConnector")
            .field("endpoint", &self.endpoint)
            .field("driver", &self.driver.name())
            .field("predicate", &self.predicate.as_ref().map(|_| "<fn>"))
            .finish()
    }
}
