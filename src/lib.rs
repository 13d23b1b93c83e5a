//! # credpool
//!
//! Reconfigurable authenticated-connection brokering for relational databases.
//!
//! `credpool` produces pooled database handles whose underlying credentials and
//! TLS trust material can be regenerated on every physical connection attempt,
//! without tearing down or restarting the pool. This matters for deployments
//! where credentials rotate out from under a long-lived process: short-lived
//! cloud IAM tokens, vault-issued passwords, refreshed root-certificate bundles.
//!
//! ## Architecture
//!
//! * [`auth`] — pluggable [`AuthProvider`] strategies (static password, dynamic
//!   password fetch, cloud IAM token) that resolve fresh [`ConnectionParameters`]
//!   per reconfiguration.
//! * [`connection`] — the [`ReconfigurableConnector`], which decides per connect
//!   whether to reuse or rebuild its cached parameters; the [`TrustCache`], an
//!   init-once root-certificate store with expiry-aware refresh and a per-host
//!   TLS registry; and the [`Driver`] seam for actual database drivers.
//! * [`broker`] — endpoint construction over a [`bb8`] pool and the
//!   [`LogicalHandle`] composer that routes one writer and N read replicas
//!   behind a replica-selection policy.
//!
//! ## Quick start
//!
//! ```no_run
//! # async fn example() -> credpool::Result<()> {
//! use std::sync::Arc;
//! use credpool::auth::IamAuth;
//! use credpool::broker::{BrokerConfig, EndpointConfig, LogicalHandle};
//! use credpool::connection::TcpDriver;
//!
//! let writer = IamAuth::new(
//!     "db1.cluster-abc123.us-east-1.rds.amazonaws.com",
//!     3306,
//!     "orders",
//!     "svc_orders",
//! );
//!
//! let config = BrokerConfig::new()
//!     .writer(EndpointConfig::new("writer", Arc::new(writer)));
//!
//! let handle = LogicalHandle::open(Arc::new(TcpDriver::default()), config)?;
//! let conn = handle.acquire_write().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Cancellation
//!
//! Every operation is an ordinary future. Dropping an in-flight `connect` (for
//! example under [`tokio::time::timeout`]) aborts credential resolution and any
//! network fetch; cached state is only written after a rebuild completes, so a
//! canceled attempt never leaves a torn cache behind.

pub mod auth;
pub mod broker;
pub mod connection;
pub mod metrics;

pub use auth::{AuthProvider, ConnectionParameters, Credentials};
pub use broker::{BrokerConfig, Endpoint, EndpointConfig, LogicalHandle, PoolLimits};
pub use connection::{Driver, RawConnection, ReconfigurableConnector, TcpDriver, TrustCache};

/// Result type for credpool operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for credpool operations
///
/// Variants follow the stages of producing a connection: configuration is
/// validated up front, credentials are resolved, the trust store is consulted,
/// and finally the driver dials. Errors surfaced from one endpoint never
/// invalidate cached state held by another endpoint.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid or incomplete configuration. Fatal at construction time: a
    /// missing region or missing provider is a defect, not a retryable failure.
    #[error("configuration error: {0}")]
    Config(String),

    /// An authentication provider failed to produce connection parameters
    /// (expired upstream token source, unreachable secret store, ...).
    /// Surfaced per connection attempt; does not poison cached factories.
    #[error("credential resolution failed: {0}")]
    Resolution(String),

    /// The root-certificate trust store could not be initialized. Once cached,
    /// this error is returned to every caller needing TLS until process
    /// restart; there is no silent fallback to an untrusted path.
    #[error("trust store unavailable: {0}")]
    TrustStore(String),

    /// Driver-level dial failure after parameters were resolved.
    #[error("connection to {address} failed: {source}")]
    Connect {
        /// The `host:port` (and endpoint, once attributed) that failed
        address: String,
        /// Underlying I/O error from the dial
        #[source]
        source: std::io::Error,
    },

    /// The pooling facility timed out waiting for a free connection.
    #[error("timed out acquiring a pooled connection from endpoint '{0}'")]
    PoolTimeout(String),

    /// Other I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Attribute an error to a named endpoint so callers can tell which member
    /// of a multi-endpoint handle failed, and at which stage.
    pub(crate) fn for_endpoint(self, endpoint: &str) -> Self {
        match self {
            Error::Config(m) => Error::Config(format!("endpoint '{endpoint}': {m}")),
            Error::Resolution(m) => Error::Resolution(format!("endpoint '{endpoint}': {m}")),
            Error::TrustStore(m) => Error::TrustStore(format!("endpoint '{endpoint}': {m}")),
            Error::Connect { address, source } => Error::Connect {
                address: format!("endpoint '{endpoint}' at {address}"),
                source,
            },
            other => other,
        }
    }
}
