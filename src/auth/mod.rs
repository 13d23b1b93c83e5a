//! Authentication provider strategies
//!
//! This module handles:
//! * The [`AuthProvider`] contract: resolve fresh [`ConnectionParameters`] on demand
//! * Static and dynamically-fetched password providers
//! * Cloud IAM token generation with region derivation
//! * Read-replica variants that fall back to writer values field by field

mod iam;
mod password;
pub mod sigv4;

pub use iam::{derive_region_from_host, IamAuth, IamAuthWithReadOnly};
pub use password::{
    DynamicPasswordAuth, PasswordAuth, PasswordAuthWithReadOnly, ReadOnlyOverrides,
};
pub use sigv4::{AwsCredentials, CredentialsProvider, EnvCredentialsProvider};

use crate::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Deserialize;
use std::sync::Arc;

/// Fully resolved parameters for one physical connection.
///
/// Produced fresh per reconfiguration and never mutated afterwards. The
/// `tls_host` field carries the `host:port` key under which a per-host TLS
/// configuration was registered in the [`TrustCache`](crate::TrustCache);
/// drivers use it to select the right trust material at dial time.
#[derive(Clone)]
pub struct ConnectionParameters {
    /// Database host
    pub host: String,
    /// Database port
    pub port: u16,
    /// Schema / database name
    pub schema: String,
    /// Username the connection authenticates as
    pub principal: String,
    /// Secret material: a password or a signed, time-limited token
    pub secret: String,
    /// Registry key for a per-host TLS configuration, if TLS was required
    pub tls_host: Option<String>,
}

impl ConnectionParameters {
    /// The `host:port` dial address
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// Secrets must not leak through debug logs.
impl std::fmt::Debug for ConnectionParameters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionParameters")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("schema", &self.schema)
            .field("principal", &self.principal)
            .field("secret", &"<redacted>")
            .field("tls_host", &self.tls_host)
            .finish()
    }
}

/// A username/password pair, typically deserialized from a secret document.
#[derive(Clone, Deserialize)]
pub struct Credentials {
    /// Username
    pub username: String,
    /// Password
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A caller-supplied asynchronous credential fetch (vault lookup, secret
/// manager read, ...). Invoked once per resolution.
pub type FetchCredentials = Arc<dyn Fn() -> BoxFuture<'static, Result<Credentials>> + Send + Sync>;

/// Wrap an async closure into a [`FetchCredentials`].
pub fn fetch_credentials<F, Fut>(f: F) -> FetchCredentials
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<Credentials>> + Send + 'static,
{
    Arc::new(move || Box::pin(f()))
}

/// A strategy that produces connection parameters for one logical endpoint.
///
/// Resolution may be called repeatedly and may return different values each
/// time (rotated tokens, freshly fetched passwords), but must be idempotent in
/// its side effects: repeated calls never corrupt shared state.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Resolve fresh connection parameters.
    async fn resolve(&self) -> Result<ConnectionParameters>;

    /// Validate the provider's configuration. Called at endpoint construction
    /// so that defects (a missing region, a zero port) fail fast instead of
    /// surfacing on the first connection attempt.
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Whether connections produced from this provider require TLS. When true,
    /// every reconfiguration also resolves and registers a per-host TLS
    /// configuration before the parameters are cached.
    fn requires_tls(&self) -> bool {
        false
    }

    /// Whether this provider's secret material is too short-lived for any
    /// caller-supplied reconfiguration predicate to be safe. When true, the
    /// broker drops the predicate and reconfigures before every physical
    /// connection.
    fn forces_reconfigure(&self) -> bool {
        false
    }
}
