//! Password-based authentication providers
//!
//! Two variants: [`PasswordAuth`] carries a fixed principal/secret baked in at
//! construction, [`DynamicPasswordAuth`] invokes a caller-supplied fetch
//! function per resolution (e.g. a vault lookup). Both have a read-replica
//! split expressed as explicit composition: a writer configuration plus an
//! optional [`ReadOnlyOverrides`] record whose absent fields fall back to the
//! writer values.

use super::{AuthProvider, ConnectionParameters, Credentials, FetchCredentials};
use crate::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;

/// Fixed credentials known at construction time.
#[derive(Clone, Deserialize)]
pub struct PasswordAuth {
    /// Database host
    pub host: String,
    /// Database port
    pub port: u16,
    /// Schema / database name
    #[serde(rename = "database")]
    pub schema: String,
    /// Username; when empty, the local OS username is used
    #[serde(default)]
    pub username: String,
    /// Password
    pub password: String,
}

impl PasswordAuth {
    /// Create a provider with a fixed username and password.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        schema: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            schema: schema.into(),
            username: username.into(),
            password: password.into(),
        }
    }

    fn effective_username(&self) -> String {
        if self.username.is_empty() {
            whoami::username()
        } else {
            self.username.clone()
        }
    }
}

impl std::fmt::Debug for PasswordAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordAuth")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("schema", &self.schema)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[async_trait]
impl AuthProvider for PasswordAuth {
    async fn resolve(&self) -> Result<ConnectionParameters> {
        Ok(ConnectionParameters {
            host: self.host.clone(),
            port: self.port,
            schema: self.schema.clone(),
            principal: self.effective_username(),
            secret: self.password.clone(),
            tls_host: None,
        })
    }

    fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(Error::Config("password auth requires a host".into()));
        }
        if self.port == 0 {
            return Err(Error::Config("password auth requires a non-zero port".into()));
        }
        Ok(())
    }
}

/// Credentials fetched per resolution via a caller-supplied function.
///
/// Fetch errors propagate as [`Error::Resolution`] and fail only the
/// connection attempt that triggered the fetch.
#[derive(Clone)]
pub struct DynamicPasswordAuth {
    /// Database host
    pub host: String,
    /// Database port
    pub port: u16,
    /// Schema / database name
    pub schema: String,
    /// The credential fetch function
    pub fetch: FetchCredentials,
}

impl DynamicPasswordAuth {
    /// Create a provider that fetches credentials on every resolution.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        schema: impl Into<String>,
        fetch: FetchCredentials,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            schema: schema.into(),
            fetch,
        }
    }
}

impl std::fmt::Debug for DynamicPasswordAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicPasswordAuth")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("schema", &self.schema)
            .field("fetch", &"<fn>")
            .finish()
    }
}

#[async_trait]
impl AuthProvider for DynamicPasswordAuth {
    async fn resolve(&self) -> Result<ConnectionParameters> {
        let Credentials { username, password } = (self.fetch)().await?;
        Ok(ConnectionParameters {
            host: self.host.clone(),
            port: self.port,
            schema: self.schema.clone(),
            principal: username,
            secret: password,
            tls_host: None,
        })
    }

    fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(Error::Config("dynamic password auth requires a host".into()));
        }
        if self.port == 0 {
            return Err(Error::Config(
                "dynamic password auth requires a non-zero port".into(),
            ));
        }
        Ok(())
    }
}

/// Overrides for a read-only endpoint. Absent fields fall back to the
/// corresponding writer value.
#[derive(Clone, Default, Deserialize)]
pub struct ReadOnlyOverrides {
    /// Read-only host; writer host when absent
    #[serde(rename = "host_read_only", default)]
    pub host: Option<String>,
    /// Read-only port; writer port when absent
    #[serde(rename = "port_read_only", default)]
    pub port: Option<u16>,
    /// Read-only credential fetch; writer fetch when absent
    #[serde(skip)]
    pub fetch: Option<FetchCredentials>,
}

impl std::fmt::Debug for ReadOnlyOverrides {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadOnlyOverrides")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("fetch", &self.fetch.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

/// A dynamic-password configuration with a read/write split.
///
/// Most managed clusters expose a separate read-only endpoint for horizontal
/// scaling; this type derives one provider per role instead of nesting
/// "with read-only" structs.
#[derive(Clone, Debug)]
pub struct PasswordAuthWithReadOnly {
    /// Writer configuration
    pub write: DynamicPasswordAuth,
    /// Read-only overrides
    pub read: ReadOnlyOverrides,
}

impl PasswordAuthWithReadOnly {
    /// Create a split configuration from a writer provider and overrides.
    pub fn new(write: DynamicPasswordAuth, read: ReadOnlyOverrides) -> Self {
        Self { write, read }
    }

    /// The provider for the writer endpoint.
    pub fn write_provider(&self) -> DynamicPasswordAuth {
        self.write.clone()
    }

    /// The provider for the read-only endpoint, with absent override fields
    /// falling back to the writer values.
    pub fn read_provider(&self) -> DynamicPasswordAuth {
        DynamicPasswordAuth {
            host: self
                .read
                .host
                .clone()
                .unwrap_or_else(|| self.write.host.clone()),
            port: self.read.port.unwrap_or(self.write.port),
            schema: self.write.schema.clone(),
            fetch: self
                .read
                .fetch
                .clone()
                .unwrap_or_else(|| self.write.fetch.clone()),
        }
    }
}
