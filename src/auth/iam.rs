//! Cloud IAM token authentication
//!
//! [`IamAuth`] resolves a signed, time-limited access token instead of a
//! password. Tokens expire in minutes, so this provider forces the connector to
//! reconfigure before every physical connection and requires TLS on the wire.
//!
//! The target region may be given explicitly or derived from a structured
//! hostname of the form `<identifier>.<cluster>.<region>.rds.amazonaws.com`.
//! A host that matches neither is a configuration error, never a silent
//! empty-region token.

use super::sigv4::{build_auth_token, CredentialsProvider, EnvCredentialsProvider};
use super::{AuthProvider, ConnectionParameters};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;

/// Derive the region from a structured managed-database hostname.
///
/// Expects exactly `<identifier>.<cluster>.<region>.rds.amazonaws.com` with a
/// `<geo>-<direction>-<number>` region label (e.g. `us-east-1`). Returns `None`
/// for anything else, including bare hostnames like `localhost`.
pub fn derive_region_from_host(host: &str) -> Option<String> {
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() != 6 {
        return None;
    }
    if labels[3] != "rds" || labels[4] != "amazonaws" || labels[5] != "com" {
        return None;
    }
    if labels[0].is_empty() || labels[1].is_empty() {
        return None;
    }

    let region = labels[2];
    let parts: Vec<&str> = region.split('-').collect();
    if parts.len() != 3 {
        return None;
    }
    let geo_ok = !parts[0].is_empty() && parts[0].bytes().all(|b| b.is_ascii_lowercase());
    let direction_ok = !parts[1].is_empty() && parts[1].bytes().all(|b| b.is_ascii_lowercase());
    let number_ok = !parts[2].is_empty() && parts[2].bytes().all(|b| b.is_ascii_digit());
    if geo_ok && direction_ok && number_ok {
        Some(region.to_string())
    } else {
        None
    }
}

fn default_credentials_provider() -> Arc<dyn CredentialsProvider> {
    Arc::new(EnvCredentialsProvider)
}

/// IAM token authentication for one database endpoint.
///
/// A matching secret document (host/port/database/username/region) can be
/// deserialized directly into this struct; the credential source defaults to
/// the environment-derived chain and can be swapped via
/// [`with_credentials`](Self::with_credentials).
#[derive(Clone, Deserialize)]
pub struct IamAuth {
    /// Database host
    pub host: String,
    /// Database port
    pub port: u16,
    /// Schema / database name
    #[serde(rename = "database")]
    pub schema: String,
    /// Username to generate tokens for
    pub username: String,
    /// Region the database is in (not the region connecting from). Derived
    /// from the host name when absent.
    #[serde(default)]
    pub region: Option<String>,
    /// Signing credential source
    #[serde(skip, default = "default_credentials_provider")]
    pub credentials: Arc<dyn CredentialsProvider>,
}

impl std::fmt::Debug for IamAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IamAuth")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("schema", &self.schema)
            .field("username", &self.username)
            .field("region", &self.region)
            .finish()
    }
}

impl IamAuth {
    /// Create an IAM provider with the default (environment) credential chain.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        schema: impl Into<String>,
        username: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            schema: schema.into(),
            username: username.into(),
            region: None,
            credentials: default_credentials_provider(),
        }
    }

    /// Set the region explicitly instead of deriving it from the host name.
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Use a custom signing credential source.
    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialsProvider>) -> Self {
        self.credentials = credentials;
        self
    }

    /// The effective region: explicit value, else derived from the host name.
    pub fn effective_region(&self) -> Result<String> {
        if let Some(region) = &self.region {
            return Ok(region.clone());
        }
        derive_region_from_host(&self.host).ok_or_else(|| {
            Error::Config(format!(
                "no database region was provided and none could be derived from host '{}'",
                self.host
            ))
        })
    }
}

#[async_trait]
impl AuthProvider for IamAuth {
    async fn resolve(&self) -> Result<ConnectionParameters> {
        // Validation is repeated here so a provider constructed outside the
        // broker still fails cleanly rather than signing with an empty region.
        let region = self.effective_region()?;
        let address = format!("{}:{}", self.host, self.port);

        let credentials = self.credentials.credentials().await?;
        let token = build_auth_token(&credentials, &address, &region, &self.username, Utc::now());

        Ok(ConnectionParameters {
            host: self.host.clone(),
            port: self.port,
            schema: self.schema.clone(),
            principal: self.username.clone(),
            secret: token,
            tls_host: None,
        })
    }

    fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(Error::Config("IAM auth requires a host".into()));
        }
        if self.port == 0 {
            return Err(Error::Config("IAM auth requires a non-zero port".into()));
        }
        if self.username.is_empty() {
            return Err(Error::Config("IAM auth requires a username".into()));
        }
        self.effective_region().map(|_| ())
    }

    fn requires_tls(&self) -> bool {
        true
    }

    // Tokens expire in minutes; a stale cached factory is worse than the
    // extra signing work.
    fn forces_reconfigure(&self) -> bool {
        true
    }
}

/// An IAM configuration with a read/write split.
///
/// Region fallback order for the read endpoint: explicit read region, then the
/// region parsed from the read host, then the writer's region.
#[derive(Clone, Deserialize)]
pub struct IamAuthWithReadOnly {
    /// Writer configuration
    #[serde(flatten)]
    pub write: IamAuth,
    /// Read-only host; writer host when absent
    #[serde(rename = "host_read_only", default)]
    pub host_read_only: Option<String>,
    /// Read-only port; writer port when absent
    #[serde(rename = "port_read_only", default)]
    pub port_read_only: Option<u16>,
    /// Read-only username; writer username when absent
    #[serde(rename = "username_read_only", default)]
    pub username_read_only: Option<String>,
    /// Read-only region; see the type docs for the fallback order
    #[serde(rename = "region_read_only", default)]
    pub region_read_only: Option<String>,
}

impl std::fmt::Debug for IamAuthWithReadOnly {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IamAuthWithReadOnly")
            .field("write", &self.write)
            .field("host_read_only", &self.host_read_only)
            .field("port_read_only", &self.port_read_only)
            .field("username_read_only", &self.username_read_only)
            .field("region_read_only", &self.region_read_only)
            .finish()
    }
}

impl IamAuthWithReadOnly {
    /// Create a split configuration from a writer provider.
    pub fn new(write: IamAuth) -> Self {
        Self {
            write,
            host_read_only: None,
            port_read_only: None,
            username_read_only: None,
            region_read_only: None,
        }
    }

    /// Set the read-only host.
    pub fn with_read_host(mut self, host: impl Into<String>) -> Self {
        self.host_read_only = Some(host.into());
        self
    }

    /// Set the read-only port.
    pub fn with_read_port(mut self, port: u16) -> Self {
        self.port_read_only = Some(port);
        self
    }

    /// Set the read-only username.
    pub fn with_read_username(mut self, username: impl Into<String>) -> Self {
        self.username_read_only = Some(username.into());
        self
    }

    /// Set the read-only region.
    pub fn with_read_region(mut self, region: impl Into<String>) -> Self {
        self.region_read_only = Some(region.into());
        self
    }

    /// The provider for the writer endpoint.
    pub fn write_provider(&self) -> IamAuth {
        self.write.clone()
    }

    /// The provider for the read-only endpoint, with absent fields falling
    /// back to the writer values.
    pub fn read_provider(&self) -> IamAuth {
        let host = self
            .host_read_only
            .clone()
            .unwrap_or_else(|| self.write.host.clone());

        // Explicit read region -> region in the read host -> writer region.
        let region = self
            .region_read_only
            .clone()
            .or_else(|| derive_region_from_host(&host))
            .or_else(|| self.write.region.clone());

        IamAuth {
            host,
            port: self.port_read_only.unwrap_or(self.write.port),
            schema: self.write.schema.clone(),
            username: self
                .username_read_only
                .clone()
                .unwrap_or_else(|| self.write.username.clone()),
            region,
            credentials: self.write.credentials.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::sigv4::AwsCredentials;

    struct FixedCredentials;

    #[async_trait]
    impl CredentialsProvider for FixedCredentials {
        async fn credentials(&self) -> Result<AwsCredentials> {
            Ok(AwsCredentials {
                access_key_id: "AKIDEXAMPLE".into(),
                secret_access_key: "secret".into(),
                session_token: None,
            })
        }
    }

    #[test]
    fn test_region_derivation_from_structured_host() {
        assert_eq!(
            derive_region_from_host("db1.cluster-abc123.us-east-1.rds.amazonaws.com").as_deref(),
            Some("us-east-1")
        );
        assert_eq!(
            derive_region_from_host("mydb.cluster-x.eu-west-2.rds.amazonaws.com").as_deref(),
            Some("eu-west-2")
        );
    }

    #[test]
    fn test_region_derivation_rejects_unstructured_hosts() {
        assert_eq!(derive_region_from_host("localhost"), None);
        assert_eq!(derive_region_from_host("db.example.com"), None);
        assert_eq!(
            derive_region_from_host("db1.cluster.notaregion.rds.amazonaws.com"),
            None
        );
        assert_eq!(
            derive_region_from_host("db1.cluster.us-east-1.rds.amazonaws.org"),
            None
        );
    }

    #[test]
    fn test_explicit_region_wins() {
        let auth = IamAuth::new("db1.cluster-a.us-east-1.rds.amazonaws.com", 3306, "s", "u")
            .with_region("ap-southeast-2");
        assert_eq!(auth.effective_region().expect("region"), "ap-southeast-2");
    }

    #[test]
    fn test_missing_region_is_a_configuration_error() {
        let auth = IamAuth::new("localhost", 3306, "s", "u");
        let err = auth.effective_region().expect_err("no region");
        assert!(matches!(err, Error::Config(_)));
        assert!(auth.validate().is_err());
    }

    #[tokio::test]
    async fn test_resolve_produces_token_and_tls_requirement() {
        let auth = IamAuth::new("db1.cluster-a.us-east-1.rds.amazonaws.com", 3306, "orders", "svc")
            .with_credentials(Arc::new(FixedCredentials));

        assert!(auth.requires_tls());
        assert!(auth.forces_reconfigure());

        let params = auth.resolve().await.expect("resolve");
        assert_eq!(params.principal, "svc");
        assert!(params.secret.contains("Action=connect"));
        assert!(params.secret.contains("DBUser=svc"));
        assert!(params.secret.contains("us-east-1"));
    }

    #[tokio::test]
    async fn test_resolve_fails_fast_without_region() {
        let auth = IamAuth::new("localhost", 3306, "s", "u")
            .with_credentials(Arc::new(FixedCredentials));
        let err = auth.resolve().await.expect_err("no region");
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_read_provider_falls_back_to_writer_values() {
        let split = IamAuthWithReadOnly::new(
            IamAuth::new("w.cluster.us-east-1.rds.amazonaws.com", 3306, "s", "svc"),
        );
        let read = split.read_provider();
        assert_eq!(read.host, "w.cluster.us-east-1.rds.amazonaws.com");
        assert_eq!(read.port, 3306);
        assert_eq!(read.username, "svc");
        assert_eq!(read.effective_region().expect("region"), "us-east-1");
    }

    #[test]
    fn test_read_region_fallback_order() {
        // Explicit read region beats everything
        let split = IamAuthWithReadOnly::new(
            IamAuth::new("w.cluster.us-east-1.rds.amazonaws.com", 3306, "s", "svc"),
        )
        .with_read_host("r.cluster.eu-west-2.rds.amazonaws.com")
        .with_read_region("ap-northeast-1");
        assert_eq!(
            split.read_provider().effective_region().expect("region"),
            "ap-northeast-1"
        );

        // Then the region parsed from the read host
        let split = IamAuthWithReadOnly::new(
            IamAuth::new("w.cluster.us-east-1.rds.amazonaws.com", 3306, "s", "svc"),
        )
        .with_read_host("r.cluster.eu-west-2.rds.amazonaws.com");
        assert_eq!(
            split.read_provider().effective_region().expect("region"),
            "eu-west-2"
        );

        // Then the writer's region
        let split = IamAuthWithReadOnly::new(
            IamAuth::new("w.example.internal.db.corp.net", 3306, "s", "svc")
                .with_region("us-west-2"),
        )
        .with_read_host("r.example.internal.db.corp.net");
        assert_eq!(
            split.read_provider().effective_region().expect("region"),
            "us-west-2"
        );
    }

    #[test]
    fn test_read_overrides_take_precedence() {
        let split = IamAuthWithReadOnly::new(
            IamAuth::new("w.cluster.us-east-1.rds.amazonaws.com", 3306, "s", "svc"),
        )
        .with_read_host("r.cluster.us-east-1.rds.amazonaws.com")
        .with_read_port(3307)
        .with_read_username("svc_ro");

        let read = split.read_provider();
        assert_eq!(read.host, "r.cluster.us-east-1.rds.amazonaws.com");
        assert_eq!(read.port, 3307);
        assert_eq!(read.username, "svc_ro");
    }

    #[test]
    fn test_deserialize_from_secret_document() {
        let auth: IamAuthWithReadOnly = serde_json::from_str(
            r#"{
                "host": "w.cluster.us-east-1.rds.amazonaws.com",
                "port": 3306,
                "database": "orders",
                "username": "svc",
                "host_read_only": "r.cluster.us-east-1.rds.amazonaws.com"
            }"#,
        )
        .expect("parse");
        assert_eq!(auth.write.schema, "orders");
        assert_eq!(
            auth.read_provider().host,
            "r.cluster.us-east-1.rds.amazonaws.com"
        );
    }
}
