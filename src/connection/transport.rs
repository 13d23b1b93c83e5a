//! Driver seam and the built-in TCP transport driver
//!
//! The broker never speaks a database wire protocol itself; it obtains a ready
//! raw connection from a [`Driver`] given fully resolved
//! [`ConnectionParameters`]. [`TcpDriver`] is the built-in implementation: it
//! dials TCP and, when the parameters carry a registered TLS host, performs
//! the TLS handshake with the trust material registered for that host.
//! Protocol handshakes (MySQL, Postgres, ...) belong to driver implementations
//! layered on top.

use super::trust::TrustCache;
use crate::auth::ConnectionParameters;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::BytesMut;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

/// A connection factory for one driver family.
///
/// `connect` receives resolved parameters and returns a ready raw connection;
/// `ping`/`is_broken` let the pooling facility validate idle connections.
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    /// The raw connection type this driver produces
    type Connection: Send + 'static;

    /// Short driver family name, used in logs and metrics
    fn name(&self) -> &'static str;

    /// Establish one physical connection.
    async fn connect(&self, params: &ConnectionParameters) -> Result<Self::Connection>;

    /// Validate an idle connection before it is handed out again.
    async fn ping(&self, _conn: &mut Self::Connection) -> Result<()> {
        Ok(())
    }

    /// Whether a returned connection should be discarded instead of pooled.
    fn is_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

/// Raw network channel: plain or TLS-encrypted TCP
#[allow(clippy::large_enum_variant)]
pub enum RawConnection {
    /// Plain TCP connection
    Plain(TcpStream),
    /// TLS-encrypted TCP connection
    Tls(tokio_rustls::client::TlsStream<TcpStream>),
}

impl std::fmt::Debug for RawConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RawConnection::Plain(_) => f.write_str("RawConnection::Plain(TcpStream)"),
            RawConnection::Tls(_) => f.write_str("RawConnection::Tls(TlsStream)"),
        }
    }
}

impl RawConnection {
    /// Whether the channel is TLS-encrypted
    pub fn is_tls(&self) -> bool {
        matches!(self, RawConnection::Tls(_))
    }

    /// Write all bytes to the stream
    pub async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        match self {
            RawConnection::Plain(stream) => stream.write_all(buf).await?,
            RawConnection::Tls(stream) => stream.write_all(buf).await?,
        }
        Ok(())
    }

    /// Flush the stream
    pub async fn flush(&mut self) -> Result<()> {
        match self {
            RawConnection::Plain(stream) => stream.flush().await?,
            RawConnection::Tls(stream) => stream.flush().await?,
        }
        Ok(())
    }

    /// Read into buffer
    pub async fn read_buf(&mut self, buf: &mut BytesMut) -> Result<usize> {
        let n = match self {
            RawConnection::Plain(stream) => stream.read_buf(buf).await?,
            RawConnection::Tls(stream) => stream.read_buf(buf).await?,
        };
        Ok(n)
    }

    /// Shutdown the stream
    pub async fn shutdown(&mut self) -> Result<()> {
        match self {
            RawConnection::Plain(stream) => stream.shutdown().await?,
            RawConnection::Tls(stream) => stream.shutdown().await?,
        }
        Ok(())
    }
}

/// Built-in driver: TCP dial with optional TLS from the per-host registry.
pub struct TcpDriver {
    trust: Arc<TrustCache>,
}

impl TcpDriver {
    /// Create a driver that consults the given trust cache for per-host TLS.
    pub fn new(trust: Arc<TrustCache>) -> Self {
        Self { trust }
    }
}

impl Default for TcpDriver {
    fn default() -> Self {
        Self::new(TrustCache::global())
    }
}

impl std::fmt::Debug for TcpDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpDriver").finish()
    }
}

#[async_trait]
impl Driver for TcpDriver {
    type Connection = RawConnection;

    fn name(&self) -> &'static str {
        "tcp"
    }

    async fn connect(&self, params: &ConnectionParameters) -> Result<Self::Connection> {
        let address = params.address();
        let stream = TcpStream::connect((params.host.as_str(), params.port))
            .await
            .map_err(|source| Error::Connect {
                address: address.clone(),
                source,
            })?;

        let Some(tls_key) = &params.tls_host else {
            return Ok(RawConnection::Plain(stream));
        };

        let record = self.trust.host_tls(tls_key).await.ok_or_else(|| {
            Error::TrustStore(format!("no TLS configuration registered for '{tls_key}'"))
        })?;

        let server_name = rustls_pki_types::ServerName::try_from(record.server_name.clone())
            .map_err(|_| {
                Error::Config(format!("invalid TLS server name '{}'", record.server_name))
            })?;

        let connector = TlsConnector::from(record.config.clone());
        let tls_stream = connector
            .connect(server_name, stream)
            .await
            .map_err(|source| Error::Connect { address, source })?;

        Ok(RawConnection::Tls(tls_stream))
    }
}
