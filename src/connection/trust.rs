//! Root-certificate trust cache
//!
//! A [`TrustCache`] holds one lazily-initialized root trust store plus a
//! per-host registry of TLS configurations. Initialization happens exactly
//! once per cache, even under concurrent first use from several endpoints;
//! both a successful store and a failure are cached for the life of the
//! process (root bundles change rarely, so a restart is the retry path — there
//! is never a silent fallback to an untrusted connection).
//!
//! The default root source is a certificate bundle embedded at compile time.
//! If the bundle cannot be parsed, or any certificate in it is within the
//! freshness threshold of expiry, a replacement bundle is fetched once from a
//! well-known URL.

use crate::{Error, Result};
use futures::future::BoxFuture;
use rustls::{ClientConfig, RootCertStore};
use rustls_pki_types::CertificateDer;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, warn};

/// Bundle shipped with the crate; allows operation without public internet
/// access as long as the bundled roots stay fresh.
const EMBEDDED_BUNDLE: &[u8] = include_bytes!("certs/global-bundle.pem");

/// Well-known location of the replacement bundle.
const DEFAULT_REFRESH_URL: &str =
    "https://truststore.pki.rds.amazonaws.com/global/global-bundle.pem";

/// Certificates closer to expiry than this trigger a remote refresh.
const DEFAULT_FRESHNESS_THRESHOLD: Duration = Duration::from_secs(60 * 60);

/// Where the root certificates come from.
#[derive(Debug, Clone)]
pub enum RootSource {
    /// The bundle embedded in this crate (default)
    Embedded,
    /// A caller-provided PEM bundle held in memory
    Pem(Vec<u8>),
    /// A PEM bundle on disk
    File(PathBuf),
    /// The compiled-in `webpki-roots` anchors
    WebPki,
    /// The platform certificate store
    Native,
}

/// A GET capability used only for the fallback bundle refresh.
pub type BundleFetcher = Arc<dyn Fn(String) -> BoxFuture<'static, Result<Vec<u8>>> + Send + Sync>;

fn http_fetcher() -> BundleFetcher {
    Arc::new(|url: String| {
        Box::pin(async move {
            let response = reqwest::get(&url)
                .await
                .and_then(|r| r.error_for_status())
                .map_err(|e| Error::TrustStore(format!("bundle fetch from '{url}' failed: {e}")))?;
            let body = response
                .bytes()
                .await
                .map_err(|e| Error::TrustStore(format!("bundle fetch from '{url}' failed: {e}")))?;
            Ok(body.to_vec())
        })
    })
}

/// The TLS registration record for one host: trust material plus the server
/// name the certificate chain is expected to present.
#[derive(Clone)]
pub struct HostTls {
    /// Compiled client configuration rooted in the cached trust store
    pub config: Arc<ClientConfig>,
    /// Expected server name (SNI and certificate verification)
    pub server_name: String,
}

impl std::fmt::Debug for HostTls {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostTls")
            .field("config", &"<ClientConfig>")
            .field("server_name", &self.server_name)
            .finish()
    }
}

/// Expiry-aware, init-once cache of root certificates with a per-host TLS
/// registry.
pub struct TrustCache {
    source: RootSource,
    refresh_url: String,
    freshness_threshold: Duration,
    fetcher: BundleFetcher,
    store: OnceCell<std::result::Result<Arc<RootCertStore>, String>>,
    init_attempts: AtomicU32,
    registry: RwLock<HashMap<String, HostTls>>,
}

impl std::fmt::Debug for TrustCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustCache")
            .field("source", &self.source)
            .field("refresh_url", &self.refresh_url)
            .field("freshness_threshold", &self.freshness_threshold)
            .field("initialized", &self.store.initialized())
            .finish()
    }
}

impl Default for TrustCache {
    fn default() -> Self {
        Self::new(RootSource::Embedded)
    }
}

impl TrustCache {
    /// Create a cache over the given root source.
    pub fn new(source: RootSource) -> Self {
        Self {
            source,
            refresh_url: DEFAULT_REFRESH_URL.to_string(),
            freshness_threshold: DEFAULT_FRESHNESS_THRESHOLD,
            fetcher: http_fetcher(),
            store: OnceCell::new(),
            init_attempts: AtomicU32::new(0),
            registry: RwLock::new(HashMap::new()),
        }
    }

    /// The process-wide cache: embedded bundle, HTTP fallback refresh.
    pub fn global() -> Arc<TrustCache> {
        static GLOBAL: OnceLock<Arc<TrustCache>> = OnceLock::new();
        GLOBAL
            .get_or_init(|| Arc::new(TrustCache::new(RootSource::Embedded)))
            .clone()
    }

    /// Override the replacement-bundle URL.
    pub fn with_refresh_url(mut self, url: impl Into<String>) -> Self {
        self.refresh_url = url.into();
        self
    }

    /// Override the near-expiry threshold.
    pub fn with_freshness_threshold(mut self, threshold: Duration) -> Self {
        self.freshness_threshold = threshold;
        self
    }

    /// Override the GET capability used for the fallback refresh.
    pub fn with_fetcher(mut self, fetcher: BundleFetcher) -> Self {
        self.fetcher = fetcher;
        self
    }

    /// Number of initialization attempts performed so far. At most 1 for the
    /// life of the cache; observable so callers can verify single-flight
    /// behavior.
    pub fn initialization_attempts(&self) -> u32 {
        self.init_attempts.load(Ordering::SeqCst)
    }

    /// Get the cached root trust store, initializing it on first use.
    ///
    /// Concurrent first calls are single-flighted: exactly one initialization
    /// runs, everyone gets its outcome. A cached failure is returned to every
    /// subsequent caller.
    pub async fn trust_store(&self) -> Result<Arc<RootCertStore>> {
        let outcome = self
            .store
            .get_or_init(|| async {
                self.init_attempts.fetch_add(1, Ordering::SeqCst);
                self.initialize().await
            })
            .await;

        match outcome {
            Ok(store) => Ok(store.clone()),
            Err(message) => Err(Error::TrustStore(message.clone())),
        }
    }

    /// Register TLS material for a canonical `host:port` key so the transport
    /// can select it at dial time.
    pub async fn register_host(
        &self,
        key: impl Into<String>,
        server_name: impl Into<String>,
    ) -> Result<()> {
        let store = self.trust_store().await?;
        let config = ClientConfig::builder()
            .with_root_certificates(store)
            .with_no_client_auth();
        let record = HostTls {
            config: Arc::new(config),
            server_name: server_name.into(),
        };

        let key = key.into();
        debug!(key = %key, server_name = %record.server_name, "registered per-host TLS configuration");
        self.registry.write().await.insert(key, record);
        Ok(())
    }

    /// Look up the TLS registration for a `host:port` key.
    pub async fn host_tls(&self, key: &str) -> Option<HostTls> {
        self.registry.read().await.get(key).cloned()
    }

    async fn initialize(&self) -> std::result::Result<Arc<RootCertStore>, String> {
        match &self.source {
            RootSource::Embedded => self.build_with_refresh(EMBEDDED_BUNDLE).await,
            RootSource::Pem(bytes) => self.build_with_refresh(bytes).await,
            RootSource::File(path) => {
                let bytes = tokio::fs::read(path)
                    .await
                    .map_err(|e| format!("failed to read root bundle '{}': {e}", path.display()))?;
                store_from_certs(parse_pem_bundle(&bytes)?)
            }
            RootSource::WebPki => {
                let mut store = RootCertStore::empty();
                store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
                Ok(Arc::new(store))
            }
            RootSource::Native => {
                let result = rustls_native_certs::load_native_certs();
                let mut store = RootCertStore::empty();
                for cert in result.certs {
                    let _ = store.add_parsable_certificates(std::iter::once(cert));
                }
                if store.is_empty() {
                    return Err("failed to load any platform root certificates".into());
                }
                Ok(Arc::new(store))
            }
        }
    }

    /// Build a store from a PEM bundle, refreshing from the remote source when
    /// the bundle is unusable or any of its certificates is near expiry.
    async fn build_with_refresh(
        &self,
        bundle: &[u8],
    ) -> std::result::Result<Arc<RootCertStore>, String> {
        let local = parse_pem_bundle(bundle).and_then(|certs| {
            if bundle_near_expiry(&certs, self.freshness_threshold)? {
                Err("a bundled root certificate is near expiry".to_string())
            } else {
                Ok(certs)
            }
        });

        let certs = match local {
            Ok(certs) => certs,
            Err(reason) => {
                warn!(reason = %reason, url = %self.refresh_url, "refreshing root bundle from remote source");
                crate::metrics::counters::trust_refresh();
                let bytes = (self.fetcher)(self.refresh_url.clone())
                    .await
                    .map_err(|e| e.to_string())?;
                parse_pem_bundle(&bytes)?
            }
        };

        store_from_certs(certs)
    }
}

fn parse_pem_bundle(bytes: &[u8]) -> std::result::Result<Vec<CertificateDer<'static>>, String> {
    let mut reader = std::io::Cursor::new(bytes);
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| format!("failed to parse PEM bundle: {e}"))?;
    if certs.is_empty() {
        return Err("no certificates found in bundle".into());
    }
    Ok(certs)
}

/// Whether any certificate expires within `threshold` from now (or has
/// already expired, or cannot be parsed well enough to tell).
fn bundle_near_expiry(
    certs: &[CertificateDer<'_>],
    threshold: Duration,
) -> std::result::Result<bool, String> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| format!("system clock before epoch: {e}"))?
        .as_secs() as i64;
    let cutoff = now.saturating_add(threshold.as_secs() as i64);

    for der in certs {
        let (_, cert) = x509_parser::parse_x509_certificate(der.as_ref())
            .map_err(|e| format!("failed to parse certificate in bundle: {e}"))?;
        if cert.validity().not_after.timestamp() < cutoff {
            return Ok(true);
        }
    }
    Ok(false)
}

fn store_from_certs(
    certs: Vec<CertificateDer<'static>>,
) -> std::result::Result<Arc<RootCertStore>, String> {
    let mut store = RootCertStore::empty();
    let (added, _ignored) = store.add_parsable_certificates(certs);
    if added == 0 {
        return Err("no certificate in the bundle was usable as a trust anchor".into());
    }
    Ok(Arc::new(store))
}
