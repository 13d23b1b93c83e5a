//! End-to-end composition tests: writer/replica shaping, read routing, and
//! failure isolation across endpoints of one logical handle.

use async_trait::async_trait;
use credpool::auth::{AuthProvider, ConnectionParameters, PasswordAuth};
use credpool::broker::{BrokerConfig, EndpointConfig, LogicalHandle, PoolLimits};
use credpool::connection::{Driver, RootSource, TrustCache};
use credpool::{Error, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Records the host of every dial it performs and hands the resolved
/// parameters back as the "connection".
struct RecordingDriver {
    dialed: Mutex<Vec<String>>,
}

impl RecordingDriver {
    fn new() -> Self {
        Self {
            dialed: Mutex::new(Vec::new()),
        }
    }

    fn dialed_hosts(&self) -> Vec<String> {
        self.dialed.lock().unwrap().clone()
    }
}

#[async_trait]
impl Driver for RecordingDriver {
    type Connection = ConnectionParameters;

    fn name(&self) -> &'static str {
        "recording"
    }

    async fn connect(&self, params: &ConnectionParameters) -> Result<Self::Connection> {
        self.dialed.lock().unwrap().push(params.host.clone());
        Ok(params.clone())
    }
}

/// Like [`RecordingDriver`], but reports every connection as broken so the
/// pool discards it on return and each acquire dials a fresh connection.
struct SingleUseDriver {
    inner: RecordingDriver,
}

#[async_trait]
impl Driver for SingleUseDriver {
    type Connection = ConnectionParameters;

    fn name(&self) -> &'static str {
        "single-use"
    }

    async fn connect(&self, params: &ConnectionParameters) -> Result<Self::Connection> {
        self.inner.connect(params).await
    }

    fn is_broken(&self, _conn: &mut Self::Connection) -> bool {
        true
    }
}

struct FailingProvider;

#[async_trait]
impl AuthProvider for FailingProvider {
    async fn resolve(&self) -> Result<ConnectionParameters> {
        Err(Error::Resolution("secret store unreachable".into()))
    }
}

/// Resolves successfully and counts how many times it was asked to.
struct CountingProvider {
    host: String,
    resolves: AtomicUsize,
    forces: bool,
}

impl CountingProvider {
    fn new(host: &str, forces: bool) -> Self {
        Self {
            host: host.to_string(),
            resolves: AtomicUsize::new(0),
            forces,
        }
    }
}

#[async_trait]
impl AuthProvider for CountingProvider {
    async fn resolve(&self) -> Result<ConnectionParameters> {
        let n = self.resolves.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ConnectionParameters {
            host: self.host.clone(),
            port: 3306,
            schema: "orders".into(),
            principal: "svc".into(),
            secret: format!("secret-{n}"),
            tls_host: None,
        })
    }

    fn forces_reconfigure(&self) -> bool {
        self.forces
    }
}

fn password_endpoint(name: &str, host: &str) -> EndpointConfig {
    EndpointConfig::new(
        name,
        Arc::new(PasswordAuth::new(host, 3306, "orders", "svc", "pw")) as Arc<dyn AuthProvider>,
    )
}

fn trust() -> Arc<TrustCache> {
    Arc::new(TrustCache::new(RootSource::Embedded))
}

#[tokio::test]
async fn test_reads_round_robin_across_replicas() {
    init_tracing();
    let driver = Arc::new(RecordingDriver::new());
    let config = BrokerConfig::new()
        .writer(password_endpoint("writer", "w.db"))
        .reader(password_endpoint("reader-1", "r1.db"))
        .reader(password_endpoint("reader-2", "r2.db"));
    let handle = LogicalHandle::open_with_trust(driver.clone(), config, trust()).expect("open");

    // Each acquire lands on the next replica in turn; each replica's pool
    // dials on its first use.
    for _ in 0..4 {
        let _conn = handle.acquire_read().await.expect("read");
    }

    let dialed = driver.dialed_hosts();
    assert!(dialed.contains(&"r1.db".to_string()));
    assert!(dialed.contains(&"r2.db".to_string()));
    assert!(!dialed.contains(&"w.db".to_string()));

    let conn = handle.acquire_write().await.expect("write");
    assert_eq!(conn.host, "w.db");
}

#[tokio::test]
async fn test_reads_fall_back_to_sole_writer() {
    init_tracing();
    let driver = Arc::new(RecordingDriver::new());
    let config = BrokerConfig::new().writer(password_endpoint("writer", "w.db"));
    let handle = LogicalHandle::open_with_trust(driver.clone(), config, trust()).expect("open");

    let conn = handle.acquire_read().await.expect("read");
    assert_eq!(conn.host, "w.db");
}

#[tokio::test]
async fn test_promoted_reader_serves_writes() {
    init_tracing();
    let driver = Arc::new(RecordingDriver::new());
    let config = BrokerConfig::new()
        .reader(password_endpoint("reader-1", "r1.db"))
        .reader(password_endpoint("reader-2", "r2.db"));
    let handle = LogicalHandle::open_with_trust(driver.clone(), config, trust()).expect("open");

    let conn = handle.acquire_write().await.expect("write");
    assert_eq!(conn.host, "r1.db");
    assert_eq!(handle.replicas().len(), 1);
}

#[tokio::test]
async fn test_endpoint_failure_does_not_spread() {
    init_tracing();
    let driver = Arc::new(RecordingDriver::new());
    let writer = EndpointConfig::new("writer", Arc::new(FailingProvider) as Arc<dyn AuthProvider>)
        .with_limits(PoolLimits {
            acquire_timeout: std::time::Duration::from_millis(200),
            ..PoolLimits::default()
        });
    let config = BrokerConfig::new()
        .writer(writer)
        .reader(password_endpoint("reader-1", "r1.db"));
    let handle = LogicalHandle::open_with_trust(driver.clone(), config, trust()).expect("open");

    let err = handle.acquire_write().await.expect_err("writer must fail");
    assert!(err.to_string().contains("writer"));

    // The replica endpoint is untouched by the writer's failure.
    let conn = handle.acquire_read().await.expect("read");
    assert_eq!(conn.host, "r1.db");
}

#[tokio::test]
async fn test_forcing_provider_resolves_on_every_dial() {
    init_tracing();
    let provider = Arc::new(CountingProvider::new("w.db", true));
    let predicate = credpool::connection::reconfigure_when(|| async { Ok(false) });

    let driver = Arc::new(SingleUseDriver {
        inner: RecordingDriver::new(),
    });
    // The predicate says "never reconfigure", but the provider's tokens are
    // single-use, so the broker drops the predicate at build time.
    let config = BrokerConfig::new().writer(
        EndpointConfig::new("writer", provider.clone() as Arc<dyn AuthProvider>)
            .with_predicate(predicate),
    );
    let handle = LogicalHandle::open_with_trust(driver, config, trust()).expect("open");

    for _ in 0..3 {
        let _conn = handle.acquire_write().await.expect("write");
    }
    assert_eq!(provider.resolves.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_gated_provider_resolves_once() {
    init_tracing();
    let provider = Arc::new(CountingProvider::new("w.db", false));
    let predicate = credpool::connection::reconfigure_when(|| async { Ok(false) });

    let driver = Arc::new(SingleUseDriver {
        inner: RecordingDriver::new(),
    });
    let config = BrokerConfig::new().writer(
        EndpointConfig::new("writer", provider.clone() as Arc<dyn AuthProvider>)
            .with_predicate(predicate),
    );
    let handle = LogicalHandle::open_with_trust(driver, config, trust()).expect("open");

    for _ in 0..3 {
        let conn = handle.acquire_write().await.expect("write");
        assert_eq!(conn.secret, "secret-1");
    }
    assert_eq!(provider.resolves.load(Ordering::SeqCst), 1);
}
