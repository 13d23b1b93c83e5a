//! Connection management
//!
//! This module handles:
//! * The reconfigurable connection factory and its predicate gating
//! * The driver seam and built-in TCP/TLS transport driver
//! * The root-certificate trust cache and per-host TLS registry

mod connector;
mod transport;
mod trust;

pub use connector::{
    reconfigure_older_than, reconfigure_when, ReconfigurableConnector, ReconfigurePredicate,
};
pub use transport::{Driver, RawConnection, TcpDriver};
pub use trust::{BundleFetcher, HostTls, RootSource, TrustCache};
