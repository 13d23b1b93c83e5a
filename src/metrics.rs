//! Metric names and recording helpers
//!
//! All metrics are recorded through the [`metrics`] facade; wire up any
//! compatible exporter in the host application. Counters:
//!
//! * `credpool_reconfigure_total{endpoint, outcome}` — factory rebuilds
//! * `credpool_trust_refresh_total` — remote trust-bundle refreshes
//! * `credpool_dial_total{driver, outcome}` — physical dial attempts

/// Shared label values
pub mod labels {
    /// The operation completed
    pub const OUTCOME_SUCCESS: &str = "success";
    /// The operation failed
    pub const OUTCOME_ERROR: &str = "error";
}

/// Counter recording helpers
pub mod counters {
    /// Record a connection-factory rebuild for an endpoint.
    pub fn reconfigure(endpoint: &str, outcome: &'static str) {
        metrics::counter!(
            "credpool_reconfigure_total",
            "endpoint" => endpoint.to_string(),
            "outcome" => outcome
        )
        .increment(1);
    }

    /// Record a remote refresh of the root trust bundle.
    pub fn trust_refresh() {
        metrics::counter!("credpool_trust_refresh_total").increment(1);
    }

    /// Record a physical dial attempt.
    pub fn dial(driver: &'static str, outcome: &'static str) {
        metrics::counter!(
            "credpool_dial_total",
            "driver" => driver,
            "outcome" => outcome
        )
        .increment(1);
    }
}
