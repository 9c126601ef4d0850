//! Prometheus metrics for the watcher and the read API.
//!
//! Everything registers into [`REGISTRY`], which `GET /metrics` encodes.

use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    /// Requests served by the read API.
    pub static ref HTTP_REQUESTS: IntCounterVec = {
        let counter = IntCounterVec::new(
            Opts::new("http_requests_total", "HTTP requests by method, path and status"),
            &["method", "path", "status"],
        )
        .expect("valid http_requests_total definition");
        REGISTRY.register(Box::new(counter.clone())).expect("register http_requests_total");
        counter
    };

    pub static ref HTTP_REQUEST_DURATION: HistogramVec = {
        let histogram = HistogramVec::new(
            HistogramOpts::new("http_request_duration_seconds", "HTTP request latency"),
            &["method", "path"],
        )
        .expect("valid http_request_duration_seconds definition");
        REGISTRY
            .register(Box::new(histogram.clone()))
            .expect("register http_request_duration_seconds");
        histogram
    };

    /// Delegations newly stored, labelled `backfill` or `live`. Rows the
    /// store already had are not counted.
    pub static ref DELEGATIONS_INSERTED: IntCounterVec = {
        let counter = IntCounterVec::new(
            Opts::new("delegations_inserted_total", "New delegations stored by source"),
            &["source"],
        )
        .expect("valid delegations_inserted_total definition");
        REGISTRY
            .register(Box::new(counter.clone()))
            .expect("register delegations_inserted_total");
        counter
    };

    pub static ref LAST_INSERTED_BLOCK: IntGauge = {
        let gauge = IntGauge::new("last_inserted_block", "Highest block level persisted")
            .expect("valid last_inserted_block definition");
        REGISTRY.register(Box::new(gauge.clone())).expect("register last_inserted_block");
        gauge
    };

    pub static ref LIVE_TAIL_FAILURES: IntCounter = {
        let counter = IntCounter::new(
            "live_tail_failures_total",
            "Head notifications or catch-up ranges whose fetch or insert failed",
        )
        .expect("valid live_tail_failures_total definition");
        REGISTRY
            .register(Box::new(counter.clone()))
            .expect("register live_tail_failures_total");
        counter
    };

    /// Re-entries into the connect state, labelled by what went wrong.
    pub static ref SUBSCRIPTION_RETRIES: IntCounterVec = {
        let counter = IntCounterVec::new(
            Opts::new("subscription_retries_total", "Events hub reconnect attempts by cause"),
            &["cause"],
        )
        .expect("valid subscription_retries_total definition");
        REGISTRY
            .register(Box::new(counter.clone()))
            .expect("register subscription_retries_total");
        counter
    };
}

pub fn record_inserted(source: &str, count: usize, highest_block: Option<u64>) {
    DELEGATIONS_INSERTED
        .with_label_values(&[source])
        .inc_by(count as u64);
    if let Some(block) = highest_block {
        if block as i64 > LAST_INSERTED_BLOCK.get() {
            LAST_INSERTED_BLOCK.set(block as i64);
        }
    }
}

/// Text exposition of every registered metric.
pub fn gather_text() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&REGISTRY.gather(), &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}
