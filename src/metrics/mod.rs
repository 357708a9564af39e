//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Request scheduling and response outcomes
//! - Nonce allocation and resets
//! - Receipt confirmation waits

use crate::error::{ClientError, ClientResult};

use axum::{routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Pipeline metrics
    pub static ref REQUESTS_SCHEDULED: CounterVec = register_counter_vec!(
        "evm_txclient_requests_scheduled_total",
        "Total requests accepted into the broadcast queue",
        &[]
    ).expect("metric can be registered");

    pub static ref RESPONSES: CounterVec = register_counter_vec!(
        "evm_txclient_responses_total",
        "Total responses delivered by outcome",
        &["outcome"]
    ).expect("metric can be registered");

    pub static ref BROADCAST_LATENCY: HistogramVec = register_histogram_vec!(
        "evm_txclient_broadcast_latency_seconds",
        "Time from dequeue to response for a single request",
        &[],
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    ).expect("metric can be registered");

    // Nonce metrics
    pub static ref NONCES_ALLOCATED: CounterVec = register_counter_vec!(
        "evm_txclient_nonces_allocated_total",
        "Total nonces handed out by the allocator",
        &[]
    ).expect("metric can be registered");

    pub static ref NONCE_RESETS: CounterVec = register_counter_vec!(
        "evm_txclient_nonce_resets_total",
        "Total nonce resynchronisations",
        &[]
    ).expect("metric can be registered");

    // Receipt metrics
    pub static ref RECEIPT_WAITS: CounterVec = register_counter_vec!(
        "evm_txclient_receipt_waits_total",
        "Total receipt waits by outcome",
        &["outcome"]
    ).expect("metric can be registered");
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> ClientResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| ClientError::Config(format!("bind metrics port {}: {}", self.port, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| ClientError::Config(format!("metrics server: {}", e)))?;

        Ok(())
    }
}

async fn metrics_handler() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# failed to encode metrics: {}\n", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

// Helper functions to record metrics

pub fn record_request_scheduled() {
    REQUESTS_SCHEDULED.with_label_values(&[]).inc();
}

pub fn record_response(outcome: Result<(), &ClientError>) {
    let label = match outcome {
        Ok(()) => "success",
        Err(e) => e.kind(),
    };
    RESPONSES.with_label_values(&[label]).inc();
}

pub fn record_broadcast_latency(latency_secs: f64) {
    BROADCAST_LATENCY.with_label_values(&[]).observe(latency_secs);
}

pub fn record_nonce_allocated() {
    NONCES_ALLOCATED.with_label_values(&[]).inc();
}

pub fn record_nonce_reset() {
    NONCE_RESETS.with_label_values(&[]).inc();
}

pub fn record_receipt_wait(confirmed: bool) {
    let label = if confirmed { "confirmed" } else { "not_confirmed" };
    RECEIPT_WAITS.with_label_values(&[label]).inc();
}
