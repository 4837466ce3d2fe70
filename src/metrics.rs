use std::sync::Arc;
use tracing::{error, info};

use anyhow::{Context, Result};
use axum::{Router, http::StatusCode, routing::get};
use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Gauge, MeterProvider};
use opentelemetry_sdk::metrics::{MetricError, SdkMeterProvider};
use prometheus::{Encoder, TextEncoder};
use std::net::SocketAddr;

pub struct Metrics {
    registry: Arc<prometheus::Registry>,
    _provider: SdkMeterProvider,
    pub contract_id: String,

    // Stream metrics
    pub frames_received: Counter<u64>,
    pub frames_malformed: Counter<u64>,
    pub connections_opened: Counter<u64>,
    pub disconnects: Counter<u64>,
    pub reconnects_deferred: Counter<u64>,

    // Reconciler metrics
    pub events_normalized: Counter<u64>,
    pub events_skipped: Counter<u64>,
    pub events_merged: Counter<u64>,
    pub timeline_len: Gauge<u64>,
}

impl Metrics {
    pub fn new(contract_id: String) -> Result<Self, MetricError> {
        // Create a new prometheus registry
        let registry = prometheus::Registry::new();

        // Configure OpenTelemetry to use this registry
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()?;

        // Set up a meter to create instruments
        let provider = SdkMeterProvider::builder().with_reader(exporter).build();
        let meter = provider.meter("feed_metrics");

        let frames_received = meter
            .u64_counter("feed_frames_received")
            .with_description("Total number of inbound frames received")
            .build();

        let frames_malformed = meter
            .u64_counter("feed_frames_malformed")
            .with_description("Inbound frames that could not be parsed as JSON")
            .build();

        let connections_opened = meter
            .u64_counter("feed_connections_opened")
            .with_description("Successful connection opens (each one resubscribes)")
            .build();

        let disconnects = meter
            .u64_counter("feed_disconnects")
            .with_description("Connections lost to close frames, errors or end of stream")
            .build();

        let reconnects_deferred = meter
            .u64_counter("feed_reconnects_deferred")
            .with_description("Reconnect attempts deferred while the host was hidden")
            .build();

        let events_normalized = meter
            .u64_counter("feed_events_normalized")
            .with_description("Raw events successfully normalized")
            .build();

        let events_skipped = meter
            .u64_counter("feed_events_skipped")
            .with_description("Malformed raw events skipped during normalization")
            .build();

        let events_merged = meter
            .u64_counter("feed_events_merged")
            .with_description("Normalized events inserted into the timeline")
            .build();

        let timeline_len = meter
            .u64_gauge("feed_timeline_len")
            .with_description("Current number of events in the timeline")
            .build();

        Ok(Self {
            registry: Arc::new(registry),
            _provider: provider,
            contract_id,
            frames_received,
            frames_malformed,
            connections_opened,
            disconnects,
            reconnects_deferred,
            events_normalized,
            events_skipped,
            events_merged,
            timeline_len,
        })
    }

    pub fn labels(&self) -> [KeyValue; 1] {
        [KeyValue::new("contract", self.contract_id.clone())]
    }

    pub async fn start_metrics_server(&self, addr: &str, port: u16) -> Result<()> {
        let addr = format!("{addr}:{port}")
            .parse::<SocketAddr>()
            .context("invalid metrics address")?;
        let registry = self.registry.clone();

        let app = Router::new().route("/metrics", get(move || metrics_handler(registry.clone())));

        // Determine the access URL based on the binding address. Only used for logging.
        let access_url = if addr.ip().to_string() == "0.0.0.0" {
            format!("http://localhost:{port}/metrics")
        } else {
            format!("http://{}:{port}/metrics", addr.ip())
        };

        info!(
            "Starting metrics server - binding to {} (accessible at {})",
            addr, access_url
        );

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind metrics server to {}", addr))?;

        // Spawn the server in a separate task
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!("Metrics server stopped: {}", e);
            }
        });

        Ok(())
    }
}

async fn metrics_handler(registry: Arc<prometheus::Registry>) -> Result<String, StatusCode> {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = vec![];
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}
