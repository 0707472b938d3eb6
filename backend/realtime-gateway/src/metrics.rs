use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, TextEncoder};

use crate::error::AppError;

pub static CONNECTIONS_OPENED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "realtime_gateway_connections_opened_total",
        "Connections attached since process start",
    )
    .expect("failed to create realtime_gateway_connections_opened_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register realtime_gateway_connections_opened_total");
    counter
});

pub static CONNECTIONS_CLOSED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "realtime_gateway_connections_closed_total",
        "Connections detached since process start",
    )
    .expect("failed to create realtime_gateway_connections_closed_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register realtime_gateway_connections_closed_total");
    counter
});

pub static MESSAGES_DELIVERED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "realtime_gateway_messages_delivered_total",
        "Frames successfully written to a live connection",
    )
    .expect("failed to create realtime_gateway_messages_delivered_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register realtime_gateway_messages_delivered_total");
    counter
});

pub static MESSAGES_QUEUED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "realtime_gateway_messages_queued_total",
        "Messages buffered for users with no live connection",
    )
    .expect("failed to create realtime_gateway_messages_queued_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register realtime_gateway_messages_queued_total");
    counter
});

pub static QUEUE_EVICTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "realtime_gateway_queue_evictions_total",
        "Oldest queued messages dropped by the per-user capacity bound",
    )
    .expect("failed to create realtime_gateway_queue_evictions_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register realtime_gateway_queue_evictions_total");
    counter
});

pub static INBOUND_DROPPED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "realtime_gateway_inbound_dropped_total",
            "Inbound pub/sub messages dropped before routing",
        ),
        &["reason"],
    )
    .expect("failed to create realtime_gateway_inbound_dropped_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register realtime_gateway_inbound_dropped_total");
    counter
});

pub static LIVE_CONNECTIONS: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new(
        "realtime_gateway_live_connections",
        "Currently attached connections",
    )
    .expect("failed to create realtime_gateway_live_connections");
    prometheus::default_registry()
        .register(Box::new(gauge.clone()))
        .expect("failed to register realtime_gateway_live_connections");
    gauge
});

pub static QUEUED_MESSAGES: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new(
        "realtime_gateway_queued_messages",
        "Messages currently buffered across all per-user queues",
    )
    .expect("failed to create realtime_gateway_queued_messages");
    prometheus::default_registry()
        .register(Box::new(gauge.clone()))
        .expect("failed to register realtime_gateway_queued_messages");
    gauge
});

/// Gauges are refreshed from the registry at scrape time.
pub fn set_connection_gauges(live: i64, queued: i64) {
    LIVE_CONNECTIONS.set(live);
    QUEUED_MESSAGES.set(queued);
}

pub fn render() -> Result<String, AppError> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&prometheus::default_registry().gather(), &mut buffer)
        .map_err(|e| AppError::Metrics(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| AppError::Metrics(e.to_string()))
}
