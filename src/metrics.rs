use anyhow::Result;
use once_cell::sync::Lazy;
use prometheus::{opts, register_int_counter, Encoder, IntCounter, TextEncoder};

pub static CONNECTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "switchboard_connections_total",
        "Total number of client connections"
    ))
    .unwrap()
});

pub static CALLS_INITIATED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "switchboard_calls_initiated_total",
        "Total number of call-initiate messages routed"
    ))
    .unwrap()
});

pub static RATE_LIMIT_DENIED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "switchboard_rate_limit_denied_total",
        "Total number of messages denied by the rate limiter"
    ))
    .unwrap()
});

pub static VALIDATION_REJECTED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "switchboard_validation_rejected_total",
        "Total number of messages rejected by the validation gate"
    ))
    .unwrap()
});

pub static FANOUT_PUBLISHED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "switchboard_fanout_published_total",
        "Total number of envelopes published to the fan-out bus"
    ))
    .unwrap()
});

pub fn gather_metrics() -> Result<String> {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode(&metric_families, &mut buffer)?;

    Ok(String::from_utf8(buffer)?)
}
