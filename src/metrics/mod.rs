//! Metrics Module
//!
//! Prometheus-compatible metrics for the exchange pipeline:
//! - Matcher metrics (commands applied, match latency, trades)
//! - Sequencer metrics (events translated, gap no-ops)
//! - Pipeline metrics (batches persisted, batch size)
//! - Consumer metrics (trades recorded, order transitions)
//! - Generator metrics (orders submitted)

#![allow(dead_code)]

use ::metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Metric names as constants for consistency
pub mod names {
    // Matcher
    pub const COMMANDS_APPLIED_TOTAL: &str = "matcher_commands_applied_total";
    pub const COMMAND_MATCH_DURATION_SECONDS: &str = "matcher_command_match_duration_seconds";
    pub const TRADES_EXECUTED_TOTAL: &str = "matcher_trades_executed_total";

    // Sequencer
    pub const EVENTS_SEQUENCED_TOTAL: &str = "sequencer_events_total";
    pub const GAP_COMMANDS_TOTAL: &str = "sequencer_gap_commands_total";

    // Result pipeline
    pub const RESULT_BATCHES_TOTAL: &str = "pipeline_result_batches_total";
    pub const RESULT_BATCH_SIZE: &str = "pipeline_result_batch_size";

    // Result consumer
    pub const TRADES_RECORDED_TOTAL: &str = "consumer_trades_recorded_total";
    pub const ORDERS_POSTED_TOTAL: &str = "consumer_orders_posted_total";
    pub const ORDERS_COMPLETED_TOTAL: &str = "consumer_orders_completed_total";

    // Load generator
    pub const ORDERS_GENERATED_TOTAL: &str = "gen_orders_generated_total";
}

/// Label keys
pub mod labels {
    pub const RESULT_TYPE: &str = "result_type";
    pub const EVENT_TYPE: &str = "event_type";
}

/// Install the Prometheus exporter with an HTTP scrape endpoint.
pub fn init_metrics(port: u16) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port))
        // Match durations are sub-millisecond in the common case.
        .set_buckets_for_metric(
            Matcher::Full(names::COMMAND_MATCH_DURATION_SECONDS.to_string()),
            &[
                0.000001, 0.000005, 0.00001, 0.00005, 0.0001, 0.0005, 0.001, 0.005, 0.01,
            ],
        )?
        .set_buckets_for_metric(
            Matcher::Full(names::RESULT_BATCH_SIZE.to_string()),
            &[1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0],
        )?
        .install()
}

// ============================================================================
// Matcher
// ============================================================================

/// Record one applied command and its match duration.
pub fn record_command_applied(result_type: &'static str, duration_secs: f64) {
    counter!(
        names::COMMANDS_APPLIED_TOTAL,
        labels::RESULT_TYPE => result_type
    )
    .increment(1);

    histogram!(names::COMMAND_MATCH_DURATION_SECONDS).record(duration_secs);
}

/// Record trades emitted by one command.
pub fn record_trades_executed(count: usize) {
    counter!(names::TRADES_EXECUTED_TOTAL).increment(count as u64);
}

// ============================================================================
// Sequencer
// ============================================================================

/// Record an order event translated into a real command.
pub fn record_event_sequenced(event_type: &str) {
    counter!(
        names::EVENTS_SEQUENCED_TOTAL,
        labels::EVENT_TYPE => event_type.to_string()
    )
    .increment(1);
}

/// Record a synthesized gap no-op command.
pub fn record_gap_command() {
    counter!(names::GAP_COMMANDS_TOTAL).increment(1);
}

// ============================================================================
// Result pipeline
// ============================================================================

/// Record a persisted result batch.
pub fn record_batch_persisted(size: usize) {
    counter!(names::RESULT_BATCHES_TOTAL).increment(1);
    histogram!(names::RESULT_BATCH_SIZE).record(size as f64);
}

// ============================================================================
// Result consumer
// ============================================================================

pub fn record_trade_recorded() {
    counter!(names::TRADES_RECORDED_TOTAL).increment(1);
}

pub fn record_order_posted() {
    counter!(names::ORDERS_POSTED_TOTAL).increment(1);
}

pub fn record_order_completed() {
    counter!(names::ORDERS_COMPLETED_TOTAL).increment(1);
}

// ============================================================================
// Load generator
// ============================================================================

pub fn record_order_generated() {
    counter!(names::ORDERS_GENERATED_TOTAL).increment(1);
}
