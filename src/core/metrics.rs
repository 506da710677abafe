//! Metrics collection using Prometheus
//!
//! Tracks broadcast throughput and health:
//! - Per-recipient outcomes by channel
//! - Retries against the providers
//! - Runs in flight and finalized runs by status
//! - Progress writes that could not be persisted

use lazy_static::lazy_static;
use prometheus::{register_int_counter_vec, register_int_gauge, IntCounterVec, IntGauge};

lazy_static! {
    /// Recipient outcomes
    /// Labels: channel (telegram/email), outcome (sent/failed/blocked)
    pub static ref BROADCAST_OUTCOMES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "tgcast_broadcast_outcomes_total",
        "Per-recipient delivery outcomes",
        &["channel", "outcome"]
    )
    .unwrap();

    /// Provider retries
    /// Labels: channel
    pub static ref SEND_RETRIES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "tgcast_send_retries_total",
        "Sends retried after a transient provider error",
        &["channel"]
    )
    .unwrap();

    /// Finalized runs
    /// Labels: status (completed/partial/failed/cancelled)
    pub static ref BROADCAST_RUNS_FINISHED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "tgcast_broadcast_runs_finished_total",
        "Broadcast runs that reached a terminal status",
        &["status"]
    )
    .unwrap();

    /// Progress writes dropped after exhausting local retries
    pub static ref PROGRESS_WRITE_FAILURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "tgcast_progress_write_failures_total",
        "Progress snapshots that could not be persisted",
        &["stage"]
    )
    .unwrap();

    /// Runs currently owned by a coordinator
    pub static ref BROADCAST_RUNS_ACTIVE: IntGauge = register_int_gauge!(
        "tgcast_broadcast_runs_active",
        "Broadcast runs in flight"
    )
    .unwrap();
}

pub fn record_outcome(channel: &str, outcome: &str) {
    BROADCAST_OUTCOMES_TOTAL.with_label_values(&[channel, outcome]).inc();
}

pub fn record_send_retry(channel: &str) {
    SEND_RETRIES_TOTAL.with_label_values(&[channel]).inc();
}

pub fn record_run_finished(status: &str) {
    BROADCAST_RUNS_FINISHED_TOTAL.with_label_values(&[status]).inc();
}

pub fn record_progress_write_failure(stage: &str) {
    PROGRESS_WRITE_FAILURES_TOTAL.with_label_values(&[stage]).inc();
}

/// Renders every registered metric in the Prometheus text format.
pub fn render() -> String {
    use prometheus::{Encoder, TextEncoder};

    let mut buffer = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&prometheus::gather(), &mut buffer) {
        log::warn!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
