//! Metrics definitions for the chat relay.
//!
//! All metrics follow Prometheus naming conventions:
//! - `chat_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `result`: success, error
//! - `reason`: malformed, `unknown_type`, `not_utf8`

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize the Prometheus recorder and return the handle used to render
/// `/metrics`.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Fan-out is an in-memory loop over local sessions
        .set_buckets_for_metric(
            Matcher::Full("chat_fanout_duration_seconds".to_string()),
            &[
                0.000_05, 0.000_1, 0.000_25, 0.000_5, 0.001, 0.002_5, 0.005, 0.010, 0.025, 0.050,
            ],
        )
        .map_err(|e| format!("Failed to set fan-out buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Hub
// ============================================================================

/// Set the number of registered sessions on this instance.
///
/// Metric: `chat_sessions_active`
pub fn set_sessions_active(count: usize) {
    // usize to f64 conversion is safe for realistic session counts (< 2^53)
    #[allow(clippy::cast_precision_loss)]
    gauge!("chat_sessions_active").set(count as f64);
}

/// Record one fan-out pass.
///
/// Metrics: `chat_fanout_deliveries_total`, `chat_fanout_duration_seconds`
pub fn record_fanout(delivered: usize, duration: Duration) {
    counter!("chat_fanout_deliveries_total").increment(delivered as u64);
    histogram!("chat_fanout_duration_seconds").record(duration.as_secs_f64());
}

/// Record sessions removed because their outbound queue was full or closed.
///
/// Metric: `chat_slow_consumer_evictions_total`
pub fn record_evictions(count: usize) {
    if count > 0 {
        counter!("chat_slow_consumer_evictions_total").increment(count as u64);
    }
}

/// Record a join/leave notice dropped because the notice queue was full.
///
/// Metric: `chat_presence_notices_dropped_total`
pub fn record_presence_notice_dropped() {
    counter!("chat_presence_notices_dropped_total").increment(1);
}

// ============================================================================
// Bus
// ============================================================================

/// Record a publish attempt.
///
/// Metric: `chat_bus_publish_total`
/// Labels: `result` (success, error)
pub fn record_bus_publish(result: &'static str) {
    counter!("chat_bus_publish_total", "result" => result).increment(1);
}

/// Record a message relayed from the bus subscription.
///
/// Metric: `chat_bus_messages_received_total`
pub fn record_bus_message_received() {
    counter!("chat_bus_messages_received_total").increment(1);
}

// ============================================================================
// Sessions
// ============================================================================

/// Record a skipped client frame.
///
/// Metric: `chat_protocol_errors_total`
/// Labels: `reason`
pub fn record_protocol_error(reason: &'static str) {
    counter!("chat_protocol_errors_total", "reason" => reason).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    // These execute the recording functions against the global no-op
    // recorder. Values are not asserted.

    #[test]
    fn test_set_sessions_active() {
        set_sessions_active(0);
        set_sessions_active(1);
        set_sessions_active(10_000);
    }

    #[test]
    fn test_record_fanout() {
        record_fanout(0, Duration::ZERO);
        record_fanout(3, Duration::from_micros(40));
        record_fanout(5_000, Duration::from_millis(12));
    }

    #[test]
    fn test_record_evictions() {
        record_evictions(0);
        record_evictions(2);
    }

    #[test]
    fn test_record_presence_notice_dropped() {
        record_presence_notice_dropped();
    }

    #[test]
    fn test_record_bus_metrics() {
        record_bus_publish("success");
        record_bus_publish("error");
        record_bus_message_received();
    }

    #[test]
    fn test_record_protocol_error() {
        record_protocol_error("malformed");
        record_protocol_error("unknown_type");
        record_protocol_error("not_utf8");
    }
}
