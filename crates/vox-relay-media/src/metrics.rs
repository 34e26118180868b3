//! Prometheus-style metrics for the relay pipeline.
//!
//! Only compiled with the `metrics` feature. Installing a recorder is left
//! to the binary; without one these calls are no-ops.

use crate::stats::Counter;

/// Record one pipeline event.
pub fn record(counter: Counter) {
    if counter.is_error() {
        let labels = [("kind", counter.label().to_string())];
        metrics::counter!("relay_errors_total", &labels).increment(1);
    } else {
        let labels = [("stage", counter.label().to_string())];
        metrics::counter!("relay_frames_total", &labels).increment(1);
    }
}

/// Record a relay session becoming active.
pub fn record_session_open() {
    metrics::gauge!("relay_sessions_active").increment(1.0);
}

/// Record a relay session closing.
pub fn record_session_close() {
    metrics::gauge!("relay_sessions_active").decrement(1.0);
}

/// Record how long a child task took to stop.
pub fn record_task_shutdown(task: &'static str, duration_secs: f64) {
    let labels = [("task", task.to_string())];
    metrics::histogram!("relay_task_shutdown_seconds", &labels).record(duration_secs);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_does_not_panic() {
        // No recorder installed: the metrics crate falls back to a no-op.
        record(Counter::FramesSent);
        record(Counter::SendErrors);
    }

    #[test]
    fn test_session_gauges_do_not_panic() {
        record_session_open();
        record_session_close();
        record_task_shutdown("uplink", 0.01);
    }
}
