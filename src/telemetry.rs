//! OpenTelemetry counters for the acquisition pipeline.
//!
//! Compiled behind the `telemetry` cargo feature. Counters track items
//! entering the managers, items processed by workers, and items sent to
//! egress, all labelled by manager.

use opentelemetry::global;
use opentelemetry::metrics::Counter;
use opentelemetry::KeyValue;
use std::sync::OnceLock;

static METRICS: OnceLock<PipelineMetricsRecorder> = OnceLock::new();

/// Holds OpenTelemetry metric instruments for pipeline observability.
pub struct PipelineMetricsRecorder {
    /// Items fanned out into manager input queues
    pub items_ingested_total: Counter<u64>,
    /// Items processed by workers
    pub items_processed_total: Counter<u64>,
    /// Items sent on egress sockets
    pub items_egressed_total: Counter<u64>,
}

/// Get the global pipeline metrics recorder (None if not initialized).
pub fn metrics() -> Option<&'static PipelineMetricsRecorder> {
    METRICS.get()
}

/// Initialize pipeline metrics using the global OpenTelemetry meter
/// provider.
///
/// Safe to call multiple times; only the first call takes effect.
pub fn init_pipeline_metrics() {
    let meter = global::meter("daqpipe");

    let recorder = PipelineMetricsRecorder {
        items_ingested_total: meter
            .u64_counter("daqpipe_items_ingested_total")
            .with_description("Items fanned out into manager input queues")
            .init(),
        items_processed_total: meter
            .u64_counter("daqpipe_items_processed_total")
            .with_description("Items processed by workers")
            .init(),
        items_egressed_total: meter
            .u64_counter("daqpipe_items_egressed_total")
            .with_description("Items sent on egress sockets")
            .init(),
    };

    let _ = METRICS.set(recorder);
}

/// Record an item entering a manager. No-op if metrics are not initialized.
pub fn record_ingested(manager: &str) {
    if let Some(m) = metrics() {
        m.items_ingested_total
            .add(1, &[KeyValue::new("manager", manager.to_string())]);
    }
}

/// Record a processed item. No-op if metrics are not initialized.
pub fn record_processed(manager: &str) {
    if let Some(m) = metrics() {
        m.items_processed_total
            .add(1, &[KeyValue::new("manager", manager.to_string())]);
    }
}

/// Record an egressed item. No-op if metrics are not initialized.
pub fn record_egressed(manager: &str) {
    if let Some(m) = metrics() {
        m.items_egressed_total
            .add(1, &[KeyValue::new("manager", manager.to_string())]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_no_panic_without_init() {
        record_ingested("WorkerManager-ADP1-Generic");
        record_processed("WorkerManager-ADP1-Generic");
        record_egressed("");
    }

    #[test]
    fn test_metrics_none_without_init() {
        let _ = metrics();
    }
}
