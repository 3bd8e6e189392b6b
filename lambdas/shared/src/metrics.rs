//! CloudWatch metrics in Embedded Metric Format
//!
//! Handlers count through the `metrics` facade. The collector installed by
//! [`init_metrics`] renders the counters as EMF records when the function
//! flushes them at the end of an invocation.

use std::io::Write;

use metrics_cloudwatch_embedded::Builder;
pub use metrics_cloudwatch_embedded::Collector;
use tracing::warn;

use crate::errors::{Error, Result};

pub const NAMESPACE: &str = "KoekalenteriApp";

/// Property carrying the API Gateway request id
pub const REQUEST_ID_PROPERTY: &str = "RequestId";

/// Install the EMF recorder, once per container
pub fn init_metrics() -> Result<&'static Collector> {
    Builder::new()
        .cloudwatch_namespace(NAMESPACE)
        .init()
        .map_err(|e| Error::Internal(format!("Failed to initialize metrics: {}", e)))
}

pub fn metrics_success(function: &str) {
    metrics::counter!("Success", "Service" => function.to_string()).increment(1);
}

pub fn metrics_error(function: &str) {
    metrics::counter!("Error", "Service" => function.to_string()).increment(1);
}

/// Print the metrics of the invocation to stdout
pub fn flush_metrics(collector: &Collector, request_id: Option<&str>) {
    flush_metrics_to(collector, request_id, std::io::stdout());
}

pub fn flush_metrics_to(collector: &Collector, request_id: Option<&str>, writer: impl Write) {
    if let Some(request_id) = request_id {
        collector.set_property(REQUEST_ID_PROPERTY, request_id.to_string());
    }
    if let Err(e) = collector.flush(writer) {
        warn!(error = %e, "Failed to flush metrics");
    }
}
