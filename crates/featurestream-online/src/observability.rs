//! Metrics and tracing setup
//!
//! Metrics are emitted through the `metrics` facade; whichever recorder the
//! host application installs (Prometheus exporter, statsd, ...) receives
//! them. Without a recorder the calls are no-ops.
//!
//! ## Metrics Exposed:
//! - `featurestream_ingest_rows_total` - Rows received per view
//! - `featurestream_late_rows_dropped_total` - Rows dropped behind the watermark
//! - `featurestream_materialized_rows_total` - Rows written to the online store
//! - `featurestream_ingest_errors_total` - Rejected or failed batches
//! - `featurestream_ingest_duration_seconds` - Batch latency histogram
//! - `featurestream_online_read_duration_seconds` - Serving latency histogram
//! - `featurestream_apply_total` - Apply calls by outcome

use metrics::{counter, histogram};
use std::time::Instant;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// ==================== Ingest Metrics ====================

/// Timer for one pushed batch (auto-records on drop)
pub struct IngestTimer {
    start: Instant,
    feature_view: String,
}

impl IngestTimer {
    pub fn new(feature_view: &str) -> Self {
        Self {
            start: Instant::now(),
            feature_view: feature_view.to_string(),
        }
    }
}

impl Drop for IngestTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        histogram!(
            "featurestream_ingest_duration_seconds",
            duration,
            "feature_view" => self.feature_view.clone()
        );
    }
}

/// Start timing an ingest
pub fn time_ingest(feature_view: &str) -> IngestTimer {
    IngestTimer::new(feature_view)
}

/// Count the rows of one ingested batch
pub fn record_ingest(feature_view: &str, received: usize, late: usize, materialized: usize) {
    counter!(
        "featurestream_ingest_rows_total",
        received as u64,
        "feature_view" => feature_view.to_string()
    );
    if late > 0 {
        counter!(
            "featurestream_late_rows_dropped_total",
            late as u64,
            "feature_view" => feature_view.to_string()
        );
    }
    counter!(
        "featurestream_materialized_rows_total",
        materialized as u64,
        "feature_view" => feature_view.to_string()
    );
}

pub fn increment_ingest_errors(feature_view: &str) {
    counter!(
        "featurestream_ingest_errors_total",
        1,
        "feature_view" => feature_view.to_string()
    );
}

// ==================== Serving Metrics ====================

/// Timer for online reads (auto-records on drop)
pub struct ReadTimer {
    start: Instant,
}

impl Default for ReadTimer {
    fn default() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Drop for ReadTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        histogram!("featurestream_online_read_duration_seconds", duration);
    }
}

/// Start timing an online read
pub fn time_online_read() -> ReadTimer {
    ReadTimer::default()
}

// ==================== Registry Metrics ====================

/// Count an apply call by outcome ("changed", "noop", "rejected", "failed")
pub fn record_apply(outcome: &'static str) {
    counter!("featurestream_apply_total", 1, "outcome" => outcome);
}

// ==================== Tracing ====================

/// Installs the global tracing subscriber
///
/// The level comes from `RUST_LOG` (default `info`). `json` selects
/// structured JSON lines with span context, otherwise human-readable output.
/// Fails if a global subscriber is already set.
pub fn init_tracing(json: bool) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_target(true),
            )
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false))
            .try_init()?;
    }

    Ok(())
}

/// Like [`init_tracing`], choosing the format from `LOG_FORMAT` ("json" or "pretty")
pub fn init_tracing_from_env() -> anyhow::Result<()> {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());
    init_tracing(log_format == "json")
}
