/*!
Observability infrastructure for the KVS core.

This module provides:
- Structured logging setup (`tracing` + `tracing-subscriber`)
- Prometheus metrics for flushes, restores and evictions (`metrics` feature)
*/

#[cfg(feature = "metrics")]
use prometheus::{Counter, Encoder, Histogram, HistogramOpts, Registry, TextEncoder};
#[cfg(feature = "metrics")]
use std::sync::OnceLock;
use std::time::Duration;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Registry as TracingRegistry};

use crate::{KvsError, Result};

/// Filter used when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "kvs=info";

#[cfg(feature = "metrics")]
static METRICS: OnceLock<Option<KvsMetrics>> = OnceLock::new();

/// Metrics collection for store operations
#[cfg(feature = "metrics")]
#[derive(Debug)]
pub struct KvsMetrics {
    pub flushes_total: Counter,
    pub flush_errors_total: Counter,
    pub restores_total: Counter,
    pub restore_errors_total: Counter,
    pub evictions_total: Counter,
    pub flush_latency_seconds: Histogram,
    pub state_size_bytes: Histogram,

    registry: Registry,
}

#[cfg(feature = "metrics")]
fn metric_error(e: prometheus::Error) -> KvsError {
    KvsError::validation(format!("metrics setup failed: {e}"))
}

#[cfg(feature = "metrics")]
impl KvsMetrics {
    fn new() -> Result<Self> {
        let registry = Registry::new();

        let flushes_total =
            Counter::new("kvs_flushes_total", "Total flushes").map_err(metric_error)?;
        let flush_errors_total =
            Counter::new("kvs_flush_errors_total", "Total failed flushes").map_err(metric_error)?;
        let restores_total =
            Counter::new("kvs_restores_total", "Total snapshot restores").map_err(metric_error)?;
        let restore_errors_total = Counter::new(
            "kvs_restore_errors_total",
            "Total rejected or failed snapshot restores",
        )
        .map_err(metric_error)?;
        let evictions_total = Counter::new(
            "kvs_evictions_total",
            "Total snapshots evicted by rotation",
        )
        .map_err(metric_error)?;
        let flush_latency_seconds = Histogram::with_opts(HistogramOpts::new(
            "kvs_flush_latency_seconds",
            "Duration of flushes in seconds",
        ))
        .map_err(metric_error)?;
        let state_size_bytes = Histogram::with_opts(HistogramOpts::new(
            "kvs_state_size_bytes",
            "Size of the serialized store in bytes",
        ))
        .map_err(metric_error)?;

        registry
            .register(Box::new(flushes_total.clone()))
            .map_err(metric_error)?;
        registry
            .register(Box::new(flush_errors_total.clone()))
            .map_err(metric_error)?;
        registry
            .register(Box::new(restores_total.clone()))
            .map_err(metric_error)?;
        registry
            .register(Box::new(restore_errors_total.clone()))
            .map_err(metric_error)?;
        registry
            .register(Box::new(evictions_total.clone()))
            .map_err(metric_error)?;
        registry
            .register(Box::new(flush_latency_seconds.clone()))
            .map_err(metric_error)?;
        registry
            .register(Box::new(state_size_bytes.clone()))
            .map_err(metric_error)?;

        Ok(Self {
            flushes_total,
            flush_errors_total,
            restores_total,
            restore_errors_total,
            evictions_total,
            flush_latency_seconds,
            state_size_bytes,
            registry,
        })
    }

    /// Global metrics instance; `None` if the registry could not be built
    pub fn global() -> Option<&'static KvsMetrics> {
        METRICS
            .get_or_init(|| match Self::new() {
                Ok(metrics) => Some(metrics),
                Err(e) => {
                    tracing::error!(error = %e, "failed to initialize KVS metrics");
                    None
                }
            })
            .as_ref()
    }

    /// Gather metrics in Prometheus text format
    pub fn gather_metrics(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metric_error)?;
        String::from_utf8(buffer)
            .map_err(|e| KvsError::validation(format!("metrics are not UTF-8: {e}")))
    }
}

/// Record a finished flush.
#[cfg(feature = "metrics")]
pub(crate) fn record_flush(ok: bool, bytes: usize, evicted: usize, elapsed: Duration) {
    if let Some(metrics) = KvsMetrics::global() {
        metrics.flushes_total.inc();
        if !ok {
            metrics.flush_errors_total.inc();
        }
        metrics.evictions_total.inc_by(evicted as f64);
        metrics.flush_latency_seconds.observe(elapsed.as_secs_f64());
        metrics.state_size_bytes.observe(bytes as f64);
    }
}

#[cfg(not(feature = "metrics"))]
pub(crate) fn record_flush(_ok: bool, _bytes: usize, _evicted: usize, _elapsed: Duration) {}

/// Record a restore attempt.
#[cfg(feature = "metrics")]
pub(crate) fn record_restore(ok: bool) {
    if let Some(metrics) = KvsMetrics::global() {
        metrics.restores_total.inc();
        if !ok {
            metrics.restore_errors_total.inc();
        }
    }
}

#[cfg(not(feature = "metrics"))]
pub(crate) fn record_restore(_ok: bool) {}

/// Initialize the global logging subscriber
///
/// Events go to stderr, filtered by `RUST_LOG` or [`DEFAULT_FILTER`].
///
/// # Arguments
/// * `json` - Emit one JSON object per event instead of plain text
///
/// # Returns
/// Error if a global subscriber is already installed
pub fn init_observability(json: bool) -> Result<()> {
    #[cfg(feature = "metrics")]
    KvsMetrics::global();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let json_layer = json.then(|| {
        fmt::layer()
            .json()
            .with_target(false)
            .with_current_span(false)
            .with_writer(std::io::stderr)
    });
    let text_layer = (!json).then(|| fmt::layer().with_writer(std::io::stderr));

    TracingRegistry::default()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .map_err(|e| KvsError::validation(format!("failed to set tracing subscriber: {e}")))?;

    tracing::debug!("KVS observability initialized");
    Ok(())
}

/// Initialize observability with plain-text output
pub fn init_default_observability() -> Result<()> {
    init_observability(false)
}
