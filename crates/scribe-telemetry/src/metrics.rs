//! Prometheus-backed metrics registry and snapshot helpers.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - Exposes only the counters/gauges the file engine reports.

use std::sync::Arc;

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;

use crate::error::{TelemetryError, TelemetryResult};

/// Prometheus-backed metrics registry shared by the engine and its host.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    file_operations_total: IntCounterVec,
    file_bytes_total: IntCounterVec,
    file_operations_active: IntGauge,
    encoding_fallbacks_total: IntCounter,
}

/// Snapshot of selected gauges and counters for health reporting.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Operations currently registered as active.
    pub active_operations: i64,
    /// Loads that fell back to the legacy encoding.
    pub encoding_fallbacks_total: u64,
}

impl Metrics {
    /// Construct a new metrics registry with the standard collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be built or
    /// registered.
    pub fn new() -> TelemetryResult<Self> {
        let registry = Registry::new();

        let file_operations_total = IntCounterVec::new(
            Opts::new(
                "file_operations_total",
                "File engine operations by kind and outcome",
            ),
            &["kind", "outcome"],
        )
        .map_err(|source| collector("file_operations_total", source))?;
        let file_bytes_total = IntCounterVec::new(
            Opts::new("file_bytes_total", "Bytes read or written by operation kind"),
            &["kind"],
        )
        .map_err(|source| collector("file_bytes_total", source))?;
        let file_operations_active = IntGauge::with_opts(Opts::new(
            "file_operations_active",
            "Operations currently registered with the engine",
        ))
        .map_err(|source| collector("file_operations_active", source))?;
        let encoding_fallbacks_total = IntCounter::with_opts(Opts::new(
            "file_encoding_fallbacks_total",
            "Loads decoded with the legacy fallback encoding",
        ))
        .map_err(|source| collector("file_encoding_fallbacks_total", source))?;

        register(&registry, "file_operations_total", &file_operations_total)?;
        register(&registry, "file_bytes_total", &file_bytes_total)?;
        register(&registry, "file_operations_active", &file_operations_active)?;
        register(
            &registry,
            "file_encoding_fallbacks_total",
            &encoding_fallbacks_total,
        )?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                file_operations_total,
                file_bytes_total,
                file_operations_active,
                encoding_fallbacks_total,
            }),
        })
    }

    /// Count one finished operation of `kind` with the given `outcome` label.
    pub fn inc_operation(&self, kind: &str, outcome: &str) {
        self.inner
            .file_operations_total
            .with_label_values(&[kind, outcome])
            .inc();
    }

    /// Add `bytes` to the byte counter for `kind`.
    pub fn add_bytes(&self, kind: &str, bytes: u64) {
        self.inner
            .file_bytes_total
            .with_label_values(&[kind])
            .inc_by(bytes);
    }

    /// Set the active operation gauge.
    pub fn set_active_operations(&self, count: usize) {
        self.inner
            .file_operations_active
            .set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    /// Count a load that used the legacy fallback encoding.
    pub fn inc_encoding_fallback(&self) {
        self.inner.encoding_fallbacks_total.inc();
    }

    /// Current value of the operation counter for `kind`/`outcome`.
    #[must_use]
    pub fn operation_count(&self, kind: &str, outcome: &str) -> u64 {
        self.inner
            .file_operations_total
            .with_label_values(&[kind, outcome])
            .get()
    }

    /// Render the metrics registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics cannot be encoded or if the encoded
    /// buffer is not valid UTF-8.
    pub fn render(&self) -> TelemetryResult<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|source| TelemetryError::MetricsEncode { source })?;
        String::from_utf8(buffer).map_err(|source| TelemetryError::MetricsUtf8 { source })
    }

    /// Take a point-in-time snapshot of the gauges and counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            active_operations: self.inner.file_operations_active.get(),
            encoding_fallbacks_total: self.inner.encoding_fallbacks_total.get(),
        }
    }
}

const fn collector(name: &'static str, source: prometheus::Error) -> TelemetryError {
    TelemetryError::MetricsCollector { name, source }
}

fn register<C>(registry: &Registry, name: &'static str, collector: &C) -> TelemetryResult<()>
where
    C: prometheus::core::Collector + Clone + 'static,
{
    registry
        .register(Box::new(collector.clone()))
        .map_err(|source| TelemetryError::MetricsRegister { name, source })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_snapshot_reflects_updates() -> TelemetryResult<()> {
        let metrics = Metrics::new()?;
        metrics.inc_operation("save", "completed");
        metrics.inc_operation("save", "completed");
        metrics.inc_operation("stream", "canceled");
        metrics.add_bytes("save", 4_096);
        metrics.set_active_operations(3);
        metrics.inc_encoding_fallback();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.active_operations, 3);
        assert_eq!(snapshot.encoding_fallbacks_total, 1);
        assert_eq!(metrics.operation_count("save", "completed"), 2);
        assert_eq!(metrics.operation_count("stream", "canceled"), 1);

        let rendered = metrics.render()?;
        assert!(rendered.contains("file_operations_total"));
        assert!(rendered.contains("file_bytes_total"));
        assert!(rendered.contains("file_encoding_fallbacks_total"));
        Ok(())
    }

    #[test]
    fn registries_are_independent() -> TelemetryResult<()> {
        let first = Metrics::new()?;
        let second = Metrics::new()?;
        first.inc_encoding_fallback();
        assert_eq!(second.snapshot().encoding_fallbacks_total, 0);
        Ok(())
    }
}
