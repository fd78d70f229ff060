//! Process metrics.
//!
//! The orchestrator only sees `MetricsSink::record_metric`, which is
//! fire-and-forget: it returns nothing, and a sink that cannot record a value
//! logs and drops it. The default sink keeps Prometheus counters and
//! histograms exported at `GET /metrics`.

use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use tracing::warn;

pub const VERIFICATION_SUCCESS: &str = "VerificationSuccess";
pub const VERIFICATION_ERROR: &str = "VerificationError";
pub const VERIFICATION_DURATION: &str = "VerificationDuration";
pub const VERIFICATION_SIMULATED: &str = "VerificationSimulated";
pub const ALREADY_VERIFIED: &str = "AlreadyVerified";
pub const BATCH_VERIFIED: &str = "BatchVerified";
pub const GAS_USED: &str = "GasUsed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricUnit {
    Count,
    Milliseconds,
}

pub trait MetricsSink: Send + Sync {
    fn record_metric(&self, name: &str, value: f64, unit: MetricUnit);
}

/// Prometheus-backed sink. `Count` metrics accumulate into
/// `verifier_events_total{metric=..}`, `Milliseconds` metrics are observed
/// by `verifier_duration_milliseconds{metric=..}`.
#[derive(Clone)]
pub struct PrometheusMetrics {
    registry: Registry,
    events: CounterVec,
    durations: HistogramVec,
}

impl PrometheusMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("verifier".to_string()), None)?;

        let events = CounterVec::new(
            Opts::new("events_total", "Verification events by metric name"),
            &["metric"],
        )?;
        registry.register(Box::new(events.clone()))?;

        let durations = HistogramVec::new(
            HistogramOpts::new(
                "duration_milliseconds",
                "Verification latencies in milliseconds by metric name",
            )
            .buckets(vec![
                50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10_000.0, 30_000.0, 60_000.0,
                120_000.0,
            ]),
            &["metric"],
        )?;
        registry.register(Box::new(durations.clone()))?;

        Ok(Self {
            registry,
            events,
            durations,
        })
    }

    /// Encodes every registered metric in the Prometheus text format.
    pub fn gather_text(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            warn!("Failed to encode Prometheus metrics: {e}");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl MetricsSink for PrometheusMetrics {
    fn record_metric(&self, name: &str, value: f64, unit: MetricUnit) {
        if !value.is_finite() || value < 0.0 {
            warn!("Dropping metric {name}: invalid value {value}");
            return;
        }

        let recorded = match unit {
            MetricUnit::Count => self
                .events
                .get_metric_with_label_values(&[name])
                .map(|counter| counter.inc_by(value)),
            MetricUnit::Milliseconds => self
                .durations
                .get_metric_with_label_values(&[name])
                .map(|histogram| histogram.observe(value)),
        };

        if let Err(e) = recorded {
            warn!("Dropping metric {name}: {e}");
        }
    }
}
