/// Prometheus metrics for the issuance pipeline
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Metrics registry wrapper
pub struct MetricsRegistry {
    registry: Registry,
    /// Orders created, labeled by outcome
    pub new_orders: IntCounterVec,
    /// Challenge validations performed, labeled by type and outcome
    pub validations: IntCounterVec,
    /// Certificates issued, labeled by key type
    pub issuances: IntCounterVec,
    /// Revocations, labeled by entry point
    pub revocations: IntCounterVec,
    /// Seconds spent collecting SCTs per finalize
    pub sct_latency: Histogram,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        let registry = Registry::new();
        let new_orders = IntCounterVec::new(
            Opts::new("acmeca_new_orders_total", "Orders created"),
            &["result"],
        )
        .expect("metric definition");
        let validations = IntCounterVec::new(
            Opts::new("acmeca_validations_total", "Challenge validations"),
            &["type", "result"],
        )
        .expect("metric definition");
        let issuances = IntCounterVec::new(
            Opts::new("acmeca_issuances_total", "Certificates issued"),
            &["key_type"],
        )
        .expect("metric definition");
        let revocations = IntCounterVec::new(
            Opts::new("acmeca_revocations_total", "Certificates revoked"),
            &["method"],
        )
        .expect("metric definition");
        let sct_latency = Histogram::with_opts(HistogramOpts::new(
            "acmeca_sct_latency_seconds",
            "Time to collect two SCTs",
        ))
        .expect("metric definition");

        registry.register(Box::new(new_orders.clone())).unwrap();
        registry.register(Box::new(validations.clone())).unwrap();
        registry.register(Box::new(issuances.clone())).unwrap();
        registry.register(Box::new(revocations.clone())).unwrap();
        registry.register(Box::new(sct_latency.clone())).unwrap();

        Self {
            registry,
            new_orders,
            validations,
            issuances,
            revocations,
            sct_latency,
        }
    }

    /// Render the registry in the Prometheus text format
    pub fn gather_text(&self) -> String {
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&mf, &mut buffer).unwrap();
        String::from_utf8_lossy(&buffer).to_string()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared metrics type
pub type SharedMetrics = Arc<MetricsRegistry>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_render() {
        let metrics = MetricsRegistry::new();
        metrics.new_orders.with_label_values(&["created"]).inc();
        metrics
            .validations
            .with_label_values(&["dns-01", "valid"])
            .inc();
        let text = metrics.gather_text();
        assert!(text.contains("acmeca_new_orders_total"));
        assert!(text.contains("acmeca_validations_total"));
    }
}
