use anyhow::Result;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

pub struct MetricsService {
    registry: Registry,
    conversions_total: IntCounterVec,
    quota_checks_total: IntCounterVec,
    usage_increments_total: IntCounter,
    mirror_sync_failures_total: IntCounter,
}

impl MetricsService {
    pub fn new() -> Self {
        let registry = Registry::new();

        let conversions_total = IntCounterVec::new(
            Opts::new("conversions_total", "Conversion requests by outcome"),
            &["status"],
        )
        .unwrap();
        let quota_checks_total = IntCounterVec::new(
            Opts::new("quota_checks_total", "Quota checks by outcome"),
            &["outcome"],
        )
        .unwrap();
        let usage_increments_total = IntCounter::new(
            "usage_increments_total",
            "Committed usage increments",
        )
        .unwrap();
        let mirror_sync_failures_total = IntCounter::new(
            "mirror_sync_failures_total",
            "Failed mirror replication attempts",
        )
        .unwrap();

        registry.register(Box::new(conversions_total.clone())).unwrap();
        registry.register(Box::new(quota_checks_total.clone())).unwrap();
        registry.register(Box::new(usage_increments_total.clone())).unwrap();
        registry
            .register(Box::new(mirror_sync_failures_total.clone()))
            .unwrap();

        Self {
            registry,
            conversions_total,
            quota_checks_total,
            usage_increments_total,
            mirror_sync_failures_total,
        }
    }

    pub fn record_conversion(&self, status: &str) {
        self.conversions_total.with_label_values(&[status]).inc();
    }

    pub fn record_quota_check(&self, outcome: &str) {
        self.quota_checks_total.with_label_values(&[outcome]).inc();
    }

    pub fn record_usage_increment(&self) {
        self.usage_increments_total.inc();
    }

    pub fn record_mirror_sync_failure(&self) {
        self.mirror_sync_failures_total.inc();
    }

    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

impl Default for MetricsService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rendered_output_contains_registered_counters() {
        let metrics = MetricsService::new();
        metrics.record_conversion("success");
        metrics.record_quota_check("allowed");
        metrics.record_usage_increment();

        let output = metrics.render().unwrap();
        assert!(output.contains("conversions_total"));
        assert!(output.contains("quota_checks_total"));
        assert!(output.contains("usage_increments_total"));
    }
}
