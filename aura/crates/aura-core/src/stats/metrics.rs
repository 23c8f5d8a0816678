//! Metrics Export
//!
//! Ordered metric sets for monitoring systems (Prometheus text format and
//! JSON).

use indexmap::IndexMap;
use serde::Serialize;

/// Ordered set of named metric values
#[derive(Debug, Clone, Default, Serialize)]
pub struct VmMetrics {
    metrics: IndexMap<String, MetricValue>,
}

impl VmMetrics {
    pub fn new() -> Self {
        Self {
            metrics: IndexMap::new(),
        }
    }

    /// Add metric
    pub fn add(&mut self, name: impl Into<String>, value: MetricValue) {
        self.metrics.insert(name.into(), value);
    }

    /// Get metric
    pub fn get(&self, name: &str) -> Option<MetricValue> {
        self.metrics.get(name).copied()
    }

    /// Number of metrics
    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    /// Check if no metrics were added
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Export to Prometheus text format
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();

        for (name, value) in self.metrics.iter() {
            output.push_str(&format!("# TYPE {} {}\n", name, value.kind()));
            output.push_str(&format!("{} {}\n", name, value.as_f64()));
        }

        output
    }

    /// Export to JSON
    pub fn to_json(&self) -> String {
        let values: IndexMap<&str, f64> = self
            .metrics
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_f64()))
            .collect();
        serde_json::to_string(&values).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Metric value
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum MetricValue {
    Counter(u64),
    Gauge(f64),
}

impl MetricValue {
    pub fn as_f64(&self) -> f64 {
        match self {
            MetricValue::Counter(v) => *v as f64,
            MetricValue::Gauge(v) => *v,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            MetricValue::Counter(_) => "counter",
            MetricValue::Gauge(_) => "gauge",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prometheus_export_keeps_order() {
        let mut metrics = VmMetrics::new();
        metrics.add("aura_b_total", MetricValue::Counter(2));
        metrics.add("aura_a", MetricValue::Gauge(0.5));

        let text = metrics.to_prometheus();
        let b = text.find("aura_b_total 2").unwrap();
        let a = text.find("aura_a 0.5").unwrap();
        assert!(b < a);
        assert!(text.contains("# TYPE aura_b_total counter"));
    }

    #[test]
    fn test_json_export() {
        let mut metrics = VmMetrics::new();
        metrics.add("aura_throws_total", MetricValue::Counter(3));
        assert_eq!(metrics.to_json(), r#"{"aura_throws_total":3.0}"#);
    }

    #[test]
    fn test_serialize_keeps_kinds() {
        let mut metrics = VmMetrics::new();
        metrics.add("aura_b_total", MetricValue::Counter(2));
        metrics.add("aura_a", MetricValue::Gauge(0.5));

        let json = serde_json::to_string(&metrics).unwrap();
        assert_eq!(
            json,
            r#"{"metrics":{"aura_b_total":{"Counter":2},"aura_a":{"Gauge":0.5}}}"#
        );
    }
}
