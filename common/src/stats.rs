use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, Distribution, Max, Min, OrderStatistics, Statistics as StatrsStats};
use std::fmt;

/// Per-scenario request latency summary, in milliseconds.
///
/// Only successful requests contribute samples; an empty scenario reports
/// all zeros.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
    pub p999: f64,
    pub min: f64,
    pub max: f64,
    pub stddev: f64,
}

impl Statistics {
    pub fn from_samples(latencies_ms: &[f64]) -> Self {
        if latencies_ms.is_empty() {
            return Self::default();
        }

        let mut data = Data::new(latencies_ms.to_vec());

        Self {
            count: latencies_ms.len(),
            mean: data.mean().unwrap_or(0.0),
            median: data.median(),
            p90: data.quantile(0.90),
            p95: data.quantile(0.95),
            p99: data.quantile(0.99),
            p999: data.quantile(0.999),
            min: data.min(),
            max: data.max(),
            // statrs leaves the sample deviation undefined for one sample
            stddev: data.std_dev().filter(|s| s.is_finite()).unwrap_or(0.0),
        }
    }
}

impl fmt::Display for Statistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "n={} mean={:.2}ms p50={:.2}ms p95={:.2}ms p99={:.2}ms max={:.2}ms",
            self.count, self.mean, self.median, self.p95, self.p99, self.max
        )
    }
}
