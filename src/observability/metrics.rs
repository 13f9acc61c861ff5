//! 性能指标：按操作名统计调用次数、错误数、耗时（min / max / avg / p50 / p95 / p99）

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

/// 单个操作的指标快照
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PerformanceMetrics {
    pub operation_name: String,
    pub call_count: u64,
    pub error_count: u64,
    pub total_duration_ms: f64,
    pub min_duration_ms: Option<f64>,
    pub max_duration_ms: Option<f64>,
    pub avg_duration_ms: f64,
    pub p50_duration_ms: Option<f64>,
    pub p95_duration_ms: Option<f64>,
    pub p99_duration_ms: Option<f64>,
    pub last_called: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Inner {
    metrics: HashMap<String, PerformanceMetrics>,
    samples: HashMap<String, VecDeque<f64>>,
}

/// 指标收集器；每个操作最多保留 max_samples 个耗时样本用于分位数
pub struct MetricsCollector {
    max_samples: usize,
    inner: Mutex<Inner>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl MetricsCollector {
    pub fn new(max_samples: usize) -> Self {
        Self {
            max_samples: max_samples.max(1),
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn record_call(&self, operation: &str, duration: Duration, error: bool) {
        let duration_ms = duration.as_secs_f64() * 1000.0;
        let mut inner = self.inner.lock();

        let samples = inner.samples.entry(operation.to_string()).or_default();
        samples.push_back(duration_ms);
        while samples.len() > self.max_samples {
            samples.pop_front();
        }
        let mut sorted: Vec<f64> = samples.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);

        let m = inner
            .metrics
            .entry(operation.to_string())
            .or_insert_with(|| PerformanceMetrics {
                operation_name: operation.to_string(),
                ..PerformanceMetrics::default()
            });
        m.call_count += 1;
        if error {
            m.error_count += 1;
        }
        m.total_duration_ms += duration_ms;
        m.min_duration_ms = Some(m.min_duration_ms.map_or(duration_ms, |v| v.min(duration_ms)));
        m.max_duration_ms = Some(m.max_duration_ms.map_or(duration_ms, |v| v.max(duration_ms)));
        m.avg_duration_ms = m.total_duration_ms / m.call_count as f64;
        m.p50_duration_ms = Some(percentile(&sorted, 50.0));
        m.p95_duration_ms = Some(percentile(&sorted, 95.0));
        m.p99_duration_ms = Some(percentile(&sorted, 99.0));
        m.last_called = Some(Utc::now());
    }

    pub fn get(&self, operation: &str) -> Option<PerformanceMetrics> {
        self.inner.lock().metrics.get(operation).cloned()
    }

    pub fn all(&self) -> BTreeMap<String, PerformanceMetrics> {
        self.inner
            .lock()
            .metrics
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.metrics.clear();
        inner.samples.clear();
    }
}

/// 最近秩分位：下标 floor(len * p / 100)，截断到末尾
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = (sorted.len() as f64 * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_and_extremes() {
        let m = MetricsCollector::default();
        m.record_call("op", Duration::from_millis(10), false);
        m.record_call("op", Duration::from_millis(30), true);
        let snap = m.get("op").unwrap();
        assert_eq!(snap.call_count, 2);
        assert_eq!(snap.error_count, 1);
        assert_eq!(snap.min_duration_ms, Some(10.0));
        assert_eq!(snap.max_duration_ms, Some(30.0));
        assert!((snap.avg_duration_ms - 20.0).abs() < 1e-9);
        assert!(snap.last_called.is_some());
        assert!(m.get("other").is_none());
    }

    #[test]
    fn test_percentiles() {
        let m = MetricsCollector::default();
        for ms in 1..=100 {
            m.record_call("op", Duration::from_millis(ms), false);
        }
        let snap = m.get("op").unwrap();
        assert_eq!(snap.p50_duration_ms, Some(51.0));
        assert_eq!(snap.p95_duration_ms, Some(96.0));
        assert_eq!(snap.p99_duration_ms, Some(100.0));
    }

    #[test]
    fn test_sample_window_is_bounded() {
        let m = MetricsCollector::new(3);
        for ms in [100, 1, 2, 3] {
            m.record_call("op", Duration::from_millis(ms), false);
        }
        let snap = m.get("op").unwrap();
        // 100ms 已滑出样本窗口，但仍计入 max
        assert_eq!(snap.p99_duration_ms, Some(3.0));
        assert_eq!(snap.max_duration_ms, Some(100.0));
        assert_eq!(snap.call_count, 4);
    }
}
