//! 错误聚合：按类别 / 严重度 / agent 计数，保留最近错误，计算每分钟错误率

use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::core::ErrorRecord;

/// 聚合指标快照
#[derive(Clone, Debug, Default, Serialize)]
pub struct ErrorMetrics {
    pub total_errors: u64,
    pub errors_by_category: BTreeMap<String, u64>,
    pub errors_by_severity: BTreeMap<String, u64>,
    pub errors_by_agent: BTreeMap<String, u64>,
    pub recent_errors: Vec<ErrorRecord>,
    pub error_rate_per_minute: f64,
    pub last_error_time: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Inner {
    metrics: ErrorMetrics,
    recent: VecDeque<ErrorRecord>,
    timestamps: VecDeque<Instant>,
}

pub struct ErrorAggregator {
    max_recent_errors: usize,
    rate_window: Duration,
    inner: Mutex<Inner>,
}

impl Default for ErrorAggregator {
    fn default() -> Self {
        Self::new(100, Duration::from_secs(60))
    }
}

impl ErrorAggregator {
    pub fn new(max_recent_errors: usize, rate_window: Duration) -> Self {
        Self {
            max_recent_errors: max_recent_errors.max(1),
            rate_window: rate_window.max(Duration::from_millis(1)),
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn record_error(&self, record: &ErrorRecord) {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        let m = &mut inner.metrics;
        m.total_errors += 1;
        m.last_error_time = Some(Utc::now());
        *m.errors_by_category
            .entry(record.category().to_string())
            .or_default() += 1;
        *m.errors_by_severity
            .entry(record.severity().to_string())
            .or_default() += 1;
        *m.errors_by_agent
            .entry(record.agent_name().to_string())
            .or_default() += 1;

        inner.recent.push_back(record.clone());
        while inner.recent.len() > self.max_recent_errors {
            inner.recent.pop_front();
        }

        inner.timestamps.push_back(now);
        self.refresh_rate(&mut inner, now);
    }

    fn refresh_rate(&self, inner: &mut Inner, now: Instant) {
        self.purge(&mut inner.timestamps, now);
        let in_window = inner.timestamps.len() as f64;
        inner.metrics.error_rate_per_minute = in_window / self.rate_window.as_secs_f64() * 60.0;
    }

    fn purge(&self, timestamps: &mut VecDeque<Instant>, now: Instant) {
        while let Some(front) = timestamps.front() {
            if now.saturating_duration_since(*front) > self.rate_window {
                timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// 读取时按当前时间重新计算错误率，窗口外的错误不再计入
    pub fn metrics(&self) -> ErrorMetrics {
        let mut inner = self.inner.lock();
        self.refresh_rate(&mut inner, Instant::now());
        let mut snapshot = inner.metrics.clone();
        snapshot.recent_errors = inner.recent.iter().cloned().collect();
        snapshot
    }

    pub fn errors_by_category(&self, category: &str) -> Vec<ErrorRecord> {
        self.inner
            .lock()
            .recent
            .iter()
            .filter(|r| r.category() == category)
            .cloned()
            .collect()
    }

    pub fn errors_by_agent(&self, agent_name: &str) -> Vec<ErrorRecord> {
        self.inner
            .lock()
            .recent
            .iter()
            .filter(|r| r.agent_name() == agent_name)
            .cloned()
            .collect()
    }

    pub fn reset(&self) {
        *self.inner.lock() = Inner::default();
    }
}
