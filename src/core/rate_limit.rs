//! 限流：令牌桶与滑动窗口
//!
//! 令牌桶允许突发（最多 burst_size），滑动窗口在任意滚动窗口内设硬上限。
//! 每个限流器实例一把锁；需要等待时先在锁内「预订」额度，再在锁外睡眠，
//! 因此并发等待者会按预订顺序排队，而不会在睡眠期间占住锁。

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Deserialize;

use crate::core::AgentError;

/// 限流策略
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimiterKind {
    #[default]
    TokenBucket,
    SlidingWindow,
}

/// 限流配置：按 秒 / 分 / 时 三档取第一个设置的值
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub requests_per_second: Option<f64>,
    pub requests_per_minute: Option<f64>,
    pub requests_per_hour: Option<f64>,
    /// 令牌桶容量（可突发请求数）
    pub burst_size: u32,
    /// 达到上限时等待（true）还是立即返回 RateLimit 错误（false）
    pub wait_on_limit: bool,
    pub strategy: LimiterKind,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: None,
            requests_per_minute: None,
            requests_per_hour: None,
            burst_size: 1,
            wait_on_limit: true,
            strategy: LimiterKind::TokenBucket,
        }
    }
}

impl RateLimitConfig {
    pub fn per_second(rate: f64) -> Self {
        Self {
            requests_per_second: Some(rate),
            ..Self::default()
        }
    }

    pub fn per_minute(rate: f64) -> Self {
        Self {
            requests_per_minute: Some(rate),
            ..Self::default()
        }
    }

    pub fn per_hour(rate: f64) -> Self {
        Self {
            requests_per_hour: Some(rate),
            ..Self::default()
        }
    }

    pub fn with_burst(mut self, burst_size: u32) -> Self {
        self.burst_size = burst_size;
        self
    }

    pub fn with_wait(mut self, wait_on_limit: bool) -> Self {
        self.wait_on_limit = wait_on_limit;
        self
    }

    pub fn with_strategy(mut self, strategy: LimiterKind) -> Self {
        self.strategy = strategy;
        self
    }

    /// (速率, 周期, 限流类型名)
    fn resolve(&self) -> Result<(f64, Duration, &'static str), AgentError> {
        let (rate, period, kind) = if let Some(r) = self.requests_per_second {
            (r, Duration::from_secs(1), "requests_per_second")
        } else if let Some(r) = self.requests_per_minute {
            (r, Duration::from_secs(60), "requests_per_minute")
        } else if let Some(r) = self.requests_per_hour {
            (r, Duration::from_secs(3600), "requests_per_hour")
        } else {
            return Err(AgentError::configuration(
                "At least one rate limit must be specified",
                Some("rate_limit"),
            ));
        };
        if !(rate.is_finite() && rate > 0.0) {
            return Err(AgentError::configuration(
                format!("Rate limit must be positive, got {rate}"),
                Some(kind),
            ));
        }
        Ok((rate, period, kind))
    }
}

struct Bucket {
    /// 可为负：表示已被等待者预订的额度
    tokens: f64,
    last_update: Instant,
}

/// 极小速率下等待秒数可能超出 Duration 范围，此时取 Duration::MAX
fn wait_duration(wait_secs: f64) -> Duration {
    Duration::try_from_secs_f64(wait_secs).unwrap_or(Duration::MAX)
}

/// 令牌桶限流器
pub struct RateLimiter {
    config: RateLimitConfig,
    tokens_per_sec: f64,
    max_tokens: f64,
    limit_type: &'static str,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Result<Self, AgentError> {
        let (rate, period, limit_type) = config.resolve()?;
        let max_tokens = f64::from(config.burst_size.max(1));
        Ok(Self {
            tokens_per_sec: rate / period.as_secs_f64(),
            max_tokens,
            limit_type,
            bucket: Mutex::new(Bucket {
                tokens: max_tokens,
                last_update: Instant::now(),
            }),
            config,
        })
    }

    pub fn limit_type(&self) -> &'static str {
        self.limit_type
    }

    /// 当前可用令牌（补充后）；负值表示有等待者排队
    pub fn available_tokens(&self) -> f64 {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket);
        bucket.tokens
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.last_update).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.tokens_per_sec).min(self.max_tokens);
        bucket.last_update = now;
    }

    /// 在锁内扣除或预订令牌，返回调用方需要睡眠的时长
    fn reserve(&self, tokens: u32, wait: bool) -> Result<Duration, AgentError> {
        let needed = f64::from(tokens);
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket);

        if bucket.tokens >= needed {
            bucket.tokens -= needed;
            return Ok(Duration::ZERO);
        }

        let wait_secs = (needed - bucket.tokens) / self.tokens_per_sec;
        if !wait {
            return Err(AgentError::rate_limit(
                "Rate limit exceeded",
                wait_duration(wait_secs),
                Some(self.limit_type),
            ));
        }
        // 等待结束时余额恰好回到 0
        bucket.tokens -= needed;
        Ok(wait_duration(wait_secs))
    }

    /// 不等待：令牌不足直接返回带 retry_after 的 RateLimit 错误
    pub fn try_acquire(&self, tokens: u32) -> Result<(), AgentError> {
        self.reserve(tokens, false).map(|_| ())
    }

    /// 阻塞当前线程直到令牌可用（wait_on_limit=false 时快速失败）
    pub fn acquire(&self, tokens: u32) -> Result<(), AgentError> {
        let wait = self.reserve(tokens, self.config.wait_on_limit)?;
        if !wait.is_zero() {
            tracing::warn!(wait_secs = wait.as_secs_f64(), "Rate limit reached, waiting");
            std::thread::sleep(wait);
        }
        Ok(())
    }

    pub async fn acquire_async(&self, tokens: u32) -> Result<(), AgentError> {
        let wait = self.reserve(tokens, self.config.wait_on_limit)?;
        if !wait.is_zero() {
            tracing::warn!(wait_secs = wait.as_secs_f64(), "Rate limit reached, waiting");
            tokio::time::sleep(wait).await;
        }
        Ok(())
    }
}

/// 滑动窗口限流器：任意 window 时长内最多 max_requests 次
pub struct SlidingWindowRateLimiter {
    config: RateLimitConfig,
    window: Duration,
    max_requests: usize,
    /// 按时间有序；等待者预订的未来时间点也在其中
    requests: Mutex<VecDeque<Instant>>,
}

impl SlidingWindowRateLimiter {
    pub fn new(config: RateLimitConfig) -> Result<Self, AgentError> {
        let (rate, window, kind) = config.resolve()?;
        let max_requests = rate.floor() as usize;
        if max_requests == 0 {
            return Err(AgentError::configuration(
                format!("Sliding window needs at least one request per window, got {rate}"),
                Some(kind),
            ));
        }
        Ok(Self {
            config,
            window,
            max_requests,
            requests: Mutex::new(VecDeque::new()),
        })
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// 窗口内（含已预订）的请求数
    pub fn in_flight(&self) -> usize {
        let mut requests = self.requests.lock();
        self.purge(&mut requests, Instant::now());
        requests.len()
    }

    fn purge(&self, requests: &mut VecDeque<Instant>, now: Instant) {
        while let Some(front) = requests.front() {
            if now.saturating_duration_since(*front) > self.window {
                requests.pop_front();
            } else {
                break;
            }
        }
    }

    fn insert_sorted(requests: &mut VecDeque<Instant>, at: Instant) {
        let idx = requests.partition_point(|t| *t <= at);
        requests.insert(idx, at);
    }

    fn reserve(&self, wait: bool) -> Result<Duration, AgentError> {
        let now = Instant::now();
        let mut requests = self.requests.lock();
        self.purge(&mut requests, now);

        if requests.len() < self.max_requests {
            Self::insert_sorted(&mut requests, now);
            return Ok(Duration::ZERO);
        }

        // 需要等到第 (len - max) 个请求滑出窗口
        let blocker = requests[requests.len() - self.max_requests];
        let free_at = blocker + self.window;
        let wait_for = free_at.saturating_duration_since(now);
        if !wait {
            return Err(AgentError::rate_limit(
                format!(
                    "Rate limit of {} requests per {}s exceeded",
                    self.max_requests,
                    self.window.as_secs_f64()
                ),
                wait_for,
                Some("sliding_window"),
            ));
        }
        Self::insert_sorted(&mut requests, free_at);
        Ok(wait_for)
    }

    pub fn try_acquire(&self) -> Result<(), AgentError> {
        self.reserve(false).map(|_| ())
    }

    pub fn acquire(&self) -> Result<(), AgentError> {
        let wait = self.reserve(self.config.wait_on_limit)?;
        if !wait.is_zero() {
            tracing::warn!(wait_secs = wait.as_secs_f64(), "Rate limit reached, waiting");
            std::thread::sleep(wait);
        }
        Ok(())
    }

    pub async fn acquire_async(&self) -> Result<(), AgentError> {
        let wait = self.reserve(self.config.wait_on_limit)?;
        if !wait.is_zero() {
            tracing::warn!(wait_secs = wait.as_secs_f64(), "Rate limit reached, waiting");
            tokio::time::sleep(wait).await;
        }
        Ok(())
    }
}

/// 两种策略的统一入口，供工具管线使用
pub enum Limiter {
    TokenBucket(RateLimiter),
    SlidingWindow(SlidingWindowRateLimiter),
}

impl Limiter {
    pub fn from_config(config: RateLimitConfig) -> Result<Self, AgentError> {
        match config.strategy {
            LimiterKind::TokenBucket => Ok(Self::TokenBucket(RateLimiter::new(config)?)),
            LimiterKind::SlidingWindow => {
                Ok(Self::SlidingWindow(SlidingWindowRateLimiter::new(config)?))
            }
        }
    }

    pub fn kind(&self) -> LimiterKind {
        match self {
            Self::TokenBucket(_) => LimiterKind::TokenBucket,
            Self::SlidingWindow(_) => LimiterKind::SlidingWindow,
        }
    }

    pub fn acquire(&self) -> Result<(), AgentError> {
        match self {
            Self::TokenBucket(l) => l.acquire(1),
            Self::SlidingWindow(l) => l.acquire(),
        }
    }

    pub async fn acquire_async(&self) -> Result<(), AgentError> {
        match self {
            Self::TokenBucket(l) => l.acquire_async(1).await,
            Self::SlidingWindow(l) => l.acquire_async().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ErrorCategory;

    #[test]
    fn test_requires_some_rate() {
        let err = RateLimiter::new(RateLimitConfig::default()).err().unwrap();
        assert_eq!(err.category, ErrorCategory::Configuration);
        assert!(SlidingWindowRateLimiter::new(RateLimitConfig::per_second(0.5)).is_err());
    }

    #[test]
    fn test_token_bucket_burst_then_fail_fast() {
        let limiter =
            RateLimiter::new(RateLimitConfig::per_second(2.0).with_burst(2).with_wait(false)).unwrap();
        assert!(limiter.acquire(1).is_ok());
        assert!(limiter.acquire(1).is_ok());
        let err = limiter.acquire(1).unwrap_err();
        assert_eq!(err.category, ErrorCategory::RateLimit);
        let retry_after = err.retry_after.unwrap();
        assert!(retry_after > Duration::ZERO);
        assert!(retry_after <= Duration::from_millis(500));
        assert_eq!(err.context["limit_type"], "requests_per_second");
    }

    #[test]
    fn test_tiny_rate_reports_saturated_retry_after() {
        let limiter =
            RateLimiter::new(RateLimitConfig::per_hour(1e-300).with_wait(false)).unwrap();
        assert!(limiter.try_acquire(1).is_ok());
        let err = limiter.try_acquire(1).unwrap_err();
        assert_eq!(err.retry_after, Some(Duration::MAX));
    }

    #[test]
    fn test_token_bucket_refills_over_time() {
        let limiter =
            RateLimiter::new(RateLimitConfig::per_second(20.0).with_burst(1).with_wait(false)).unwrap();
        limiter.acquire(1).unwrap();
        assert!(limiter.try_acquire(1).is_err());
        std::thread::sleep(Duration::from_millis(80));
        assert!(limiter.try_acquire(1).is_ok());
    }

    #[test]
    fn test_token_bucket_never_exceeds_burst() {
        let limiter = RateLimiter::new(RateLimitConfig::per_second(1000.0).with_burst(3)).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert!(limiter.available_tokens() <= 3.0);
    }

    #[test]
    fn test_token_bucket_waits_when_configured() {
        let limiter = RateLimiter::new(RateLimitConfig::per_second(10.0).with_burst(1)).unwrap();
        limiter.acquire(1).unwrap();
        let start = Instant::now();
        limiter.acquire(1).unwrap();
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(80), "waited {waited:?}");
        // 等待消耗掉了补充的令牌
        assert!(limiter.available_tokens() < 1.0);
    }

    #[test]
    fn test_sliding_window_hard_ceiling() {
        let limiter = SlidingWindowRateLimiter::new(
            RateLimitConfig::per_second(3.0).with_wait(false).with_strategy(LimiterKind::SlidingWindow),
        )
        .unwrap();
        for _ in 0..3 {
            limiter.acquire().unwrap();
        }
        let err = limiter.acquire().unwrap_err();
        assert_eq!(err.category, ErrorCategory::RateLimit);
        assert!(err.retry_after.unwrap() <= Duration::from_secs(1));
        assert_eq!(limiter.in_flight(), 3);
    }

    #[tokio::test]
    async fn test_sliding_window_waits_for_oldest() {
        let config = RateLimitConfig::per_second(2.0).with_strategy(LimiterKind::SlidingWindow);
        let limiter = Limiter::from_config(config).unwrap();
        assert_eq!(limiter.kind(), LimiterKind::SlidingWindow);
        limiter.acquire_async().await.unwrap();
        limiter.acquire_async().await.unwrap();
        let start = Instant::now();
        limiter.acquire_async().await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(900));
    }

    #[tokio::test]
    async fn test_token_bucket_async_fail_fast() {
        let limiter =
            Limiter::from_config(RateLimitConfig::per_minute(1.0).with_wait(false)).unwrap();
        limiter.acquire_async().await.unwrap();
        let err = limiter.acquire_async().await.unwrap_err();
        assert!(err.retry_after.unwrap() > Duration::from_secs(50));
    }
}
