//! 错误恢复：指数退避重试、熔断器、兜底函数
//!
//! ErrorRecoveryHandler 按操作名维护连续失败计数；达到阈值后熔断一段时间，
//! 期间直接走兜底而不调用原操作。所有经手的错误追加到只增不改的审计历史。

use std::collections::HashMap;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::Rng;
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::core::{AgentError, ErrorCategory};

/// 重试配置（不可变值）
#[derive(Clone, Debug, PartialEq)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            exponential_base: 2.0,
            jitter: true,
        }
    }
}

/// 第 attempt 次（从 0 计）失败后的等待：min(initial * base^attempt, max)，抖动时乘以 [0.5, 1.0]
pub fn calculate_backoff_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let exp = config.exponential_base.powi(attempt.min(i32::MAX as u32) as i32);
    let raw = config.initial_delay.as_secs_f64() * exp;
    let mut secs = if raw.is_finite() {
        raw.min(config.max_delay.as_secs_f64())
    } else {
        config.max_delay.as_secs_f64()
    };
    if config.jitter {
        secs *= rand::thread_rng().gen_range(0.5..=1.0);
    }
    Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(config.max_delay)
}

/// 带指数退避的重试；不可恢复的错误立即返回，不再重试
pub async fn retry_with_backoff<T, F, Fut>(
    config: &RetryConfig,
    operation: &str,
    mut on_retry: impl FnMut(u32, &AgentError),
    mut f: F,
) -> Result<T, AgentError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AgentError>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) if !err.recoverable => return Err(err),
            Err(err) if attempt + 1 < max_attempts => {
                let delay = calculate_backoff_delay(attempt, config);
                tracing::warn!(
                    operation = %operation,
                    attempt = attempt + 1,
                    max_attempts,
                    delay_secs = delay.as_secs_f64(),
                    error = %err,
                    "attempt failed, retrying"
                );
                on_retry(attempt, &err);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                tracing::error!(operation = %operation, max_attempts, "all attempts failed");
                return Err(err);
            }
        }
    }
}

/// 恢复策略
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    Retry,
    Fallback,
    Skip,
    Escalate,
    CircuitBreaker,
}

impl RecoveryStrategy {
    /// 按错误类别给出默认策略
    pub fn suggest(err: &AgentError) -> Self {
        if !err.recoverable {
            return Self::Escalate;
        }
        match err.category {
            ErrorCategory::ToolExecution
            | ErrorCategory::Timeout
            | ErrorCategory::Communication => Self::CircuitBreaker,
            ErrorCategory::RateLimit | ErrorCategory::Unknown => Self::Retry,
            ErrorCategory::ModelInference => Self::Fallback,
            ErrorCategory::Resource => Self::Skip,
            ErrorCategory::Validation | ErrorCategory::Configuration => Self::Escalate,
        }
    }
}

/// 错误发生时的上下文
#[derive(Clone, Debug, Serialize)]
pub struct ErrorContext {
    pub error_id: Uuid,
    pub agent_name: Option<String>,
    pub operation: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub request_id: Option<String>,
    pub metadata: Map<String, Value>,
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            error_id: Uuid::new_v4(),
            agent_name: None,
            operation: None,
            timestamp: Utc::now(),
            user_id: None,
            session_id: None,
            request_id: None,
            metadata: Map::new(),
        }
    }

    pub fn for_operation(operation: impl Into<String>) -> Self {
        Self::new().with_operation(operation)
    }

    pub fn with_agent(mut self, agent_name: impl Into<String>) -> Self {
        self.agent_name = Some(agent_name.into());
        self
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// 一次错误的审计记录，写入后不再修改
#[derive(Clone, Debug, Serialize)]
pub struct ErrorRecord {
    pub error: Value,
    pub context: ErrorContext,
    pub recovered: bool,
    pub recovery_strategy: RecoveryStrategy,
    pub retry_count: u32,
}

impl ErrorRecord {
    pub fn category(&self) -> &str {
        self.error
            .get("category")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
    }

    pub fn severity(&self) -> &str {
        self.error
            .get("severity")
            .and_then(Value::as_str)
            .unwrap_or("medium")
    }

    pub fn agent_name(&self) -> &str {
        self.error
            .get("agent_name")
            .and_then(Value::as_str)
            .or(self.context.agent_name.as_deref())
            .unwrap_or("unknown")
    }
}

#[derive(Default)]
struct BreakerState {
    failure_counts: HashMap<String, u32>,
    open_until: HashMap<String, Instant>,
}

/// 兜底函数类型
/// 熔断打开期上限
const MAX_OPEN_PERIOD: Duration = Duration::from_secs(365 * 24 * 3600);

pub type Fallback<T> = Box<dyn FnOnce() -> T + Send>;

/// 错误恢复处理器：熔断 + 重试 + 兜底 + 审计历史
pub struct ErrorRecoveryHandler {
    circuit_breaker_threshold: u32,
    circuit_breaker_timeout: Duration,
    retry: RetryConfig,
    breaker: Mutex<BreakerState>,
    history: Mutex<Vec<ErrorRecord>>,
}

impl Default for ErrorRecoveryHandler {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(60))
    }
}

impl ErrorRecoveryHandler {
    pub fn new(circuit_breaker_threshold: u32, circuit_breaker_timeout: Duration) -> Self {
        Self {
            circuit_breaker_threshold: circuit_breaker_threshold.max(1),
            circuit_breaker_timeout,
            retry: RetryConfig::default(),
            breaker: Mutex::new(BreakerState::default()),
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// 熔断是否打开；打开期已过则顺带重置计数
    pub fn is_circuit_open(&self, operation: &str) -> bool {
        let mut breaker = self.breaker.lock();
        match breaker.open_until.get(operation) {
            Some(until) if Instant::now() < *until => true,
            Some(_) => {
                breaker.open_until.remove(operation);
                breaker.failure_counts.insert(operation.to_string(), 0);
                tracing::info!(operation = %operation, "circuit breaker reset");
                false
            }
            None => false,
        }
    }

    pub fn record_failure(&self, operation: &str) {
        let mut breaker = self.breaker.lock();
        let count = breaker
            .failure_counts
            .entry(operation.to_string())
            .or_insert(0);
        *count += 1;
        let count = *count;
        if count >= self.circuit_breaker_threshold {
            let now = Instant::now();
            // 超出 Instant 可表示范围时按最长打开期处理
            let until = now
                .checked_add(self.circuit_breaker_timeout)
                .unwrap_or_else(|| now + MAX_OPEN_PERIOD);
            breaker.open_until.insert(operation.to_string(), until);
            tracing::warn!(operation = %operation, failures = count, "circuit breaker opened");
        }
    }

    pub fn record_success(&self, operation: &str) {
        if let Some(count) = self.breaker.lock().failure_counts.get_mut(operation) {
            *count = 0;
        }
    }

    pub fn failure_count(&self, operation: &str) -> u32 {
        self.breaker
            .lock()
            .failure_counts
            .get(operation)
            .copied()
            .unwrap_or(0)
    }

    /// 记录错误并返回审计记录；CircuitBreaker 策略会计入失败次数
    pub fn handle_error(
        &self,
        error: &AgentError,
        context: ErrorContext,
        strategy: RecoveryStrategy,
    ) -> ErrorRecord {
        let record = ErrorRecord {
            error: error.to_json(),
            context,
            recovered: false,
            recovery_strategy: strategy,
            retry_count: 0,
        };

        tracing::error!(
            agent = record.context.agent_name.as_deref().unwrap_or("unknown"),
            operation = record.context.operation.as_deref().unwrap_or("-"),
            severity = error.severity.as_str(),
            strategy = ?strategy,
            error_id = %record.context.error_id,
            "{}",
            error.message
        );

        self.history.lock().push(record.clone());

        if strategy == RecoveryStrategy::CircuitBreaker {
            if let Some(op) = record.context.operation.as_deref() {
                self.record_failure(op);
            }
        }
        record
    }

    pub fn history(&self) -> Vec<ErrorRecord> {
        self.history.lock().clone()
    }

    /// 尝试从错误中恢复
    ///
    /// 不可恢复 → 直接兜底；熔断打开 → 直接兜底；否则按退避重试 func，
    /// 最终失败则计入失败并兜底。无兜底时返回 None。
    pub async fn recover<T, F, Fut>(
        &self,
        func: F,
        error: &AgentError,
        context: &ErrorContext,
        fallback: Option<Fallback<T>>,
    ) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AgentError>>,
    {
        if !error.recoverable {
            tracing::error!(error = %error, "error is not recoverable");
            return fallback.map(|f| {
                tracing::info!("attempting fallback function");
                f()
            });
        }

        let operation = context.operation.as_deref();
        if let Some(op) = operation {
            if self.is_circuit_open(op) {
                tracing::warn!(operation = %op, "circuit breaker is open, using fallback");
                return fallback.map(|f| f());
            }
        }

        match retry_with_backoff(&self.retry, operation.unwrap_or("recover"), |_, _| {}, func).await {
            Ok(value) => {
                if let Some(op) = operation {
                    self.record_success(op);
                }
                Some(value)
            }
            Err(err) => {
                tracing::error!(error = %err, "recovery failed");
                if let Some(op) = operation {
                    self.record_failure(op);
                }
                fallback.map(|f| f())
            }
        }
    }
}

/// 先执行 primary，失败时记录并改用 fallback
pub fn with_fallback<T>(
    primary: impl FnOnce() -> Result<T, AgentError>,
    fallback: impl FnOnce() -> T,
) -> T {
    match primary() {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!(error = %err, "primary failed, using fallback");
            fallback()
        }
    }
}

/// 非抛出语义的执行包装：错误（含 panic）转为 `(结果, 错误)`，并在给定时上报处理器
pub fn safe_execute<T>(
    f: impl FnOnce() -> Result<T, AgentError>,
    default: Option<T>,
    reporter: Option<(&ErrorRecoveryHandler, &ErrorContext)>,
) -> (Option<T>, Option<AgentError>) {
    let err = match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => return (Some(value), None),
        Ok(Err(err)) => err,
        Err(payload) => {
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "panic".to_string());
            AgentError::unknown(format!("Unexpected error: {msg}"))
        }
    };
    if let Some((handler, context)) = reporter {
        handler.handle_error(&err, context.clone(), RecoveryStrategy::Retry);
    }
    (default, Some(err))
}
