//! Agent 错误类型
//!
//! 所有内部 API 统一返回 `Result<T, AgentError>`。错误携带类别、严重程度、来源 agent、
//! 是否可恢复、上下文与时间戳；RecoveryHandler 与 ErrorAggregator 依据这些字段决策与统计。

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

/// 错误类别
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    ToolExecution,
    ModelInference,
    Validation,
    Timeout,
    RateLimit,
    Resource,
    Communication,
    Configuration,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ToolExecution => "tool_execution",
            Self::ModelInference => "model_inference",
            Self::Validation => "validation",
            Self::Timeout => "timeout",
            Self::RateLimit => "rate_limit",
            Self::Resource => "resource",
            Self::Communication => "communication",
            Self::Configuration => "configuration",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 严重程度
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// 多智能体系统中的统一错误
///
/// 校验与配置错误默认不可恢复（快速失败）；工具执行、超时、通信错误默认可恢复，可进入重试 / 熔断。
/// 限流错误带 `retry_after`，供不愿阻塞的调用方自行安排重试。
#[derive(Error, Debug, Clone)]
#[error("{category} error: {message}")]
pub struct AgentError {
    pub message: String,
    pub category: ErrorCategory,
    pub severity: Severity,
    pub agent_name: Option<String>,
    pub recoverable: bool,
    pub context: Map<String, Value>,
    pub retry_after: Option<Duration>,
    pub timestamp: DateTime<Utc>,
}

impl AgentError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        let recoverable = !matches!(
            category,
            ErrorCategory::Validation | ErrorCategory::Configuration
        );
        Self {
            message: message.into(),
            category,
            severity: Severity::Medium,
            agent_name: None,
            recoverable,
            context: Map::new(),
            retry_after: None,
            timestamp: Utc::now(),
        }
    }

    pub fn tool_execution(message: impl Into<String>, tool_name: &str, tool_args: Option<Value>) -> Self {
        Self::new(ErrorCategory::ToolExecution, message)
            .with_context("tool_name", tool_name)
            .with_context("tool_args", tool_args.unwrap_or(Value::Null))
    }

    pub fn model_inference(message: impl Into<String>, model_name: Option<&str>, prompt: Option<&str>) -> Self {
        Self::new(ErrorCategory::ModelInference, message)
            .with_context("model_name", model_name)
            .with_context("prompt_length", prompt.map(str::len).unwrap_or(0))
    }

    pub fn validation(message: impl Into<String>, field_name: &str, invalid_value: impl fmt::Display) -> Self {
        Self::new(ErrorCategory::Validation, message)
            .with_context("field_name", field_name)
            .with_context("invalid_value", invalid_value.to_string())
    }

    pub fn timeout(message: impl Into<String>, timeout: Duration, operation: Option<&str>) -> Self {
        Self::new(ErrorCategory::Timeout, message)
            .with_context("timeout_seconds", timeout.as_secs_f64())
            .with_context("operation", operation)
    }

    pub fn rate_limit(message: impl Into<String>, retry_after: Duration, limit_type: Option<&str>) -> Self {
        let mut err = Self::new(ErrorCategory::RateLimit, message)
            .with_context("retry_after", retry_after.as_secs_f64())
            .with_context("limit_type", limit_type);
        err.retry_after = Some(retry_after);
        err
    }

    pub fn resource(message: impl Into<String>, resource_type: &str, current_usage: Option<f64>, limit: Option<f64>) -> Self {
        Self::new(ErrorCategory::Resource, message)
            .with_severity(Severity::High)
            .with_context("resource_type", resource_type)
            .with_context("current_usage", current_usage)
            .with_context("limit", limit)
    }

    pub fn communication(message: impl Into<String>, source_agent: Option<&str>, target_agent: Option<&str>) -> Self {
        Self::new(ErrorCategory::Communication, message)
            .with_context("source_agent", source_agent)
            .with_context("target_agent", target_agent)
    }

    pub fn configuration(message: impl Into<String>, config_key: Option<&str>) -> Self {
        Self::new(ErrorCategory::Configuration, message).with_context("config_key", config_key)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Unknown, message)
    }

    pub fn with_agent(mut self, agent_name: impl Into<String>) -> Self {
        self.agent_name = Some(agent_name.into());
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_recoverable(mut self, recoverable: bool) -> Self {
        self.recoverable = recoverable;
        self
    }

    pub fn with_context(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.context.insert(key.to_string(), value.into());
        self
    }

    /// 序列化为日志 / 审计记录使用的 JSON
    pub fn to_json(&self) -> Value {
        json!({
            "message": self.message,
            "category": self.category.as_str(),
            "severity": self.severity.as_str(),
            "agent_name": self.agent_name,
            "recoverable": self.recoverable,
            "timestamp": self.timestamp.to_rfc3339(),
            "retry_after": self.retry_after.map(|d| d.as_secs_f64()),
            "context": self.context,
        })
    }
}

impl From<config::ConfigError> for AgentError {
    fn from(err: config::ConfigError) -> Self {
        AgentError::configuration(err.to_string(), None)
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(err: serde_json::Error) -> Self {
        AgentError::new(ErrorCategory::ToolExecution, format!("JSON error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_and_configuration_not_recoverable() {
        assert!(!AgentError::validation("bad", "query", "x").recoverable);
        assert!(!AgentError::configuration("bad", Some("rate")).recoverable);
        assert!(AgentError::tool_execution("boom", "web_search", None).recoverable);
        assert!(AgentError::timeout("slow", Duration::from_secs(1), Some("op")).recoverable);
        assert!(AgentError::communication("lost", Some("a"), Some("b")).recoverable);
    }

    #[test]
    fn test_rate_limit_carries_retry_after() {
        let err = AgentError::rate_limit("too fast", Duration::from_millis(500), Some("requests_per_second"));
        assert_eq!(err.category, ErrorCategory::RateLimit);
        assert_eq!(err.retry_after, Some(Duration::from_millis(500)));
        assert_eq!(err.context["limit_type"], "requests_per_second");
    }

    #[test]
    fn test_resource_defaults_to_high_severity() {
        let err = AgentError::resource("oom", "memory", Some(900.0), Some(512.0));
        assert_eq!(err.severity, Severity::High);
    }

    #[test]
    fn test_to_json_shape() {
        let err = AgentError::tool_execution("boom", "web_search", Some(json!({"query": "x"})))
            .with_agent("research_agent");
        let v = err.to_json();
        assert_eq!(v["category"], "tool_execution");
        assert_eq!(v["agent_name"], "research_agent");
        assert_eq!(v["context"]["tool_name"], "web_search");
        assert_eq!(err.to_string(), "tool_execution error: boom");
    }
}
