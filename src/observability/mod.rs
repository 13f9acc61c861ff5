//! 可观测性：日志初始化、性能指标、错误聚合、健康检查、状态快照、通信日志

pub mod communication;
pub mod errors;
pub mod health;
pub mod inspector;
pub mod metrics;

pub use communication::{
    AgentPairCount, CommunicationAnalysis, CommunicationLog, CommunicationLogger, LogFilter, MessageKind,
};
pub use errors::{ErrorAggregator, ErrorMetrics};
pub use health::{ComponentHealth, HealthCheckResult, HealthChecker, HealthStatus};
pub use inspector::{AgentStateSnapshot, SnapshotDiff, StateInspector};
pub use metrics::{MetricsCollector, PerformanceMetrics};

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{LogFormat, LoggingSection};

/// 安装全局 tracing subscriber；RUST_LOG 优先于配置的级别。重复调用时保持已有 subscriber
pub fn init(logging: &LoggingSection) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    let result = match logging.format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(false))
            .try_init(),
        LogFormat::Pretty => registry.with(fmt::layer().with_target(false)).try_init(),
    };
    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
