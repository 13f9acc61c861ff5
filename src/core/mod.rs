//! 核心协作层：错误类型、共享状态、限流、错误恢复

pub mod error;
pub mod rate_limit;
pub mod recovery;
pub mod state;

pub use error::{AgentError, ErrorCategory, Severity};
pub use rate_limit::{Limiter, LimiterKind, RateLimitConfig, RateLimiter, SlidingWindowRateLimiter};
pub use recovery::{
    calculate_backoff_delay, retry_with_backoff, safe_execute, with_fallback, ErrorContext,
    ErrorRecord, ErrorRecoveryHandler, Fallback, RecoveryStrategy, RetryConfig,
};
pub use state::{AgentState, AgentStatus, Message, StateManager};
