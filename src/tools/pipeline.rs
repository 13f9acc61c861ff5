//! 工具调用管线
//!
//! 固定顺序：输入校验 → 限流 → 超时 → 工具本身 → 输出校验。
//! 阶段按添加时的类型归位，与添加顺序无关；同类阶段重复添加时后者覆盖前者。
//! 超时只包住工具本身的执行，限流等待与输出校验不计入。

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::core::{AgentError, Limiter, RateLimitConfig};
use crate::tools::validation::{InputValidator, OutputValidator};
use crate::tools::Tool;

/// 管线阶段
#[derive(Clone)]
pub enum Stage {
    InputValidation(InputValidator),
    RateLimit(Arc<Limiter>),
    Timeout(Duration),
    OutputValidation(OutputValidator),
}

impl Stage {
    fn rank(&self) -> u8 {
        match self {
            Self::InputValidation(_) => 0,
            Self::RateLimit(_) => 1,
            Self::Timeout(_) => 2,
            Self::OutputValidation(_) => 3,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::InputValidation(_) => "input_validation",
            Self::RateLimit(_) => "rate_limit",
            Self::Timeout(_) => "timeout",
            Self::OutputValidation(_) => "output_validation",
        }
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout(d) => write!(f, "Timeout({:?})", d),
            Self::RateLimit(l) => write!(f, "RateLimit({:?})", l.kind()),
            other => f.write_str(other.name()),
        }
    }
}

/// 有序中间件管线；可在多个调用间共享（限流器以 Arc 共享额度）
#[derive(Clone, Debug, Default)]
pub struct ToolPipeline {
    stages: Vec<Stage>,
}

impl ToolPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stages.retain(|s| s.rank() != stage.rank());
        let idx = self.stages.partition_point(|s| s.rank() < stage.rank());
        self.stages.insert(idx, stage);
        self
    }

    pub fn with_input_validation(self, validator: InputValidator) -> Self {
        self.with_stage(Stage::InputValidation(validator))
    }

    pub fn with_rate_limit(self, config: RateLimitConfig) -> Result<Self, AgentError> {
        let limiter = Limiter::from_config(config)?;
        Ok(self.with_stage(Stage::RateLimit(Arc::new(limiter))))
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_stage(Stage::Timeout(timeout))
    }

    pub fn with_output_validation(self, validator: OutputValidator) -> Self {
        self.with_stage(Stage::OutputValidation(validator))
    }

    /// 实际执行顺序
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(Stage::name).collect()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.stages.iter().find_map(|s| match s {
            Stage::Timeout(d) => Some(*d),
            _ => None,
        })
    }

    /// 按固定顺序执行一次工具调用
    pub async fn run(&self, tool: &dyn Tool, args: Value) -> Result<String, AgentError> {
        let name = tool.name();

        for stage in &self.stages {
            match stage {
                Stage::InputValidation(validator) => {
                    validator.validate_arguments(&args).map_err(|e| {
                        tracing::error!(tool = %name, error = %e, "input validation failed");
                        e
                    })?;
                }
                Stage::RateLimit(limiter) => limiter.acquire_async().await?,
                _ => {}
            }
        }

        let output = match self.timeout() {
            Some(limit) => tokio::time::timeout(limit, tool.execute(args))
                .await
                .map_err(|_| {
                    AgentError::timeout(
                        format!("Operation {name} timed out after {}s", limit.as_secs_f64()),
                        limit,
                        Some(name),
                    )
                })??,
            None => tool.execute(args).await?,
        };

        for stage in &self.stages {
            if let Stage::OutputValidation(validator) = stage {
                validator.validate_output(&output).map_err(|e| {
                    tracing::error!(tool = %name, error = %e, "output validation failed");
                    e
                })?;
            }
        }
        Ok(output)
    }
}
