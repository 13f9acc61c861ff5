//! Colony - Rust 多智能体协作核心
//!
//! 模块划分：
//! - **agents**: 协调者与专职 agent（research / code_generation / data_analysis）、注册表
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 共享状态、限流、错误分类与恢复（熔断、退避重试）
//! - **observability**: 日志初始化、性能指标、错误聚合、健康检查、状态快照
//! - **tools**: 工具 trait、注册表、调用管线与执行器

pub mod agents;
pub mod config;
pub mod core;
pub mod observability;
pub mod tools;

pub use agents::{AgentKind, AgentRegistry, CoordinatorAgent, SpecializedAgent};
pub use config::{load_config, AppConfig};
pub use crate::core::{AgentError, StateManager};
