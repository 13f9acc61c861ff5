//! Agent 注册表：按类型创建 agent，持有共享的状态管理器、恢复处理器、指标与错误聚合器
//!
//! 注册表是显式构造的实例，由调用方传给需要的地方；不存在进程级全局注册表。

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::agents::{
    CodeGenerationAgent, CoordinatorAgent, DataAnalysisAgent, ResearchAgent, SpecializedAgent,
};
use crate::config::AppConfig;
use crate::core::{AgentError, ErrorRecoveryHandler, Limiter, Severity, StateManager};
use crate::observability::{
    CommunicationLogger, ComponentHealth, ErrorAggregator, HealthChecker, HealthStatus, MetricsCollector,
};
use crate::tools::{InputValidator, OutputValidator, Stage, ToolExecutor, ToolPipeline};

/// 每分钟错误数超过该值时 errors 组件为 degraded
const DEGRADED_ERROR_RATE: f64 = 30.0;

/// agent 类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Coordinator,
    Research,
    CodeGeneration,
    DataAnalysis,
}

impl AgentKind {
    pub const ALL: [AgentKind; 4] = [
        AgentKind::Coordinator,
        AgentKind::Research,
        AgentKind::CodeGeneration,
        AgentKind::DataAnalysis,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Coordinator => "coordinator",
            Self::Research => "research",
            Self::CodeGeneration => "code_generation",
            Self::DataAnalysis => "data_analysis",
        }
    }

    /// 能力描述；专职 agent 的描述会登记到协调者名册
    pub fn description(&self) -> &'static str {
        match self {
            Self::Coordinator => {
                "Orchestrates tasks across specialized agents, delegates work, and synthesizes results."
            }
            Self::Research => {
                "Specialized in gathering information, conducting web searches, and synthesizing \
                 research findings. Use for information gathering, fact-checking, and research tasks."
            }
            Self::CodeGeneration => {
                "Specialized in generating, reviewing, and refactoring code in multiple programming \
                 languages. Use for code writing, code review, test generation, and technical documentation."
            }
            Self::DataAnalysis => {
                "Specialized in analyzing datasets, performing statistical analysis, identifying \
                 patterns, and generating visualizations. Use for data processing, insights generation, \
                 and analytical reports."
            }
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentKind {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| {
                let available: Vec<&str> = Self::ALL.iter().map(AgentKind::as_str).collect();
                AgentError::validation(
                    format!(
                        "Unknown agent type: {s}. Available types: {}",
                        available.join(", ")
                    ),
                    "agent_type",
                    s,
                )
            })
    }
}

type AgentMap = BTreeMap<String, Arc<dyn SpecializedAgent>>;

/// agent 工厂与目录
pub struct AgentRegistry {
    config: AppConfig,
    state: Arc<StateManager>,
    recovery: Arc<ErrorRecoveryHandler>,
    metrics: Arc<MetricsCollector>,
    errors: Arc<ErrorAggregator>,
    comms: Arc<CommunicationLogger>,
    agents: Arc<RwLock<AgentMap>>,
    limiters: Mutex<HashMap<String, Arc<Limiter>>>,
}

impl AgentRegistry {
    pub fn new(config: AppConfig) -> Self {
        Self::with_state(config, Arc::new(StateManager::new()))
    }

    /// 使用外部提供的状态管理器
    pub fn with_state(config: AppConfig, state: Arc<StateManager>) -> Self {
        let recovery = ErrorRecoveryHandler::new(
            config.resilience.circuit_breaker_threshold,
            config.resilience.circuit_breaker_timeout(),
        )
        .with_retry(config.resilience.retry_config());
        Self {
            config,
            state,
            recovery: Arc::new(recovery),
            metrics: Arc::new(MetricsCollector::default()),
            errors: Arc::new(ErrorAggregator::default()),
            comms: Arc::new(CommunicationLogger::default()),
            agents: Arc::new(RwLock::new(BTreeMap::new())),
            limiters: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn state(&self) -> &Arc<StateManager> {
        &self.state
    }

    pub fn recovery(&self) -> &Arc<ErrorRecoveryHandler> {
        &self.recovery
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn errors(&self) -> &Arc<ErrorAggregator> {
        &self.errors
    }

    pub fn communications(&self) -> &Arc<CommunicationLogger> {
        &self.comms
    }

    /// 创建指定类型的 agent，注册到状态管理器并缓存（同名替换）
    pub fn create_agent(&self, kind: AgentKind) -> Arc<dyn SpecializedAgent> {
        let agent: Arc<dyn SpecializedAgent> = match kind {
            AgentKind::Coordinator => Arc::new(self.build_coordinator()),
            AgentKind::Research => Arc::new(ResearchAgent::new(Arc::clone(&self.state), &self.config)),
            AgentKind::CodeGeneration => {
                Arc::new(CodeGenerationAgent::new(Arc::clone(&self.state), &self.config))
            }
            AgentKind::DataAnalysis => {
                Arc::new(DataAnalysisAgent::new(Arc::clone(&self.state), &self.config))
            }
        };
        self.register_agent(Arc::clone(&agent));
        tracing::info!(agent = %agent.name(), kind = %kind, "agent created");
        agent
    }

    fn build_coordinator(&self) -> CoordinatorAgent {
        CoordinatorAgent::new(Arc::clone(&self.state), &self.config)
            .with_communication_log(Arc::clone(&self.comms))
    }

    /// 创建协调者并返回具体类型；注册表里缓存的是共享名册的克隆
    pub fn create_coordinator(&self) -> CoordinatorAgent {
        let coordinator = self.build_coordinator();
        self.register_agent(Arc::new(coordinator.clone()));
        tracing::info!(agent = %coordinator.name(), kind = %AgentKind::Coordinator, "agent created");
        coordinator
    }

    /// 协调者 + 三个专职 agent，专职 agent 按描述登记到协调者名册
    pub fn create_multi_agent_system(&self) -> CoordinatorAgent {
        let coordinator = self.create_coordinator();
        for kind in [AgentKind::Research, AgentKind::CodeGeneration, AgentKind::DataAnalysis] {
            let agent = self.create_agent(kind);
            coordinator.register_specialized_agent(agent.name(), kind.description());
        }
        coordinator
    }

    pub fn get_agent(&self, name: &str) -> Option<Arc<dyn SpecializedAgent>> {
        self.agents.read().get(name).cloned()
    }

    pub fn all_agents(&self) -> AgentMap {
        self.agents.read().clone()
    }

    pub fn register_agent(&self, agent: Arc<dyn SpecializedAgent>) {
        let name = agent.name().to_string();
        self.state.register_agent(&name);
        self.agents.write().insert(name, agent);
    }

    pub fn agent_kinds(&self) -> Vec<AgentKind> {
        AgentKind::ALL.to_vec()
    }

    pub fn describe(&self, kind: AgentKind) -> &'static str {
        kind.description()
    }

    /// 清空注册表、共享状态、限流额度与通信日志；熔断与审计历史保留
    pub fn reset_all_agents(&self) {
        self.agents.write().clear();
        self.comms.clear();
        self.limiters.lock().clear();
        self.state.reset();
        tracing::info!("agent registry reset");
    }

    /// 按 [tools] 配置组装管线：输入校验、（可选）限流、超时、输出校验
    fn pipeline_for(&self, agent_name: &str) -> Result<ToolPipeline, AgentError> {
        let tools = &self.config.tools;
        let mut pipeline = ToolPipeline::new()
            .with_input_validation(InputValidator::new(tools.input_constraints())?)
            .with_output_validation(OutputValidator::new(tools.output_constraints()));
        if let Some(timeout) = tools.timeout() {
            pipeline = pipeline.with_timeout(timeout);
        }
        if let Some(rate_limit) = &tools.rate_limit {
            let limiter = {
                let mut limiters = self.limiters.lock();
                match limiters.get(agent_name) {
                    Some(existing) => Arc::clone(existing),
                    None => {
                        let created = Arc::new(Limiter::from_config(rate_limit.clone())?);
                        limiters.insert(agent_name.to_string(), Arc::clone(&created));
                        created
                    }
                }
            };
            pipeline = pipeline.with_stage(Stage::RateLimit(limiter));
        }
        Ok(pipeline)
    }

    /// 为已创建的 agent 构造执行器；同一 agent 的多个执行器共享限流额度与熔断状态
    pub fn executor_for(&self, agent_name: &str) -> Result<ToolExecutor, AgentError> {
        let agent = self.get_agent(agent_name).ok_or_else(|| {
            AgentError::configuration(format!("Agent '{agent_name}' not found"), Some("agent_name"))
        })?;
        Ok(ToolExecutor::new(agent_name, agent.tool_registry())
            .with_pipeline(self.pipeline_for(agent_name)?)
            .with_recovery(Arc::clone(&self.recovery))
            .with_metrics(Arc::clone(&self.metrics))
            .with_error_aggregator(Arc::clone(&self.errors))
            .with_communication_log(Arc::clone(&self.comms))
            .with_parallel(self.config.agents.enable_parallel_execution)
            .with_detailed_audit(self.config.logging.detailed))
    }

    /// 健康检查：state_manager、agents、errors 三个组件
    pub fn health_checker(&self) -> HealthChecker {
        let checker = HealthChecker::new();

        let state = Arc::clone(&self.state);
        checker.register_check("state_manager", move || {
            let registered = state.get_all_agent_states().len();
            ComponentHealth::healthy("state_manager").with_metadata("registered_agents", registered)
        });

        let agents = Arc::clone(&self.agents);
        checker.register_check("agents", move || {
            let names: Vec<String> = agents.read().keys().cloned().collect();
            if names.is_empty() {
                ComponentHealth::new("agents", HealthStatus::Unhealthy).with_message("No agents created")
            } else {
                ComponentHealth::healthy("agents").with_metadata("agents", names)
            }
        });

        let errors = Arc::clone(&self.errors);
        checker.register_check("errors", move || {
            let m = errors.metrics();
            let critical = m
                .errors_by_severity
                .get(Severity::Critical.as_str())
                .copied()
                .unwrap_or(0);
            let status = if critical > 0 || m.error_rate_per_minute > DEGRADED_ERROR_RATE {
                HealthStatus::Degraded
            } else {
                HealthStatus::Healthy
            };
            ComponentHealth::new("errors", status)
                .with_metadata("total_errors", m.total_errors)
                .with_metadata("error_rate_per_minute", m.error_rate_per_minute)
        });

        checker
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{AgentStatus, ErrorCategory, RateLimitConfig};
    use serde_json::json;

    #[test]
    fn test_kind_parsing() {
        assert_eq!("code_generation".parse::<AgentKind>().unwrap(), AgentKind::CodeGeneration);
        let err = "wizard".parse::<AgentKind>().unwrap_err();
        assert!(err.message.contains("Available types: coordinator, research"));
    }

    #[test]
    fn test_multi_agent_system_registers_everyone() {
        let registry = AgentRegistry::new(AppConfig::default());
        let coordinator = registry.create_multi_agent_system();
        assert_eq!(
            coordinator.available_agents(),
            vec!["research_agent", "code_generation_agent", "data_analysis_agent"]
        );
        assert_eq!(registry.all_agents().len(), 4);
        for name in ["coordinator", "research_agent", "code_generation_agent", "data_analysis_agent"] {
            assert!(registry.get_agent(name).is_some());
            assert_eq!(registry.state().agent_state(name).status, AgentStatus::Idle);
        }
        assert!(coordinator.system_instruction().contains(AgentKind::Research.description()));
    }

    #[test]
    fn test_cached_coordinator_shares_roster() {
        let registry = AgentRegistry::new(AppConfig::default());
        let coordinator = registry.create_multi_agent_system();
        coordinator.register_specialized_agent("extra_agent", "extra");
        let cached = registry.get_agent("coordinator").unwrap();
        assert!(cached.system_instruction().contains("- extra_agent: extra"));
    }

    #[test]
    fn test_reset_clears_agents_and_state() {
        let registry = AgentRegistry::new(AppConfig::default());
        registry.create_multi_agent_system();
        registry.reset_all_agents();
        assert!(registry.all_agents().is_empty());
        assert!(registry.state().get_all_agent_states().is_empty());
    }

    #[test]
    fn test_describe_and_kinds() {
        let registry = AgentRegistry::new(AppConfig::default());
        assert_eq!(registry.agent_kinds().len(), 4);
        assert!(registry.describe(AgentKind::Coordinator).starts_with("Orchestrates"));
    }

    #[test]
    fn test_executor_for_unknown_agent() {
        let registry = AgentRegistry::new(AppConfig::default());
        let err = registry.executor_for("ghost").err().unwrap();
        assert_eq!(err.category, ErrorCategory::Configuration);
    }

    #[tokio::test]
    async fn test_executor_validates_input() {
        let mut config = AppConfig::default();
        config.tools.max_string_length = 8;
        let registry = AgentRegistry::new(config);
        registry.create_multi_agent_system();
        let exec = registry.executor_for("research_agent").unwrap();
        let err = exec
            .execute("get_current_knowledge", json!({"topic": "far too long a topic"}))
            .await
            .unwrap_err();
        assert_eq!(err.category, ErrorCategory::Validation);
        assert_eq!(registry.errors().metrics().total_errors, 1);
    }

    #[tokio::test]
    async fn test_executors_share_rate_limit_per_agent() {
        let mut config = AppConfig::default();
        config.tools.rate_limit = Some(RateLimitConfig::per_minute(1.0).with_wait(false));
        let registry = AgentRegistry::new(config);
        registry.create_multi_agent_system();

        let first = registry.executor_for("research_agent").unwrap();
        let second = registry.executor_for("research_agent").unwrap();
        first
            .execute("get_current_knowledge", json!({"topic": "a"}))
            .await
            .unwrap();
        let err = second
            .execute("get_current_knowledge", json!({"topic": "b"}))
            .await
            .unwrap_err();
        assert_eq!(err.category, ErrorCategory::RateLimit);

        let other = registry.executor_for("data_analysis_agent").unwrap();
        assert!(other
            .execute("identify_patterns", json!({"data_description": "d"}))
            .await
            .is_ok());
    }

    #[test]
    fn test_health_checker() {
        let registry = AgentRegistry::new(AppConfig::default());
        assert_eq!(
            registry.health_checker().run_all_checks().overall_status,
            HealthStatus::Unhealthy
        );
        registry.create_multi_agent_system();
        let report = registry.health_checker().run_all_checks();
        assert_eq!(report.overall_status, HealthStatus::Healthy);
        assert_eq!(report.components.len(), 3);
    }

    #[tokio::test]
    async fn test_delegation_traffic_is_logged() {
        let registry = AgentRegistry::new(AppConfig::default());
        registry.create_multi_agent_system();
        let exec = registry.executor_for("coordinator").unwrap();
        exec.execute(
            "delegate_task",
            json!({"agent_name": "research_agent", "task": "survey"}),
        )
        .await
        .unwrap();

        let analysis = registry.communications().analyze_communication_patterns().unwrap();
        assert_eq!(analysis.total_messages, 2);
        assert_eq!(analysis.successful_messages, 2);
        assert_eq!(
            analysis.most_active_agent_pairs[0].pair,
            "coordinator -> research_agent"
        );

        registry.reset_all_agents();
        assert!(registry.communications().is_empty());
    }

    #[tokio::test]
    async fn test_burst_past_rate_limit_recovers_after_refill() {
        let mut config = AppConfig::default();
        config.tools.rate_limit = Some(RateLimitConfig::per_second(2.0).with_burst(2).with_wait(false));
        let registry = AgentRegistry::new(config);
        registry.create_multi_agent_system();
        let exec = registry.executor_for("research_agent").unwrap();

        let mut rejected = 0;
        for _ in 0..7 {
            if exec
                .execute("get_current_knowledge", json!({"topic": "tides"}))
                .await
                .is_err()
            {
                rejected += 1;
            }
        }
        assert_eq!(rejected, 5);
        assert!(!registry
            .recovery()
            .is_circuit_open("research_agent.get_current_knowledge"));

        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        assert!(exec
            .execute("get_current_knowledge", json!({"topic": "tides"}))
            .await
            .is_ok());
    }
}
