//! Agent 公共部分：共享状态句柄、定义描述、SpecializedAgent trait

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::core::{AgentState, Message, StateManager};
use crate::tools::{FunctionTool, ToolRegistry};

/// agent 对共享状态的访问句柄；克隆只复制 Arc
#[derive(Clone)]
pub struct AgentHandle {
    name: String,
    model: String,
    state: Arc<StateManager>,
}

impl AgentHandle {
    pub fn new(name: impl Into<String>, model: impl Into<String>, state: Arc<StateManager>) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            state,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn state(&self) -> &Arc<StateManager> {
        &self.state
    }

    /// 写入本 agent 的数据
    pub fn update_state(&self, key: &str, value: impl Into<Value>) {
        self.state.set(&self.name, key, value);
    }

    /// 读取任意 agent 的数据
    pub fn get_state(&self, agent_name: &str, key: &str) -> Option<Value> {
        self.state.get(agent_name, key)
    }

    pub fn agent_state(&self) -> AgentState {
        self.state.agent_state(&self.name)
    }

    pub fn add_result(&self, result: impl Into<Value>) {
        self.state.add_result(&self.name, result);
    }

    pub fn send_message(&self, target_agent: &str, content: Map<String, Value>) {
        self.state.send_message(&self.name, target_agent, content);
    }

    pub fn messages(&self, clear: bool) -> Vec<Message> {
        self.state.get_messages(&self.name, clear)
    }
}

/// 交给托管运行时的 agent 描述：名称、模型、系统提示词、工具 schema
#[derive(Clone, Debug, Serialize)]
pub struct AgentDefinition {
    pub name: String,
    pub model: String,
    pub instruction: String,
    pub tools: Vec<Value>,
    pub max_iterations: u32,
    pub timeout_secs: u64,
}

/// 专职 agent：固定提示词 + 一组工具
pub trait SpecializedAgent: Send + Sync {
    fn handle(&self) -> &AgentHandle;

    fn system_instruction(&self) -> String;

    fn tools(&self) -> Vec<FunctionTool>;

    fn name(&self) -> &str {
        self.handle().name()
    }

    fn model(&self) -> &str {
        self.handle().model()
    }

    /// 运行时限制（最大迭代次数, 超时秒数）
    fn limits(&self) -> (u32, u64) {
        (10, 300)
    }

    fn tool_registry(&self) -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        for tool in self.tools() {
            registry.register(tool);
        }
        registry
    }

    fn definition(&self) -> AgentDefinition {
        let (max_iterations, timeout_secs) = self.limits();
        AgentDefinition {
            name: self.name().to_string(),
            model: self.model().to_string(),
            instruction: self.system_instruction(),
            tools: self.tool_registry().to_schema(),
            max_iterations,
            timeout_secs,
        }
    }

    /// 把上下文写入本 agent 的数据，返回占位响应（实际推理由托管运行时完成）
    fn execute_task(&self, task: &str, context: Option<&Map<String, Value>>) -> String {
        if let Some(context) = context {
            for (key, value) in context {
                self.handle().update_state(key, value.clone());
            }
        }
        tracing::info!(agent = %self.name(), task = %task, "task received");
        format!("Agent {} executing task: {}", self.name(), task)
    }
}

/// 逗号分隔列表；空串时返回默认值
pub(crate) fn split_list(raw: &str, default: &[&str]) -> Vec<String> {
    if raw.trim().is_empty() {
        return default.iter().map(|s| s.to_string()).collect();
    }
    raw.split(',').map(|s| s.trim().to_string()).collect()
}

pub(crate) fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
