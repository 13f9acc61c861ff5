//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / parameters_schema / execute），由 ToolRegistry 按名注册与查找，
//! ToolExecutor 在调用时套上管线（校验、限流、超时）并统一记录审计与指标。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::AgentError;

/// 工具 trait：名称、描述（供模型理解）、参数 schema、异步执行（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（模型发起调用时使用）
    fn name(&self) -> &str;

    /// 工具描述
    fn description(&self) -> &str;

    /// 参数 JSON Schema；默认表示无参数
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 执行工具，返回文本（通常是 JSON）
    async fn execute(&self, args: Value) -> Result<String, AgentError>;
}

/// 工具注册表：按名称存储 Arc<dyn Tool>，保留注册顺序
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    /// 同名工具会被替换，位置不变
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_none() {
            self.order.push(name);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// 直接调用工具，不经过管线
    pub async fn execute(&self, name: &str, args: Value) -> Result<String, AgentError> {
        let tool = self.get(name).ok_or_else(|| {
            AgentError::tool_execution(format!("Unknown tool: {name}"), name, None)
                .with_recoverable(false)
        })?;
        tool.execute(args).await
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.order.clone()
    }

    /// 返回 (name, description) 列表
    pub fn tool_descriptions(&self) -> Vec<(String, String)> {
        self.iter()
            .map(|tool| (tool.name().to_string(), tool.description().to_string()))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Tool>> {
        self.order.iter().filter_map(|name| self.tools.get(name))
    }

    /// 每个工具的 {name, description, parameters}
    pub fn to_schema(&self) -> Vec<Value> {
        self.iter()
            .map(|tool| {
                serde_json::json!({
                    "name": tool.name(),
                    "description": tool.description(),
                    "parameters": tool.parameters_schema()
                })
            })
            .collect()
    }

    pub fn to_schema_json(&self) -> String {
        serde_json::to_string_pretty(&self.to_schema()).unwrap_or_else(|_| "[]".to_string())
    }
}
