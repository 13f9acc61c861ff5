//! 协调者 agent：维护专职 agent 名册，负责委派任务、查询状态、汇总结果
//!
//! 对未登记的 agent 名，工具返回 `{"error": ...}` 而不是报错，方便模型读到后修正参数重试。

use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::agents::base::{object, AgentHandle, SpecializedAgent};
use crate::config::AppConfig;
use crate::core::{AgentStatus, StateManager};
use crate::observability::{CommunicationLogger, MessageKind};
use crate::tools::{FunctionTool, NoArgs};

#[derive(Deserialize, JsonSchema)]
pub struct DelegateTaskArgs {
    /// Name of the agent to delegate to.
    pub agent_name: String,
    /// Description of the task to perform.
    pub task: String,
    /// Additional context for the task.
    #[serde(default)]
    pub context: String,
}

#[derive(Deserialize, JsonSchema)]
pub struct AgentNameArgs {
    /// Name of the agent.
    pub agent_name: String,
}

#[derive(Deserialize, JsonSchema)]
pub struct SynthesizeArgs {
    /// Comma-separated list of agent names.
    pub agent_names: String,
    /// How to synthesize the results.
    pub synthesis_prompt: String,
}

/// 协调者；克隆共享同一份名册
#[derive(Clone)]
pub struct CoordinatorAgent {
    handle: AgentHandle,
    roster: Arc<RwLock<Vec<(String, String)>>>,
    inter_agent_messages: bool,
    limits: (u32, u64),
    comms: Option<Arc<CommunicationLogger>>,
}

impl CoordinatorAgent {
    pub fn new(state: Arc<StateManager>, config: &AppConfig) -> Self {
        Self {
            handle: AgentHandle::new(
                config.agents.coordinator_name.clone(),
                config.models.coordinator(),
                state,
            ),
            roster: Arc::new(RwLock::new(Vec::new())),
            inter_agent_messages: config.agents.enable_inter_agent_messages,
            limits: (config.agents.max_iterations, config.agents.timeout_secs),
            comms: None,
        }
    }

    /// 委派记录写入通信日志
    pub fn with_communication_log(mut self, comms: Arc<CommunicationLogger>) -> Self {
        self.comms = Some(comms);
        self
    }

    /// 登记专职 agent（同名覆盖描述），并在状态管理器中注册
    pub fn register_specialized_agent(&self, agent_name: &str, description: &str) {
        {
            let mut roster = self.roster.write();
            match roster.iter_mut().find(|(name, _)| name == agent_name) {
                Some(entry) => entry.1 = description.to_string(),
                None => roster.push((agent_name.to_string(), description.to_string())),
            }
        }
        self.handle.state().register_agent(agent_name);
    }

    pub fn available_agents(&self) -> Vec<String> {
        self.roster.read().iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn is_available(&self, agent_name: &str) -> bool {
        self.roster.read().iter().any(|(name, _)| name == agent_name)
    }

    fn not_found(&self, agent_name: &str) -> Value {
        json!({ "error": format!("Agent '{agent_name}' not found") })
    }

    /// 记录用户请求到全局上下文，并把协调者标记为 orchestrating
    pub fn orchestrate(&self, user_query: &str, context: Option<&Map<String, Value>>) -> Value {
        let state = self.handle.state();
        state.set_global_context("user_query", user_query);
        if let Some(context) = context {
            for (key, value) in context {
                state.set_global_context(key, value.clone());
            }
        }
        self.handle.update_state("status", "orchestrating");
        self.handle.update_state("query", user_query);
        tracing::info!(agent = %self.handle.name(), "orchestration initiated");

        json!({
            "status": "orchestration_initiated",
            "query": user_query,
            "available_agents": self.available_agents(),
            "message": "Coordinator agent initialized and ready to delegate tasks",
        })
    }

    /// 发送任务消息并把目标 agent 置为 working
    pub fn delegate_task(&self, agent_name: &str, task: &str, context: &str) -> Value {
        let start = Instant::now();
        let log_id = self.comms.as_ref().map(|comms| {
            comms.log_message(
                MessageKind::Request,
                self.handle.name(),
                "delegate_task",
                Some(agent_name),
                object(json!({ "task": task, "context": context })),
            )
        });
        let reply = self.delegate(agent_name, task, context);
        if let (Some(comms), Some(id)) = (&self.comms, log_id) {
            let error = reply.get("error").and_then(Value::as_str).map(str::to_string);
            comms.update_response(id, Some(reply.clone()), Some(start.elapsed()), error.is_none(), error);
        }
        reply
    }

    fn delegate(&self, agent_name: &str, task: &str, context: &str) -> Value {
        if !self.is_available(agent_name) {
            return json!({
                "error": format!(
                    "Agent '{agent_name}' not found. Available agents: {}",
                    self.available_agents().join(", ")
                )
            });
        }
        if self.inter_agent_messages {
            self.handle.send_message(
                agent_name,
                object(json!({
                    "type": "task_delegation",
                    "task": task,
                    "context": context,
                })),
            );
        }
        self.handle
            .state()
            .update_status(agent_name, AgentStatus::Working, Some(task));
        tracing::info!(from = %self.handle.name(), to = %agent_name, task = %task, "task delegated");

        json!({
            "status": "delegated",
            "agent": agent_name,
            "task": task,
            "message": format!("Task delegated to {agent_name}: {task}"),
        })
    }

    pub fn get_agent_status(&self, agent_name: &str) -> Value {
        if !self.is_available(agent_name) {
            return self.not_found(agent_name);
        }
        let state = self.handle.state().agent_state(agent_name);
        json!({
            "agent": agent_name,
            "status": state.status,
            "current_task": state.current_task,
            "results_count": state.results.len(),
        })
    }

    pub fn get_agent_results(&self, agent_name: &str) -> Value {
        if !self.is_available(agent_name) {
            return self.not_found(agent_name);
        }
        let state = self.handle.state().agent_state(agent_name);
        json!({
            "agent": agent_name,
            "results": state.results,
        })
    }

    /// 所有已注册 agent（不限于名册）的状态概览
    pub fn get_all_agents_status(&self) -> Value {
        let status: Map<String, Value> = self
            .handle
            .state()
            .get_all_agent_states()
            .into_iter()
            .map(|(name, state)| {
                (
                    name,
                    json!({
                        "status": state.status,
                        "current_task": state.current_task,
                        "results_count": state.results.len(),
                    }),
                )
            })
            .collect();
        Value::Object(status)
    }

    /// 收集指定 agent 的结果；名册外的名字被忽略
    pub fn synthesize_results(&self, agent_names: &str, synthesis_prompt: &str) -> Value {
        let mut results = Map::new();
        for name in agent_names.split(',').map(str::trim) {
            if self.is_available(name) {
                let state = self.handle.state().agent_state(name);
                results.insert(name.to_string(), Value::Array(state.results));
            }
        }
        json!({
            "synthesis_prompt": synthesis_prompt,
            "agent_results": results,
            "note": "Use this information to create your final response",
        })
    }
}

impl SpecializedAgent for CoordinatorAgent {
    fn handle(&self) -> &AgentHandle {
        &self.handle
    }

    fn limits(&self) -> (u32, u64) {
        self.limits
    }

    fn system_instruction(&self) -> String {
        let agents_info = self
            .roster
            .read()
            .iter()
            .map(|(name, desc)| format!("- {name}: {desc}"))
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "You are the Coordinator Agent in a multi-agent system. Your role is to:
1. Analyze incoming user requests
2. Determine which specialized agents are needed
3. Break down complex tasks into subtasks
4. Delegate subtasks to appropriate specialized agents
5. Monitor task progress and agent status
6. Synthesize results from multiple agents
7. Handle errors and retries

Available specialized agents:
{agents_info}

When you receive a request, analyze it carefully and determine which agents should handle it.
You can delegate tasks to multiple agents in parallel if they are independent.
Always provide clear, structured instructions to each agent."
        )
    }

    fn tools(&self) -> Vec<FunctionTool> {
        let delegate = self.clone();
        let status = self.clone();
        let results = self.clone();
        let all = self.clone();
        let synth = self.clone();
        vec![
            FunctionTool::new(
                "delegate_task",
                "Delegate a task to a specialized agent.",
                move |a: DelegateTaskArgs| Ok(delegate.delegate_task(&a.agent_name, &a.task, &a.context)),
            ),
            FunctionTool::new(
                "get_agent_status",
                "Get the current status of an agent.",
                move |a: AgentNameArgs| Ok(status.get_agent_status(&a.agent_name)),
            ),
            FunctionTool::new(
                "get_agent_results",
                "Get the results from a specific agent.",
                move |a: AgentNameArgs| Ok(results.get_agent_results(&a.agent_name)),
            ),
            FunctionTool::new(
                "get_all_agents_status",
                "Get the status of all registered agents.",
                move |_: NoArgs| Ok(all.get_all_agents_status()),
            ),
            FunctionTool::new(
                "synthesize_results",
                "Synthesize results from multiple agents.",
                move |a: SynthesizeArgs| Ok(synth.synthesize_results(&a.agent_names, &a.synthesis_prompt)),
            ),
        ]
    }
}
