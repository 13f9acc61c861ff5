//! 共享状态：各 agent 的状态 / 结果 / 临时数据、邮箱与全局上下文
//!
//! StateManager 是协作层唯一的事实来源。所有读写都在同一把实例级互斥锁内完成，
//! 保证无丢失更新、无读到一半的状态；调用频率受 LLM 工具调用延迟约束，单锁足够。

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::AgentError;

/// Agent 运行状态
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    #[default]
    Idle,
    Working,
    Completed,
    Error,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Working => "working",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentStatus {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "idle" => Ok(Self::Idle),
            "working" => Ok(Self::Working),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            other => Err(AgentError::validation(
                format!("Unknown agent status: {other}"),
                "status",
                other,
            )),
        }
    }
}

/// 单个 agent 的状态；首次注册时创建，只在 reset 时销毁
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AgentState {
    pub name: String,
    pub data: Map<String, Value>,
    pub status: AgentStatus,
    pub current_task: Option<String>,
    pub results: Vec<Value>,
}

impl AgentState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: Map::new(),
            status: AgentStatus::Idle,
            current_task: None,
            results: Vec::new(),
        }
    }
}

/// agent 间消息，投递到收件人邮箱
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Message {
    pub from_agent: String,
    pub to_agent: String,
    pub content: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    states: BTreeMap<String, AgentState>,
    mailboxes: HashMap<String, Vec<Message>>,
    global_context: Map<String, Value>,
}

impl Inner {
    fn state_mut(&mut self, agent_name: &str) -> &mut AgentState {
        self.states
            .entry(agent_name.to_string())
            .or_insert_with(|| AgentState::new(agent_name))
    }
}

/// 线程安全的状态管理器；由 AgentRegistry 持有（或独立创建），agent 只持有其 Arc
#[derive(Default)]
pub struct StateManager {
    inner: Mutex<Inner>,
}

impl StateManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 幂等注册：不存在时以 Idle 创建
    pub fn register_agent(&self, agent_name: &str) {
        let mut inner = self.inner.lock();
        if !inner.states.contains_key(agent_name) {
            inner
                .states
                .insert(agent_name.to_string(), AgentState::new(agent_name));
            tracing::debug!(agent = %agent_name, "agent registered");
        }
    }

    pub fn is_registered(&self, agent_name: &str) -> bool {
        self.inner.lock().states.contains_key(agent_name)
    }

    /// 返回 agent 状态快照；未注册的名字会被自动注册
    pub fn agent_state(&self, agent_name: &str) -> AgentState {
        self.inner.lock().state_mut(agent_name).clone()
    }

    pub fn set(&self, agent_name: &str, key: &str, value: impl Into<Value>) {
        self.inner
            .lock()
            .state_mut(agent_name)
            .data
            .insert(key.to_string(), value.into());
    }

    /// 未知 key 返回 None（不报错）
    pub fn get(&self, agent_name: &str, key: &str) -> Option<Value> {
        self.inner.lock().state_mut(agent_name).data.get(key).cloned()
    }

    /// 状态无条件覆盖；current_task 仅在传入时更新
    pub fn update_status(&self, agent_name: &str, status: AgentStatus, current_task: Option<&str>) {
        let mut inner = self.inner.lock();
        let state = inner.state_mut(agent_name);
        state.status = status;
        if let Some(task) = current_task {
            state.current_task = Some(task.to_string());
        }
    }

    /// 追加结果；结果列表不设上限
    pub fn add_result(&self, agent_name: &str, result: impl Into<Value>) {
        self.inner
            .lock()
            .state_mut(agent_name)
            .results
            .push(result.into());
    }

    pub fn send_message(&self, from_agent: &str, to_agent: &str, content: Map<String, Value>) {
        let message = Message {
            from_agent: from_agent.to_string(),
            to_agent: to_agent.to_string(),
            content,
            timestamp: Utc::now(),
        };
        self.inner
            .lock()
            .mailboxes
            .entry(to_agent.to_string())
            .or_default()
            .push(message);
        tracing::debug!(from = %from_agent, to = %to_agent, "message queued");
    }

    /// 读取邮箱快照；clear 为 true 时在同一临界区内清空，不会出现既返回又保留的消息
    pub fn get_messages(&self, agent_name: &str, clear: bool) -> Vec<Message> {
        let mut inner = self.inner.lock();
        match inner.mailboxes.get_mut(agent_name) {
            Some(mailbox) if clear => std::mem::take(mailbox),
            Some(mailbox) => mailbox.clone(),
            None => Vec::new(),
        }
    }

    pub fn set_global_context(&self, key: &str, value: impl Into<Value>) {
        self.inner
            .lock()
            .global_context
            .insert(key.to_string(), value.into());
    }

    pub fn get_global_context(&self, key: &str) -> Option<Value> {
        self.inner.lock().global_context.get(key).cloned()
    }

    /// 全部状态的独立副本；之后的修改不会反映到返回值中
    pub fn get_all_agent_states(&self) -> BTreeMap<String, AgentState> {
        self.inner.lock().states.clone()
    }

    /// 原子地清空全部状态、邮箱与全局上下文
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.states.clear();
        inner.mailboxes.clear();
        inner.global_context.clear();
        tracing::info!("state manager reset");
    }
}
