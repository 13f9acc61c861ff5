//! agent 间通信日志：记录委派、工具调用等消息及其响应，用于排查协作问题
//!
//! 日志条数有上限，超出后丢弃最旧的条目。

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::core::AgentError;

/// 最多返回的活跃 agent 对数
const TOP_PAIRS: usize = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Request,
    Response,
    Event,
    Error,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Response => "response",
            Self::Event => "event",
            Self::Error => "error",
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct CommunicationLog {
    pub log_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub message_type: MessageKind,
    pub source_agent: String,
    pub target_agent: Option<String>,
    pub operation: String,
    pub payload: Map<String, Value>,
    pub response: Option<Value>,
    pub duration_ms: Option<f64>,
    pub success: bool,
    pub error_message: Option<String>,
}

/// get_logs 的过滤条件；None 表示不过滤。limit 取最近的 N 条
#[derive(Clone, Debug, Default)]
pub struct LogFilter {
    pub source_agent: Option<String>,
    pub target_agent: Option<String>,
    pub message_type: Option<MessageKind>,
    pub limit: Option<usize>,
}

impl LogFilter {
    pub fn from_agent(agent: impl Into<String>) -> Self {
        Self {
            source_agent: Some(agent.into()),
            ..Self::default()
        }
    }

    pub fn to_agent(agent: impl Into<String>) -> Self {
        Self {
            target_agent: Some(agent.into()),
            ..Self::default()
        }
    }

    pub fn of_kind(mut self, kind: MessageKind) -> Self {
        self.message_type = Some(kind);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn matches(&self, log: &CommunicationLog) -> bool {
        self.source_agent
            .as_deref()
            .map_or(true, |s| log.source_agent == s)
            && self
                .target_agent
                .as_deref()
                .map_or(true, |t| log.target_agent.as_deref() == Some(t))
            && self.message_type.map_or(true, |k| log.message_type == k)
    }
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct AgentPairCount {
    pub pair: String,
    pub count: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct CommunicationAnalysis {
    pub total_messages: u64,
    pub successful_messages: u64,
    pub failed_messages: u64,
    pub success_rate: f64,
    pub average_duration_ms: f64,
    pub messages_by_type: BTreeMap<String, u64>,
    /// 按次数降序，同数按名称排序
    pub most_active_agent_pairs: Vec<AgentPairCount>,
}

pub struct CommunicationLogger {
    max_logs: usize,
    logs: Mutex<VecDeque<CommunicationLog>>,
}

impl Default for CommunicationLogger {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl CommunicationLogger {
    pub fn new(max_logs: usize) -> Self {
        Self {
            max_logs: max_logs.max(1),
            logs: Mutex::new(VecDeque::new()),
        }
    }

    /// 追加一条消息，返回其 log_id，供 update_response 回填结果
    pub fn log_message(
        &self,
        message_type: MessageKind,
        source_agent: &str,
        operation: &str,
        target_agent: Option<&str>,
        payload: Map<String, Value>,
    ) -> Uuid {
        let entry = CommunicationLog {
            log_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            message_type,
            source_agent: source_agent.to_string(),
            target_agent: target_agent.map(str::to_string),
            operation: operation.to_string(),
            payload,
            response: None,
            duration_ms: None,
            success: true,
            error_message: None,
        };
        let id = entry.log_id;
        let mut logs = self.logs.lock();
        logs.push_back(entry);
        while logs.len() > self.max_logs {
            logs.pop_front();
        }
        id
    }

    /// 回填响应；条目已被淘汰时返回 false
    pub fn update_response(
        &self,
        log_id: Uuid,
        response: Option<Value>,
        duration: Option<Duration>,
        success: bool,
        error_message: Option<String>,
    ) -> bool {
        let mut logs = self.logs.lock();
        let Some(log) = logs.iter_mut().rev().find(|l| l.log_id == log_id) else {
            return false;
        };
        log.response = response;
        log.duration_ms = duration.map(|d| d.as_secs_f64() * 1000.0);
        log.success = success;
        log.error_message = error_message;
        true
    }

    pub fn get_logs(&self, filter: &LogFilter) -> Vec<CommunicationLog> {
        let logs = self.logs.lock();
        let matched: Vec<CommunicationLog> =
            logs.iter().filter(|l| filter.matches(l)).cloned().collect();
        match filter.limit {
            Some(limit) if limit < matched.len() => matched[matched.len() - limit..].to_vec(),
            _ => matched,
        }
    }

    pub fn len(&self) -> usize {
        self.logs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.logs.lock().is_empty()
    }

    pub fn clear(&self) {
        self.logs.lock().clear();
    }

    /// 没有任何日志时返回 None
    pub fn analyze_communication_patterns(&self) -> Option<CommunicationAnalysis> {
        let logs = self.logs.lock();
        if logs.is_empty() {
            return None;
        }

        let total = logs.len() as u64;
        let successful = logs.iter().filter(|l| l.success).count() as u64;
        let durations: Vec<f64> = logs.iter().filter_map(|l| l.duration_ms).collect();
        let average_duration_ms = if durations.is_empty() {
            0.0
        } else {
            durations.iter().sum::<f64>() / durations.len() as f64
        };

        let mut by_type = BTreeMap::new();
        let mut pairs: HashMap<String, u64> = HashMap::new();
        for log in logs.iter() {
            *by_type.entry(log.message_type.as_str().to_string()).or_default() += 1;
            if let Some(target) = &log.target_agent {
                *pairs
                    .entry(format!("{} -> {}", log.source_agent, target))
                    .or_default() += 1;
            }
        }
        let mut pairs: Vec<AgentPairCount> = pairs
            .into_iter()
            .map(|(pair, count)| AgentPairCount { pair, count })
            .collect();
        pairs.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.pair.cmp(&b.pair)));
        pairs.truncate(TOP_PAIRS);

        Some(CommunicationAnalysis {
            total_messages: total,
            successful_messages: successful,
            failed_messages: total - successful,
            success_rate: successful as f64 / total as f64,
            average_duration_ms,
            messages_by_type: by_type,
            most_active_agent_pairs: pairs,
        })
    }

    pub fn export_json(&self) -> Result<String, AgentError> {
        let logs: Vec<CommunicationLog> = self.logs.lock().iter().cloned().collect();
        Ok(serde_json::to_string_pretty(&logs)?)
    }

    /// 以 JSON 数组写入文件，返回导出的条数
    pub fn export_logs(&self, path: &Path) -> Result<usize, AgentError> {
        let logs: Vec<CommunicationLog> = self.logs.lock().iter().cloned().collect();
        let body = serde_json::to_string_pretty(&logs)?;
        std::fs::write(path, body).map_err(|e| {
            AgentError::resource(
                format!("Failed to export communication logs to {}: {e}", path.display()),
                "file",
                None,
                None,
            )
        })?;
        tracing::info!(count = logs.len(), path = %path.display(), "communication logs exported");
        Ok(logs.len())
    }
}
