//! 状态检查器：保存 agent 状态快照并对比两次快照的差异

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::core::{AgentState, AgentStatus, StateManager};

#[derive(Clone, Debug, Serialize)]
pub struct AgentStateSnapshot {
    pub agent_name: String,
    pub timestamp: DateTime<Utc>,
    pub state: AgentState,
    pub active_operations: Vec<String>,
}

/// 两次快照间的差异
#[derive(Clone, Debug, Serialize)]
pub struct SnapshotDiff {
    pub time_diff_seconds: f64,
    pub status_change: Option<(AgentStatus, AgentStatus)>,
    pub results_added: i64,
    pub state_changes: Map<String, Value>,
}

pub struct StateInspector {
    max_snapshots: usize,
    snapshots: Mutex<HashMap<String, VecDeque<AgentStateSnapshot>>>,
}

impl Default for StateInspector {
    fn default() -> Self {
        Self::new(100)
    }
}

impl StateInspector {
    pub fn new(max_snapshots: usize) -> Self {
        Self {
            max_snapshots: max_snapshots.max(1),
            snapshots: Mutex::new(HashMap::new()),
        }
    }

    pub fn capture(
        &self,
        state: &StateManager,
        agent_name: &str,
        active_operations: Vec<String>,
    ) -> AgentStateSnapshot {
        let snapshot = AgentStateSnapshot {
            agent_name: agent_name.to_string(),
            timestamp: Utc::now(),
            state: state.agent_state(agent_name),
            active_operations,
        };
        let mut all = self.snapshots.lock();
        let ring = all.entry(agent_name.to_string()).or_default();
        ring.push_back(snapshot.clone());
        while ring.len() > self.max_snapshots {
            ring.pop_front();
        }
        snapshot
    }

    /// 按时间顺序返回；limit 取最近的若干个
    pub fn snapshots(&self, agent_name: &str, limit: Option<usize>) -> Vec<AgentStateSnapshot> {
        let all = self.snapshots.lock();
        let Some(ring) = all.get(agent_name) else {
            return Vec::new();
        };
        let skip = limit.map_or(0, |n| ring.len().saturating_sub(n));
        ring.iter().skip(skip).cloned().collect()
    }

    pub fn latest(&self, agent_name: &str) -> Option<AgentStateSnapshot> {
        self.snapshots
            .lock()
            .get(agent_name)
            .and_then(|ring| ring.back().cloned())
    }

    pub fn compare(before: &AgentStateSnapshot, after: &AgentStateSnapshot) -> SnapshotDiff {
        let status_change = (before.state.status != after.state.status)
            .then_some((before.state.status, after.state.status));
        SnapshotDiff {
            time_diff_seconds: (after.timestamp - before.timestamp)
                .to_std()
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0),
            status_change,
            results_added: after.state.results.len() as i64 - before.state.results.len() as i64,
            state_changes: diff_maps(&before.state.data, &after.state.data),
        }
    }
}

fn diff_maps(before: &Map<String, Value>, after: &Map<String, Value>) -> Map<String, Value> {
    let mut changes = Map::new();
    for (key, new_value) in after {
        match before.get(key) {
            None => {
                changes.insert(key.clone(), json!({"status": "added", "new_value": new_value}));
            }
            Some(old_value) if old_value != new_value => {
                changes.insert(
                    key.clone(),
                    json!({"status": "modified", "old_value": old_value, "new_value": new_value}),
                );
            }
            Some(_) => {}
        }
    }
    for (key, old_value) in before {
        if !after.contains_key(key) {
            changes.insert(key.clone(), json!({"status": "removed", "old_value": old_value}));
        }
    }
    changes
}
