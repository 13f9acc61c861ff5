//! 健康检查：按组件注册检查函数，汇总为 healthy / degraded / unhealthy

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// 单个组件的检查结果
#[derive(Clone, Debug, Serialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    pub message: Option<String>,
    pub last_check: DateTime<Utc>,
    pub metadata: Map<String, Value>,
}

impl ComponentHealth {
    pub fn new(name: impl Into<String>, status: HealthStatus) -> Self {
        Self {
            name: name.into(),
            status,
            message: None,
            last_check: Utc::now(),
            metadata: Map::new(),
        }
    }

    pub fn healthy(name: impl Into<String>) -> Self {
        Self::new(name, HealthStatus::Healthy)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct HealthCheckResult {
    pub overall_status: HealthStatus,
    pub components: Vec<ComponentHealth>,
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: f64,
}

type Check = Arc<dyn Fn() -> ComponentHealth + Send + Sync>;

pub struct HealthChecker {
    started: Instant,
    checks: RwLock<BTreeMap<String, Check>>,
    last_results: Mutex<BTreeMap<String, ComponentHealth>>,
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthChecker {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            checks: RwLock::new(BTreeMap::new()),
            last_results: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn register_check<F>(&self, component: &str, check: F)
    where
        F: Fn() -> ComponentHealth + Send + Sync + 'static,
    {
        self.checks.write().insert(component.to_string(), Arc::new(check));
    }

    /// 未注册的组件视为 unhealthy；检查函数 panic 也记为 unhealthy
    pub fn run_check(&self, component: &str) -> ComponentHealth {
        let Some(check) = self.checks.read().get(component).cloned() else {
            return ComponentHealth::new(component, HealthStatus::Unhealthy)
                .with_message(format!("No health check registered for {component}"));
        };

        let result = match catch_unwind(AssertUnwindSafe(|| check())) {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(component = %component, "health check panicked");
                ComponentHealth::new(component, HealthStatus::Unhealthy)
                    .with_message("Health check failed: panic")
            }
        };
        self.last_results
            .lock()
            .insert(component.to_string(), result.clone());
        result
    }

    pub fn run_all_checks(&self) -> HealthCheckResult {
        let names: Vec<String> = self.checks.read().keys().cloned().collect();
        let components: Vec<ComponentHealth> = names.iter().map(|n| self.run_check(n)).collect();

        let overall_status = if components.iter().all(|c| c.status == HealthStatus::Healthy) {
            HealthStatus::Healthy
        } else if components.iter().any(|c| c.status == HealthStatus::Unhealthy) {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Degraded
        };

        HealthCheckResult {
            overall_status,
            components,
            timestamp: Utc::now(),
            uptime_seconds: self.started.elapsed().as_secs_f64(),
        }
    }

    pub fn last_results(&self) -> BTreeMap<String, ComponentHealth> {
        self.last_results.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_component_is_unhealthy() {
        let checker = HealthChecker::new();
        let result = checker.run_check("db");
        assert_eq!(result.status, HealthStatus::Unhealthy);
        assert!(result.message.unwrap().contains("db"));
    }

    #[test]
    fn test_overall_status_aggregation() {
        let checker = HealthChecker::new();
        assert_eq!(checker.run_all_checks().overall_status, HealthStatus::Healthy);

        checker.register_check("a", || ComponentHealth::healthy("a"));
        checker.register_check("b", || ComponentHealth::new("b", HealthStatus::Degraded));
        assert_eq!(checker.run_all_checks().overall_status, HealthStatus::Degraded);

        checker.register_check("c", || panic!("boom"));
        let result = checker.run_all_checks();
        assert_eq!(result.overall_status, HealthStatus::Unhealthy);
        assert_eq!(result.components.len(), 3);
        assert!(result.uptime_seconds >= 0.0);
        assert_eq!(checker.last_results()["c"].status, HealthStatus::Unhealthy);
    }
}
