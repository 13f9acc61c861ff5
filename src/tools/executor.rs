//! 工具执行器
//!
//! 持有某个 agent 的 ToolRegistry 与调用管线。execute(tool_name, args) 依次：查找工具 → 检查熔断 →
//! 走管线（校验、限流、超时）→ 输出 JSON 审计日志 → 记录指标；失败时把错误交给恢复处理器与错误聚合器。
//! 熔断以 `agent.tool` 为操作名。每次调用都在一个 `tool` span 内执行，span 上记录 outcome 与 duration_ms。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{field, Instrument, Span};
use uuid::Uuid;

use crate::core::{AgentError, ErrorContext, ErrorRecoveryHandler, RecoveryStrategy};
use crate::observability::{CommunicationLogger, ErrorAggregator, MessageKind, MetricsCollector};
use crate::tools::{ToolPipeline, ToolRegistry};

/// 工具执行器：管线 + 熔断 + 审计 + 指标
pub struct ToolExecutor {
    agent_name: String,
    registry: ToolRegistry,
    pipeline: ToolPipeline,
    overrides: HashMap<String, ToolPipeline>,
    recovery: Arc<ErrorRecoveryHandler>,
    metrics: Arc<MetricsCollector>,
    errors: Arc<ErrorAggregator>,
    comms: Option<Arc<CommunicationLogger>>,
    parallel: bool,
    detailed_audit: bool,
}

impl ToolExecutor {
    pub fn new(agent_name: impl Into<String>, registry: ToolRegistry) -> Self {
        Self {
            agent_name: agent_name.into(),
            registry,
            pipeline: ToolPipeline::new(),
            overrides: HashMap::new(),
            recovery: Arc::new(ErrorRecoveryHandler::default()),
            metrics: Arc::new(MetricsCollector::default()),
            errors: Arc::new(ErrorAggregator::default()),
            comms: None,
            parallel: true,
            detailed_audit: true,
        }
    }

    /// 所有工具共用的默认管线
    pub fn with_pipeline(mut self, pipeline: ToolPipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// 为单个工具指定管线，覆盖默认管线
    pub fn with_tool_pipeline(mut self, tool_name: &str, pipeline: ToolPipeline) -> Self {
        self.overrides.insert(tool_name.to_string(), pipeline);
        self
    }

    pub fn with_recovery(mut self, recovery: Arc<ErrorRecoveryHandler>) -> Self {
        self.recovery = recovery;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_error_aggregator(mut self, errors: Arc<ErrorAggregator>) -> Self {
        self.errors = errors;
        self
    }

    /// 每次调用写入一条通信日志并回填结果
    pub fn with_communication_log(mut self, comms: Arc<CommunicationLogger>) -> Self {
        self.comms = Some(comms);
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// 为 false 时审计日志不带参数预览
    pub fn with_detailed_audit(mut self, detailed: bool) -> Self {
        self.detailed_audit = detailed;
        self
    }

    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    pub fn get_tool(&self, name: &str) -> Option<Arc<dyn crate::tools::Tool>> {
        self.registry.get(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn recovery(&self) -> &Arc<ErrorRecoveryHandler> {
        &self.recovery
    }

    /// 熔断使用的操作名
    pub fn operation_name(&self, tool_name: &str) -> String {
        format!("{}.{}", self.agent_name, tool_name)
    }

    /// 执行指定工具
    pub async fn execute(&self, tool_name: &str, args: Value) -> Result<String, AgentError> {
        let span = self.call_span(tool_name);
        async move {
            let start = Instant::now();
            let call = self.begin(tool_name, &args);
            let result = self.run(tool_name, args).await;
            self.finish(tool_name, start, call, result, false)
        }
        .instrument(span)
        .await
    }

    /// 与 execute 相同，但 token 取消时立即放弃调用；取消不计入熔断
    pub async fn execute_cancellable(
        &self,
        tool_name: &str,
        args: Value,
        token: &CancellationToken,
    ) -> Result<String, AgentError> {
        let span = self.call_span(tool_name);
        async move {
            let start = Instant::now();
            let call = self.begin(tool_name, &args);
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    let elapsed = start.elapsed();
                    let err = AgentError::timeout(
                        format!("Tool call {tool_name} cancelled"),
                        elapsed,
                        Some(tool_name),
                    )
                    .with_recoverable(false)
                    .with_context("cancelled", true)
                    .with_agent(self.agent_name.clone());
                    self.finish(tool_name, start, call, Err(err), true)
                }
                result = self.run(tool_name, args) => self.finish(tool_name, start, call, result, false),
            }
        }
        .instrument(span)
        .await
    }

    /// 批量执行；按配置并发或顺序，结果与输入顺序一致
    pub async fn execute_batch(&self, calls: Vec<(String, Value)>) -> Vec<Result<String, AgentError>> {
        if self.parallel {
            join_all(
                calls
                    .into_iter()
                    .map(|(name, args)| async move { self.execute(&name, args).await }),
            )
            .await
        } else {
            let mut results = Vec::with_capacity(calls.len());
            for (name, args) in calls {
                results.push(self.execute(&name, args).await);
            }
            results
        }
    }

    async fn run(&self, tool_name: &str, args: Value) -> Result<String, AgentError> {
        let tool = self.registry.get(tool_name).ok_or_else(|| {
            AgentError::tool_execution(format!("Unknown tool: {tool_name}"), tool_name, None)
                .with_recoverable(false)
        })?;

        let operation = self.operation_name(tool_name);
        if self.recovery.is_circuit_open(&operation) {
            return Err(AgentError::tool_execution(
                format!("Circuit breaker open for {operation}"),
                tool_name,
                None,
            )
            .with_context("circuit_open", true));
        }

        let pipeline = self.overrides.get(tool_name).unwrap_or(&self.pipeline);
        pipeline.run(tool.as_ref(), args).await
    }

    fn call_span(&self, tool_name: &str) -> Span {
        tracing::info_span!(
            "tool",
            agent = %self.agent_name,
            tool = %tool_name,
            operation = %self.operation_name(tool_name),
            outcome = field::Empty,
            duration_ms = field::Empty,
        )
    }

    fn begin(&self, tool_name: &str, args: &Value) -> CallRecord {
        let log_id = self.comms.as_ref().map(|comms| {
            let mut payload = serde_json::Map::new();
            payload.insert("args".to_string(), args.clone());
            comms.log_message(MessageKind::Request, &self.agent_name, tool_name, None, payload)
        });
        CallRecord {
            preview: self.detailed_audit.then(|| args_preview(args)),
            log_id,
        }
    }

    fn finish(
        &self,
        tool_name: &str,
        start: Instant,
        call: CallRecord,
        result: Result<String, AgentError>,
        cancelled: bool,
    ) -> Result<String, AgentError> {
        let duration = start.elapsed();
        let operation = self.operation_name(tool_name);
        let circuit_open = matches!(&result, Err(e) if e.context.contains_key("circuit_open"));
        let outcome = match &result {
            Ok(_) => "ok",
            Err(_) if cancelled => "cancelled",
            Err(_) if circuit_open => "circuit_open",
            Err(e) => e.category.as_str(),
        };
        let span = Span::current();
        span.record("outcome", outcome);
        span.record("duration_ms", duration.as_millis() as u64);
        audit(&self.agent_name, tool_name, &result, outcome, duration, call.preview);
        self.metrics.record_call(&operation, duration, result.is_err());
        if let (Some(comms), Some(id)) = (&self.comms, call.log_id) {
            let (response, error) = match &result {
                Ok(output) => (
                    Some(serde_json::from_str(output).unwrap_or_else(|_| Value::String(output.clone()))),
                    None,
                ),
                Err(e) => (None, Some(e.message.clone())),
            };
            comms.update_response(id, response, Some(duration), result.is_ok(), error);
        }

        match result {
            Ok(output) => {
                self.recovery.record_success(&operation);
                Ok(output)
            }
            Err(err) => {
                let err = if err.agent_name.is_none() {
                    err.with_agent(self.agent_name.clone())
                } else {
                    err
                };
                if !cancelled && !circuit_open {
                    // 只有工具执行、超时、通信错误计入熔断
                    let strategy = RecoveryStrategy::suggest(&err);
                    let context = ErrorContext::for_operation(operation.clone())
                        .with_agent(self.agent_name.clone())
                        .with_metadata("tool", tool_name);
                    let record = self.recovery.handle_error(&err, context, strategy);
                    self.errors.record_error(&record);
                }
                Err(err)
            }
        }
    }
}

/// 单次调用在开始时确定的审计信息
struct CallRecord {
    preview: Option<String>,
    log_id: Option<Uuid>,
}

fn audit(
    agent: &str,
    tool: &str,
    result: &Result<String, AgentError>,
    outcome: &str,
    duration: Duration,
    preview: Option<String>,
) {
    let audit = serde_json::json!({
        "event": "tool_audit",
        "agent": agent,
        "tool": tool,
        "ok": result.is_ok(),
        "outcome": outcome,
        "duration_ms": duration.as_millis() as u64,
        "args_preview": preview,
    });
    tracing::info!(audit = %audit.to_string(), "tool");
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ErrorCategory, RateLimitConfig};
    use crate::observability::LogFilter;
    use crate::tools::{FunctionTool, Tool};
    use async_trait::async_trait;
    use serde::Deserialize;
    use serde_json::json;
    use tracing::span::{Attributes, Id, Record};
    use tracing_subscriber::layer::{Context, Layer};
    use tracing_subscriber::prelude::*;

    /// 收集 tool span 上的字段
    #[derive(Clone, Default)]
    struct SpanFields(Arc<parking_lot::Mutex<Vec<(String, String)>>>);

    struct Collect<'a>(&'a mut Vec<(String, String)>);

    impl field::Visit for Collect<'_> {
        fn record_str(&mut self, f: &field::Field, value: &str) {
            self.0.push((f.name().to_string(), value.to_string()));
        }

        fn record_debug(&mut self, f: &field::Field, value: &dyn std::fmt::Debug) {
            self.0.push((f.name().to_string(), format!("{value:?}")));
        }
    }

    impl<S: tracing::Subscriber> Layer<S> for SpanFields {
        fn on_new_span(&self, attrs: &Attributes<'_>, _id: &Id, _ctx: Context<'_, S>) {
            if attrs.metadata().name() == "tool" {
                attrs.record(&mut Collect(&mut self.0.lock()));
            }
        }

        fn on_record(&self, _id: &Id, values: &Record<'_>, _ctx: Context<'_, S>) {
            values.record(&mut Collect(&mut self.0.lock()));
        }
    }

    impl SpanFields {
        fn has(&self, name: &str, value: &str) -> bool {
            self.0.lock().iter().any(|(n, v)| n == name && v == value)
        }
    }

    #[derive(Deserialize, schemars::JsonSchema)]
    struct FailArgs {
        fail: bool,
    }

    struct Sleepy;

    #[async_trait]
    impl Tool for Sleepy {
        fn name(&self) -> &str {
            "sleepy"
        }

        fn description(&self) -> &str {
            "sleeps"
        }

        async fn execute(&self, _args: Value) -> Result<String, AgentError> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok("done".to_string())
        }
    }

    fn executor(threshold: u32) -> ToolExecutor {
        let mut registry = ToolRegistry::new();
        registry.register(FunctionTool::new("flaky", "fails on demand", |a: FailArgs| {
            if a.fail {
                Err(AgentError::tool_execution("boom", "flaky", None))
            } else {
                Ok(json!({"ok": true}))
            }
        }));
        registry.register(Sleepy);
        ToolExecutor::new("tester", registry).with_recovery(Arc::new(ErrorRecoveryHandler::new(
            threshold,
            Duration::from_secs(60),
        )))
    }

    #[tokio::test]
    async fn test_success_records_metrics() {
        let exec = executor(3);
        let out = exec.execute("flaky", json!({"fail": false})).await.unwrap();
        assert!(out.contains("\"ok\": true"));
        let m = exec.metrics().get("tester.flaky").unwrap();
        assert_eq!(m.call_count, 1);
        assert_eq!(m.error_count, 0);
    }

    #[tokio::test]
    async fn test_failures_open_circuit() {
        let exec = executor(2);
        for _ in 0..2 {
            let err = exec.execute("flaky", json!({"fail": true})).await.unwrap_err();
            assert_eq!(err.agent_name.as_deref(), Some("tester"));
        }
        assert!(exec.recovery().is_circuit_open("tester.flaky"));

        let err = exec.execute("flaky", json!({"fail": false})).await.unwrap_err();
        assert!(err.message.contains("Circuit breaker open"));
        assert_eq!(exec.recovery().history().len(), 2);
    }

    #[tokio::test]
    async fn test_validation_errors_escalate_without_tripping_circuit() {
        let exec = executor(1);
        let err = exec.execute("flaky", json!({"fail": "nope"})).await.unwrap_err();
        assert_eq!(err.category, ErrorCategory::Validation);
        assert!(!exec.recovery().is_circuit_open("tester.flaky"));
        let history = exec.recovery().history();
        assert_eq!(history[0].recovery_strategy, RecoveryStrategy::Escalate);
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let exec = executor(3);
        let err = exec.execute("missing", json!({})).await.unwrap_err();
        assert_eq!(err.category, ErrorCategory::ToolExecution);
        assert!(!err.recoverable);
    }

    #[tokio::test]
    async fn test_cancellation_wins_over_slow_tool() {
        let exec = executor(1);
        let token = CancellationToken::new();
        let child = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            child.cancel();
        });
        let started = Instant::now();
        let err = exec
            .execute_cancellable("sleepy", json!({}), &token)
            .await
            .unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(err.context["cancelled"], true);
        assert_eq!(exec.recovery().failure_count("tester.sleepy"), 0);
    }

    #[tokio::test]
    async fn test_tool_specific_timeout() {
        let exec = executor(5)
            .with_tool_pipeline("sleepy", ToolPipeline::new().with_timeout(Duration::from_millis(10)));
        let err = exec.execute("sleepy", json!({})).await.unwrap_err();
        assert_eq!(err.category, ErrorCategory::Timeout);
        assert_eq!(exec.recovery().failure_count("tester.sleepy"), 1);
    }

    #[tokio::test]
    async fn test_batch_keeps_order() {
        for parallel in [true, false] {
            let exec = executor(10).with_parallel(parallel);
            let results = exec
                .execute_batch(vec![
                    ("flaky".to_string(), json!({"fail": false})),
                    ("flaky".to_string(), json!({"fail": true})),
                    ("missing".to_string(), json!({})),
                ])
                .await;
            assert!(results[0].is_ok());
            assert_eq!(results[1].as_ref().unwrap_err().message, "boom");
            assert!(results[2].is_err());
        }
    }

    #[tokio::test]
    async fn test_rate_limit_rejections_do_not_open_circuit() {
        let limited = ToolPipeline::new()
            .with_rate_limit(RateLimitConfig::per_second(2.0).with_burst(2).with_wait(false))
            .unwrap();
        let exec = executor(1).with_pipeline(limited);

        for i in 0..6 {
            let result = exec.execute("flaky", json!({"fail": false})).await;
            if i < 2 {
                assert!(result.is_ok());
            } else {
                assert_eq!(result.unwrap_err().category, ErrorCategory::RateLimit);
            }
        }
        assert!(!exec.recovery().is_circuit_open("tester.flaky"));
        assert_eq!(exec.recovery().failure_count("tester.flaky"), 0);
        assert!(exec
            .recovery()
            .history()
            .iter()
            .all(|r| r.recovery_strategy == RecoveryStrategy::Retry));

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(exec.execute("flaky", json!({"fail": false})).await.is_ok());
    }

    #[tokio::test]
    async fn test_calls_are_written_to_communication_log() {
        let comms = Arc::new(CommunicationLogger::default());
        let exec = executor(5).with_communication_log(Arc::clone(&comms));
        exec.execute("flaky", json!({"fail": false})).await.unwrap();
        exec.execute("flaky", json!({"fail": true})).await.unwrap_err();

        let logs = comms.get_logs(&LogFilter::from_agent("tester"));
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].operation, "flaky");
        assert_eq!(logs[0].payload["args"]["fail"], false);
        assert_eq!(logs[0].response.as_ref().unwrap()["ok"], true);
        assert!(logs[0].duration_ms.is_some());
        assert!(!logs[1].success);
        assert_eq!(logs[1].error_message.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_call_runs_inside_tool_span() {
        let fields = SpanFields::default();
        let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(fields.clone()));

        let exec = executor(5);
        exec.execute("flaky", json!({"fail": true})).await.unwrap_err();

        assert!(fields.has("agent", "tester"));
        assert!(fields.has("tool", "flaky"));
        assert!(fields.has("operation", "tester.flaky"));
        assert!(fields.has("outcome", "tool_execution"));
        assert!(fields.0.lock().iter().any(|(n, _)| n == "duration_ms"));
    }
}
