//! 容错集成测试：限流、超时、熔断、退避重试与兜底

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use colony::agents::AgentRegistry;
    use colony::config::AppConfig;
    use colony::observability::HealthStatus;
    use colony::core::{
        retry_with_backoff, AgentError, ErrorCategory, ErrorContext, ErrorRecoveryHandler,
        Fallback, LimiterKind, RateLimitConfig, RateLimiter, RetryConfig, SlidingWindowRateLimiter,
    };
    use colony::tools::{FunctionTool, ToolExecutor, ToolPipeline, ToolRegistry};
    use serde_json::json;

    fn fast_retry(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            exponential_base: 2.0,
            jitter: false,
        }
    }

    #[tokio::test]
    async fn test_token_bucket_waits_for_refill() {
        let limiter = RateLimiter::new(RateLimitConfig::per_second(20.0).with_burst(2)).unwrap();
        let started = Instant::now();
        for _ in 0..4 {
            limiter.acquire_async(1).await.unwrap();
        }
        // 2 个突发额度后，每个额外请求约 50ms
        assert!(started.elapsed() >= Duration::from_millis(80));
    }

    #[test]
    fn test_sliding_window_rejects_without_wait() {
        let limiter = SlidingWindowRateLimiter::new(
            RateLimitConfig::per_minute(2.0)
                .with_wait(false)
                .with_strategy(LimiterKind::SlidingWindow),
        )
        .unwrap();
        limiter.acquire().unwrap();
        limiter.acquire().unwrap();
        let err = limiter.acquire().unwrap_err();
        assert_eq!(err.category, ErrorCategory::RateLimit);
        assert!(err.retry_after.is_some());
    }

    #[tokio::test]
    async fn test_retry_recovers_transient_failure() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let out = retry_with_backoff(&fast_retry(3), "flaky", |_, _| {}, move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(AgentError::communication("blip", None, None))
            } else {
                Ok("ok")
            }
        })
        .await
        .unwrap();
        assert_eq!(out, "ok");
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_recover_uses_fallback_when_circuit_open() {
        let handler = ErrorRecoveryHandler::new(1, Duration::from_secs(60)).with_retry(fast_retry(2));
        handler.record_failure("svc.op");
        assert!(handler.is_circuit_open("svc.op"));

        let counter = AtomicU32::new(0);
        let calls = &counter;
        let err = AgentError::communication("down", None, None);
        let ctx = ErrorContext::for_operation("svc.op");
        let fallback: Fallback<&str> = Box::new(|| "cached");
        let out = handler
            .recover(
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, AgentError>("live")
                },
                &err,
                &ctx,
                Some(fallback),
            )
            .await;
        assert_eq!(out, Some("cached"));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_executor_circuit_opens_and_resets() {
        let mut registry = ToolRegistry::new();
        registry.register(FunctionTool::new("down", "always fails", |_: colony::tools::NoArgs| {
            Err::<serde_json::Value, _>(AgentError::communication("unreachable", None, None))
        }));
        let handler = Arc::new(ErrorRecoveryHandler::new(2, Duration::from_millis(50)));
        let exec = ToolExecutor::new("svc", registry).with_recovery(Arc::clone(&handler));

        for _ in 0..2 {
            exec.execute("down", json!({})).await.unwrap_err();
        }
        let err = exec.execute("down", json!({})).await.unwrap_err();
        assert_eq!(err.context["circuit_open"], true);
        assert_eq!(handler.history().len(), 2);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(!handler.is_circuit_open("svc.down"));
        assert_eq!(handler.failure_count("svc.down"), 0);
    }

    #[tokio::test]
    async fn test_pipeline_timeout_from_registry_config() {
        let mut config = AppConfig::default();
        config.tools.timeout_secs = 1;
        config.tools.rate_limit = Some(RateLimitConfig::per_second(100.0).with_burst(10));
        let registry = AgentRegistry::new(config);
        registry.create_multi_agent_system();

        let exec = registry.executor_for("research_agent").unwrap();
        assert!(exec
            .execute("get_current_knowledge", json!({"topic": "tides"}))
            .await
            .is_ok());

        let slow = ToolPipeline::new().with_timeout(Duration::from_millis(5));
        assert_eq!(slow.timeout(), Some(Duration::from_millis(5)));
    }

    #[tokio::test]
    async fn test_errors_feed_aggregator_and_health() {
        let mut config = AppConfig::default();
        config.tools.forbidden_patterns = vec![r"(?i)drop\s+table".to_string()];
        let registry = AgentRegistry::new(config);
        registry.create_multi_agent_system();

        let exec = registry.executor_for("research_agent").unwrap();
        let err = exec
            .execute("gather_information", json!({"topic": "DROP TABLE users"}))
            .await
            .unwrap_err();
        assert_eq!(err.category, ErrorCategory::Validation);

        let metrics = registry.errors().metrics();
        assert_eq!(metrics.total_errors, 1);
        assert_eq!(metrics.errors_by_agent["research_agent"], 1);
        assert_eq!(registry.errors().errors_by_category("validation").len(), 1);
        assert_eq!(
            registry.health_checker().run_check("errors").status,
            HealthStatus::Healthy
        );
    }
}
