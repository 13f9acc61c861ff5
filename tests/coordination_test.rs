//! 多 agent 协作集成测试：注册表 → 执行器 → 协调者委派 → 专职 agent 结果汇总

#[cfg(test)]
mod tests {
    use colony::agents::{AgentKind, AgentRegistry, SpecializedAgent};
    use colony::config::AppConfig;
    use colony::core::{AgentStatus, ErrorCategory};
    use colony::observability::{HealthStatus, StateInspector};
    use serde_json::{json, Value};

    fn parse(raw: &str) -> Value {
        serde_json::from_str(raw).unwrap()
    }

    #[tokio::test]
    async fn test_delegate_then_collect_results() {
        let registry = AgentRegistry::new(AppConfig::default());
        let coordinator = registry.create_multi_agent_system();
        coordinator.orchestrate("Compare async runtimes", None);

        let coord_exec = registry.executor_for("coordinator").unwrap();
        let delegated = parse(
            &coord_exec
                .execute(
                    "delegate_task",
                    json!({"agent_name": "research_agent", "task": "survey runtimes"}),
                )
                .await
                .unwrap(),
        );
        assert_eq!(delegated["status"], "delegated");
        assert_eq!(
            registry.state().agent_state("research_agent").status,
            AgentStatus::Working
        );
        let inbox = registry.state().get_messages("research_agent", true);
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].from_agent, "coordinator");
        assert_eq!(inbox[0].content["type"], "task_delegation");

        let research_exec = registry.executor_for("research_agent").unwrap();
        research_exec
            .execute("web_search", json!({"query": "tokio vs smol", "num_results": 2}))
            .await
            .unwrap();

        let synthesis = parse(
            &coord_exec
                .execute(
                    "synthesize_results",
                    json!({"agent_names": "research_agent, ghost", "synthesis_prompt": "summarize"}),
                )
                .await
                .unwrap(),
        );
        let results = synthesis["agent_results"].as_object().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results["research_agent"][0]["type"], "search");
        assert_eq!(
            registry.state().get_global_context("user_query"),
            Some(json!("Compare async runtimes"))
        );
    }

    #[tokio::test]
    async fn test_unknown_agent_is_soft_failure() {
        let registry = AgentRegistry::new(AppConfig::default());
        registry.create_multi_agent_system();
        let exec = registry.executor_for("coordinator").unwrap();

        let out = parse(
            &exec
                .execute("get_agent_status", json!({"agent_name": "ghost"}))
                .await
                .unwrap(),
        );
        assert_eq!(out["error"], "Agent 'ghost' not found");
        assert_eq!(registry.errors().metrics().total_errors, 0);
    }

    #[tokio::test]
    async fn test_specialized_soft_failures_pass_through_executor() {
        let registry = AgentRegistry::new(AppConfig::default());
        registry.create_multi_agent_system();

        let code = registry.executor_for("code_generation_agent").unwrap();
        let out = parse(
            &code
                .execute("generate_code", json!({"language": "cobol", "description": "payroll"}))
                .await
                .unwrap(),
        );
        assert!(out["error"].as_str().unwrap().contains("not supported"));

        let data = registry.executor_for("data_analysis_agent").unwrap();
        let out = parse(
            &data
                .execute(
                    "analyze_dataset",
                    json!({"data_description": "sales", "format": "xml"}),
                )
                .await
                .unwrap(),
        );
        assert!(out["error"].is_string());
        assert!(registry
            .state()
            .agent_state("data_analysis_agent")
            .results
            .is_empty());
    }

    #[tokio::test]
    async fn test_batch_and_inspector_diff() {
        let registry = AgentRegistry::new(AppConfig::default());
        registry.create_multi_agent_system();
        let inspector = StateInspector::default();
        let before = inspector.capture(registry.state(), "data_analysis_agent", Vec::new());

        let exec = registry.executor_for("data_analysis_agent").unwrap();
        let results = exec
            .execute_batch(vec![
                ("identify_patterns".to_string(), json!({"data_description": "clicks"})),
                ("clean_data".to_string(), json!({"data_description": "clicks"})),
                ("no_such_tool".to_string(), json!({})),
            ])
            .await;
        assert!(results[0].is_ok());
        assert!(results[1].is_ok());
        assert_eq!(
            results[2].as_ref().unwrap_err().category,
            ErrorCategory::ToolExecution
        );

        let after = inspector.capture(registry.state(), "data_analysis_agent", Vec::new());
        let diff = StateInspector::compare(&before, &after);
        assert_eq!(diff.results_added, 2);
        assert_eq!(inspector.snapshots("data_analysis_agent", None).len(), 2);

        let metrics = registry.metrics().get("data_analysis_agent.identify_patterns").unwrap();
        assert_eq!(metrics.call_count, 1);
    }

    #[test]
    fn test_definitions_for_every_kind() {
        let registry = AgentRegistry::new(AppConfig::default());
        for kind in AgentKind::ALL {
            let agent = registry.create_agent(kind);
            let def = agent.definition();
            assert!(!def.instruction.is_empty());
            assert!(!def.tools.is_empty());
            assert_eq!(def.max_iterations, 10);
        }
        assert_eq!(
            registry.health_checker().run_all_checks().overall_status,
            HealthStatus::Healthy
        );
    }

    #[test]
    fn test_configured_names_flow_through() {
        let mut config = AppConfig::default();
        config.agents.research_name = "scout".to_string();
        let registry = AgentRegistry::new(config);
        let coordinator = registry.create_multi_agent_system();
        assert!(coordinator.is_available("scout"));
        assert!(registry.get_agent("scout").is_some());
        assert!(registry.get_agent("research_agent").is_none());
    }
}
