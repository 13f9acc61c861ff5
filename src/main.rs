//! Colony - Rust 多智能体协作核心
//!
//! 入口：加载配置、初始化日志、构建协调者与专职 agent，然后执行子命令。

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use colony::agents::{AgentRegistry, SpecializedAgent};
use colony::config::load_config;
use colony::observability::{self, StateInspector};

#[derive(Parser)]
#[command(name = "colony")]
#[command(about = "Multi-agent coordination core", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// 额外的 TOML 配置文件（覆盖 config/default.toml）
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Default)]
enum Command {
    /// 输出全部 agent 定义（名称、模型、提示词、工具 schema）
    #[default]
    Definitions,
    /// 通过执行器走一遍委派流程，并输出状态快照差异与指标
    Demo,
    /// 输出健康检查报告
    Health,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config).context("Failed to load config")?;
    observability::init(&config.logging);
    tracing::info!(app = %config.app.name, "starting");

    let registry = AgentRegistry::new(config);
    let coordinator = registry.create_multi_agent_system();

    let output = match cli.command.unwrap_or_default() {
        Command::Definitions => {
            let definitions: Vec<Value> = registry
                .all_agents()
                .values()
                .map(|agent| serde_json::to_value(agent.definition()))
                .collect::<Result<_, _>>()?;
            json!({ "coordinator": coordinator.name(), "agents": definitions })
        }
        Command::Demo => run_demo(&registry).await?,
        Command::Health => serde_json::to_value(registry.health_checker().run_all_checks())?,
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn run_demo(registry: &AgentRegistry) -> anyhow::Result<Value> {
    let inspector = StateInspector::default();
    let state = registry.state();
    let research = &registry.config().agents.research_name;
    let before = inspector.capture(state, research, Vec::new());

    let coordinator = registry.executor_for(&registry.config().agents.coordinator_name)?;
    let delegated = coordinator
        .execute(
            "delegate_task",
            json!({
                "agent_name": research,
                "task": "Survey async runtimes",
                "context": "demo",
            }),
        )
        .await?;

    let research_exec = registry.executor_for(research)?;
    let outcomes = research_exec
        .execute_batch(vec![
            ("gather_information".to_string(), json!({"topic": "async runtimes"})),
            (
                "synthesize_research".to_string(),
                json!({"topic": "async runtimes", "key_points": "tokio, async-std"}),
            ),
        ])
        .await;
    let failures: Vec<String> = outcomes
        .iter()
        .filter_map(|r| r.as_ref().err().map(ToString::to_string))
        .collect();

    let after = inspector.capture(state, research, vec!["synthesize_research".to_string()]);
    let status = coordinator
        .execute("get_all_agents_status", json!({}))
        .await?;

    Ok(json!({
        "delegation": serde_json::from_str::<Value>(&delegated)?,
        "failures": failures,
        "research_diff": StateInspector::compare(&before, &after),
        "agents_status": serde_json::from_str::<Value>(&status)?,
        "metrics": registry.metrics().all(),
        "errors": registry.errors().metrics().total_errors,
        "communication": registry.communications().analyze_communication_patterns(),
    }))
}
