//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `COLONY__*` 覆盖（双下划线表示嵌套，如 `COLONY__LOGGING__LEVEL=debug`）。
//! 每个段都有完整默认值，缺省的段按默认值反序列化。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::{RateLimitConfig, RetryConfig};
use crate::tools::validation::{OutputConstraints, ToolInputConstraints};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub logging: LoggingSection,
    pub models: ModelsSection,
    pub agents: AgentsSection,
    pub research: ResearchSection,
    pub code_generation: CodeGenerationSection,
    pub data_analysis: DataAnalysisSection,
    pub resilience: ResilienceSection,
    pub tools: ToolsSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "colony".to_string(),
        }
    }
}

/// 日志输出格式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// [logging] 段：级别（RUST_LOG 优先）、格式、是否输出工具参数预览
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
    pub format: LogFormat,
    pub detailed: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            detailed: true,
        }
    }
}

fn default_model() -> String {
    "gemini-2.0-flash".to_string()
}

/// [models] 段：各 agent 使用的模型名（交给托管运行时）；未单独配置的 agent 使用 default
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelsSection {
    pub default: String,
    pub coordinator: Option<String>,
    pub research: Option<String>,
    pub code_generation: Option<String>,
    pub data_analysis: Option<String>,
}

impl Default for ModelsSection {
    fn default() -> Self {
        Self {
            default: default_model(),
            coordinator: None,
            research: None,
            code_generation: None,
            data_analysis: None,
        }
    }
}

impl ModelsSection {
    fn or_default<'a>(&'a self, specific: &'a Option<String>) -> &'a str {
        specific.as_deref().unwrap_or(&self.default)
    }

    pub fn coordinator(&self) -> &str {
        self.or_default(&self.coordinator)
    }

    pub fn research(&self) -> &str {
        self.or_default(&self.research)
    }

    pub fn code_generation(&self) -> &str {
        self.or_default(&self.code_generation)
    }

    pub fn data_analysis(&self) -> &str {
        self.or_default(&self.data_analysis)
    }
}

/// [agents] 段：agent 名称与行为开关
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentsSection {
    pub max_iterations: u32,
    pub timeout_secs: u64,
    /// 批量工具调用是否并发执行
    pub enable_parallel_execution: bool,
    pub coordinator_name: String,
    pub research_name: String,
    pub code_generation_name: String,
    pub data_analysis_name: String,
    pub enable_inter_agent_messages: bool,
}

impl Default for AgentsSection {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            timeout_secs: 300,
            enable_parallel_execution: true,
            coordinator_name: "coordinator".to_string(),
            research_name: "research_agent".to_string(),
            code_generation_name: "code_generation_agent".to_string(),
            data_analysis_name: "data_analysis_agent".to_string(),
            enable_inter_agent_messages: true,
        }
    }
}

/// [research] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResearchSection {
    pub max_search_results: usize,
    pub enable_web_search: bool,
}

impl Default for ResearchSection {
    fn default() -> Self {
        Self {
            max_search_results: 10,
            enable_web_search: true,
        }
    }
}

/// [code_generation] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CodeGenerationSection {
    pub enable_validation: bool,
    pub supported_languages: Vec<String>,
}

impl Default for CodeGenerationSection {
    fn default() -> Self {
        Self {
            enable_validation: true,
            supported_languages: ["python", "javascript", "typescript", "go", "java"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

/// [data_analysis] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DataAnalysisSection {
    /// 字节
    pub max_dataset_size: u64,
    pub supported_formats: Vec<String>,
}

impl Default for DataAnalysisSection {
    fn default() -> Self {
        Self {
            max_dataset_size: 1_000_000,
            supported_formats: ["csv", "json", "parquet", "excel"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

/// [resilience] 段：重试与熔断
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResilienceSection {
    pub max_attempts: u32,
    pub initial_delay_secs: f64,
    pub max_delay_secs: f64,
    pub exponential_base: f64,
    pub jitter: bool,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_timeout_secs: f64,
}

impl Default for ResilienceSection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_secs: 1.0,
            max_delay_secs: 60.0,
            exponential_base: 2.0,
            jitter: true,
            circuit_breaker_threshold: 5,
            circuit_breaker_timeout_secs: 60.0,
        }
    }
}

impl ResilienceSection {
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts.max(1),
            initial_delay: secs(self.initial_delay_secs),
            max_delay: secs(self.max_delay_secs),
            exponential_base: self.exponential_base,
            jitter: self.jitter,
        }
    }

    pub fn circuit_breaker_timeout(&self) -> Duration {
        secs(self.circuit_breaker_timeout_secs)
    }
}

/// [tools] 段：单次调用超时、限流、输入 / 输出约束
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒），0 表示不设超时
    pub timeout_secs: u64,
    pub rate_limit: Option<RateLimitConfig>,
    pub max_string_length: usize,
    pub max_list_size: usize,
    pub max_dict_size: usize,
    pub max_nesting_depth: usize,
    pub forbidden_patterns: Vec<String>,
    pub max_output_size: usize,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            rate_limit: None,
            max_string_length: 10_000,
            max_list_size: 1_000,
            max_dict_size: 1_000,
            max_nesting_depth: 10,
            forbidden_patterns: Vec::new(),
            max_output_size: 100_000,
        }
    }
}

impl ToolsSection {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    pub fn input_constraints(&self) -> ToolInputConstraints {
        ToolInputConstraints {
            max_string_length: self.max_string_length,
            max_list_size: self.max_list_size,
            max_dict_size: self.max_dict_size,
            max_nesting_depth: self.max_nesting_depth,
            forbidden_patterns: self.forbidden_patterns.clone(),
            ..ToolInputConstraints::default()
        }
    }

    pub fn output_constraints(&self) -> OutputConstraints {
        OutputConstraints {
            max_output_size: self.max_output_size,
            ..OutputConstraints::default()
        }
    }
}

/// 非正数与 NaN 视为 0，超出 Duration 范围时取 Duration::MAX
fn secs(value: f64) -> Duration {
    if value.is_nan() || value <= 0.0 {
        Duration::ZERO
    } else {
        Duration::try_from_secs_f64(value).unwrap_or(Duration::MAX)
    }
}

fn check_secs(key: &str, value: f64) -> Result<(), config::ConfigError> {
    if value.is_finite() && value >= 0.0 && Duration::try_from_secs_f64(value).is_ok() {
        Ok(())
    } else {
        Err(config::ConfigError::Message(format!(
            "{key} must be a finite, non-negative number of seconds, got {value}"
        )))
    }
}

impl AppConfig {
    /// 秒数类字段必须能表示为 Duration
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        let r = &self.resilience;
        check_secs("resilience.initial_delay_secs", r.initial_delay_secs)?;
        check_secs("resilience.max_delay_secs", r.max_delay_secs)?;
        check_secs(
            "resilience.circuit_breaker_timeout_secs",
            r.circuit_breaker_timeout_secs,
        )
    }
}

/// 从 config 目录加载配置，环境变量 COLONY__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 COLONY__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("COLONY")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    let cfg: AppConfig = c.try_deserialize()?;
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.agents.coordinator_name, "coordinator");
        assert_eq!(cfg.agents.research_name, "research_agent");
        assert_eq!(cfg.research.max_search_results, 10);
        assert_eq!(cfg.code_generation.supported_languages.len(), 5);
        assert_eq!(cfg.resilience.circuit_breaker_threshold, 5);
        assert_eq!(cfg.tools.timeout(), Some(Duration::from_secs(30)));
        assert!(cfg.tools.rate_limit.is_none());
    }

    #[test]
    fn test_retry_config_conversion() {
        let r = ResilienceSection {
            initial_delay_secs: 0.5,
            max_delay_secs: 4.0,
            ..ResilienceSection::default()
        }
        .retry_config();
        assert_eq!(r.initial_delay, Duration::from_millis(500));
        assert_eq!(r.max_delay, Duration::from_secs(4));
        assert_eq!(r.max_attempts, 3);
    }

    #[test]
    fn test_load_from_file_with_partial_sections() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[research]
max_search_results = 3

[tools]
timeout_secs = 0

[tools.rate_limit]
requests_per_second = 5.0
burst_size = 2
wait_on_limit = false
strategy = "sliding_window"
"#
        )
        .unwrap();

        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.research.max_search_results, 3);
        assert!(cfg.research.enable_web_search);
        assert_eq!(cfg.tools.timeout(), None);
        let rl = cfg.tools.rate_limit.unwrap();
        assert_eq!(rl.requests_per_second, Some(5.0));
        assert_eq!(rl.burst_size, 2);
        assert!(!rl.wait_on_limit);
        assert_eq!(rl.strategy, crate::core::LimiterKind::SlidingWindow);
        assert_eq!(cfg.agents.data_analysis_name, "data_analysis_agent");
    }

    #[test]
    fn test_model_names_fall_back_to_default() {
        let models = ModelsSection {
            default: "base-model".to_string(),
            research: Some("deep-model".to_string()),
            ..ModelsSection::default()
        };
        assert_eq!(models.research(), "deep-model");
        assert_eq!(models.coordinator(), "base-model");
        assert_eq!(models.data_analysis(), "base-model");
        assert_eq!(ModelsSection::default().code_generation(), "gemini-2.0-flash");
    }

    #[test]
    fn test_oversized_durations_clamp_instead_of_panicking() {
        let r = ResilienceSection {
            circuit_breaker_timeout_secs: 1e20,
            max_delay_secs: f64::INFINITY,
            initial_delay_secs: f64::NAN,
            ..ResilienceSection::default()
        };
        assert_eq!(r.circuit_breaker_timeout(), Duration::MAX);
        let retry = r.retry_config();
        assert_eq!(retry.max_delay, Duration::MAX);
        assert_eq!(retry.initial_delay, Duration::ZERO);
    }

    #[test]
    fn test_load_rejects_unrepresentable_durations() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[models]
default = "base-model"

[resilience]
circuit_breaker_timeout_secs = 1e20
"#
        )
        .unwrap();
        let err = load_config(Some(file.path().to_path_buf())).unwrap_err();
        assert!(err.to_string().contains("circuit_breaker_timeout_secs"));
    }
}
