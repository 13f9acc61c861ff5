//! 数据分析 agent：数据集分析、统计检验、模式识别、可视化、清洗、报告（模拟数据）

use std::sync::Arc;

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::agents::base::{split_list, AgentHandle, SpecializedAgent};
use crate::config::{AppConfig, DataAnalysisSection};
use crate::core::StateManager;
use crate::tools::FunctionTool;

fn default_general() -> String {
    "general".to_string()
}

fn default_confidence() -> f64 {
    0.95
}

fn default_viz() -> String {
    "bar".to_string()
}

#[derive(Deserialize, JsonSchema)]
pub struct AnalyzeDatasetArgs {
    /// Description of the dataset.
    pub data_description: String,
    /// Type of analysis (general, statistical, trend, etc.).
    #[serde(default = "default_general")]
    pub analysis_type: String,
    /// Optional comma-separated list of columns to focus on.
    #[serde(default)]
    pub columns: String,
    /// Optional data format (csv, json, parquet, excel).
    #[serde(default)]
    pub format: Option<String>,
    /// Optional dataset size in bytes.
    #[serde(default)]
    pub size_bytes: Option<u64>,
}

#[derive(Deserialize, JsonSchema)]
pub struct StatisticalArgs {
    /// Description of the data to analyze.
    pub data_description: String,
    /// Comma-separated list of statistical tests to perform.
    #[serde(default)]
    pub tests: String,
    /// Confidence level for statistical tests (default 0.95).
    #[serde(default = "default_confidence")]
    pub confidence_level: f64,
}

#[derive(Deserialize, JsonSchema)]
pub struct PatternArgs {
    /// Description of the data.
    pub data_description: String,
    /// Type of pattern to look for (temporal, spatial, correlation, etc.).
    #[serde(default = "default_general")]
    pub pattern_type: String,
}

#[derive(Deserialize, JsonSchema)]
pub struct VisualizationArgs {
    /// Description of the data to visualize.
    pub data_description: String,
    /// Type of visualization (bar, line, scatter, heatmap, etc.).
    #[serde(default = "default_viz")]
    pub viz_type: String,
    /// Optional title for the visualization.
    #[serde(default)]
    pub title: String,
}

#[derive(Deserialize, JsonSchema)]
pub struct CleanDataArgs {
    /// Description of the data to clean.
    pub data_description: String,
    /// Comma-separated list of cleaning operations.
    #[serde(default)]
    pub cleaning_operations: String,
}

#[derive(Deserialize, JsonSchema)]
pub struct ReportArgs {
    /// Summary of the analysis performed.
    pub analysis_summary: String,
    /// Comma-separated sections to include.
    #[serde(default)]
    pub include_sections: String,
}

#[derive(Clone)]
pub struct DataAnalysisAgent {
    handle: AgentHandle,
    settings: DataAnalysisSection,
    limits: (u32, u64),
}

/// 首字母大写，其余小写
fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

impl DataAnalysisAgent {
    pub fn new(state: Arc<StateManager>, config: &AppConfig) -> Self {
        Self {
            handle: AgentHandle::new(
                config.agents.data_analysis_name.clone(),
                config.models.data_analysis(),
                state,
            ),
            settings: config.data_analysis.clone(),
            limits: (config.agents.max_iterations, config.agents.timeout_secs),
        }
    }

    /// 声明了格式或大小时先检查：不支持的格式、超出 max_dataset_size 均软失败
    pub fn analyze_dataset(
        &self,
        data_description: &str,
        analysis_type: &str,
        columns: &str,
        format: Option<&str>,
        size_bytes: Option<u64>,
    ) -> Value {
        if let Some(format) = format {
            if !self
                .settings
                .supported_formats
                .iter()
                .any(|f| f.eq_ignore_ascii_case(format))
            {
                return json!({
                    "error": format!(
                        "Format '{format}' not supported. Supported: {}",
                        self.settings.supported_formats.join(", ")
                    )
                });
            }
        }
        if let Some(size) = size_bytes {
            if size > self.settings.max_dataset_size {
                return json!({
                    "error": format!(
                        "Dataset size {size} exceeds maximum {}",
                        self.settings.max_dataset_size
                    )
                });
            }
        }

        let cols = split_list(columns, &["all"]);
        let focus = cols.iter().take(3).cloned().collect::<Vec<_>>().join(", ");
        let result = json!({
            "dataset": data_description,
            "analysis_type": analysis_type,
            "columns_analyzed": cols,
            "summary_statistics": {
                "total_records": 1000,
                "columns": cols.len(),
                "data_quality_score": 0.92,
            },
            "key_insights": [
                format!("Insight 1: {analysis_type} analysis reveals pattern in data"),
                format!("Insight 2: Trend identified across {focus}"),
                "Insight 3: Data quality is good with minimal missing values",
            ],
            "recommendations": [
                "Recommendation 1 based on analysis",
                "Recommendation 2 for data improvement",
            ],
            "note": "This is simulated data analysis. Integrate with actual data processing libraries.",
        });
        self.handle.add_result(json!({
            "type": "dataset_analysis",
            "dataset": data_description,
            "analysis_type": analysis_type,
        }));
        result
    }

    pub fn perform_statistical_analysis(
        &self,
        data_description: &str,
        tests: &str,
        confidence_level: f64,
    ) -> Value {
        let test_list = split_list(tests, &["descriptive"]);
        let result = json!({
            "data": data_description,
            "tests_performed": test_list,
            "confidence_level": confidence_level,
            "results": {
                "mean": 50.5,
                "median": 48.2,
                "std_dev": 12.3,
                "min": 10.0,
                "max": 95.0,
                "p_value": 0.023,
            },
            "interpretation": format!(
                "Statistical analysis using {} at {confidence_level} confidence",
                test_list.join(", ")
            ),
            "significant_findings": [
                "Finding 1: Statistically significant result",
                "Finding 2: Notable pattern in distribution",
            ],
            "note": "This is simulated statistical analysis.",
        });
        self.handle.add_result(json!({
            "type": "statistical_analysis",
            "tests": test_list,
            "confidence_level": confidence_level,
        }));
        result
    }

    pub fn identify_patterns(&self, data_description: &str, pattern_type: &str) -> Value {
        let result = json!({
            "data": data_description,
            "pattern_type": pattern_type,
            "patterns_found": [
                {
                    "pattern": "Increasing trend",
                    "strength": "strong",
                    "confidence": 0.87,
                    "description": format!("{pattern_type} pattern showing consistent increase"),
                },
                {
                    "pattern": "Seasonal variation",
                    "strength": "medium",
                    "confidence": 0.72,
                    "description": "Cyclical pattern with 3-month period",
                },
            ],
            "correlations": [
                {
                    "variables": "Variable A and B",
                    "coefficient": 0.78,
                    "significance": "high",
                }
            ],
            "note": "This is simulated pattern identification.",
        });
        self.handle.add_result(json!({
            "type": "pattern_identification",
            "pattern_type": pattern_type,
        }));
        result
    }

    pub fn generate_visualization(&self, data_description: &str, viz_type: &str, title: &str) -> Value {
        let title = if title.is_empty() {
            format!("{} Chart", title_case(viz_type))
        } else {
            title.to_string()
        };
        let result = json!({
            "data": data_description,
            "visualization_type": viz_type,
            "title": title,
            "configuration": {
                "x_axis": "X-axis label",
                "y_axis": "Y-axis label",
                "color_scheme": "viridis",
                "size": "800x600",
            },
            "insights_shown": [
                format!("Main trend visible in {viz_type} chart"),
                "Data distribution clearly illustrated",
            ],
            "note": "This is a visualization specification, not a rendered chart.",
        });
        self.handle.add_result(json!({
            "type": "visualization",
            "viz_type": viz_type,
        }));
        result
    }

    pub fn clean_data(&self, data_description: &str, cleaning_operations: &str) -> Value {
        let operations = split_list(cleaning_operations, &["remove_duplicates", "handle_missing"]);
        let result = json!({
            "data": data_description,
            "operations_performed": operations,
            "before": { "records": 1000, "missing_values": 45, "duplicates": 12 },
            "after": { "records": 988, "missing_values": 0, "duplicates": 0 },
            "changes_made": [
                "Removed 12 duplicate records",
                "Imputed 45 missing values using mean strategy",
                "Standardized date formats",
            ],
            "data_quality_improvement": "15%",
            "note": "This is simulated data cleaning.",
        });
        self.handle.add_result(json!({
            "type": "data_cleaning",
            "operations": operations,
        }));
        result
    }

    pub fn generate_report(&self, analysis_summary: &str, include_sections: &str) -> Value {
        let sections = split_list(
            include_sections,
            &["executive_summary", "methodology", "findings", "recommendations"],
        );
        let structure: Map<String, Value> = sections
            .iter()
            .map(|s| (s.clone(), Value::from(format!("Content for {s} section"))))
            .collect();
        let result = json!({
            "title": "Data Analysis Report",
            "analysis_summary": analysis_summary,
            "sections": sections,
            "report_structure": structure,
            "key_findings": [
                "Key finding 1 from comprehensive analysis",
                "Key finding 2 with supporting data",
                "Key finding 3 and implications",
            ],
            "recommendations": [
                "Action item 1 based on data",
                "Action item 2 for improvement",
            ],
            "note": "This is a report structure. Generate actual content from real analysis results.",
        });
        self.handle.add_result(json!({
            "type": "report_generation",
            "sections": sections,
        }));
        result
    }
}

impl SpecializedAgent for DataAnalysisAgent {
    fn handle(&self) -> &AgentHandle {
        &self.handle
    }

    fn limits(&self) -> (u32, u64) {
        self.limits
    }

    fn system_instruction(&self) -> String {
        format!(
            "You are the Data Analysis Agent in a multi-agent system. Your role is to:
1. Analyze datasets and extract insights
2. Perform statistical analysis and calculations
3. Identify patterns, trends, and anomalies
4. Generate data visualizations and reports
5. Clean and preprocess data
6. Make data-driven recommendations

Supported data formats: {}
Maximum dataset size: {} bytes

When analyzing data:
- Validate data quality and integrity
- Use appropriate statistical methods
- Identify outliers and anomalies
- Generate clear, actionable insights
- Create meaningful visualizations
- Provide confidence levels and error margins

Your analysis should be rigorous, accurate, and well-documented.",
            self.settings.supported_formats.join(", "),
            self.settings.max_dataset_size
        )
    }

    fn tools(&self) -> Vec<FunctionTool> {
        let analyze = self.clone();
        let stats = self.clone();
        let patterns = self.clone();
        let viz = self.clone();
        let clean = self.clone();
        let report = self.clone();
        vec![
            FunctionTool::new(
                "analyze_dataset",
                "Analyze a dataset and generate insights.",
                move |a: AnalyzeDatasetArgs| {
                    Ok(analyze.analyze_dataset(
                        &a.data_description,
                        &a.analysis_type,
                        &a.columns,
                        a.format.as_deref(),
                        a.size_bytes,
                    ))
                },
            ),
            FunctionTool::new(
                "perform_statistical_analysis",
                "Perform statistical analysis on data.",
                move |a: StatisticalArgs| {
                    Ok(stats.perform_statistical_analysis(&a.data_description, &a.tests, a.confidence_level))
                },
            ),
            FunctionTool::new(
                "identify_patterns",
                "Identify patterns and trends in data.",
                move |a: PatternArgs| Ok(patterns.identify_patterns(&a.data_description, &a.pattern_type)),
            ),
            FunctionTool::new(
                "generate_visualization",
                "Generate data visualization specifications.",
                move |a: VisualizationArgs| {
                    Ok(viz.generate_visualization(&a.data_description, &a.viz_type, &a.title))
                },
            ),
            FunctionTool::new(
                "clean_data",
                "Clean and preprocess data.",
                move |a: CleanDataArgs| Ok(clean.clean_data(&a.data_description, &a.cleaning_operations)),
            ),
            FunctionTool::new(
                "generate_report",
                "Generate a comprehensive data analysis report.",
                move |a: ReportArgs| Ok(report.generate_report(&a.analysis_summary, &a.include_sections)),
            ),
        ]
    }
}
