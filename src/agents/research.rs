//! 研究 agent：检索、收集、核实与综合信息（模拟数据）

use std::sync::Arc;

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::agents::base::{split_list, AgentHandle, SpecializedAgent};
use crate::config::{AppConfig, ResearchSection};
use crate::core::StateManager;
use crate::tools::FunctionTool;

fn default_num_results() -> usize {
    5
}

#[derive(Deserialize, JsonSchema)]
pub struct WebSearchArgs {
    /// The search query.
    pub query: String,
    /// Number of results to return (default 5).
    #[serde(default = "default_num_results")]
    pub num_results: usize,
}

#[derive(Deserialize, JsonSchema)]
pub struct TopicSourcesArgs {
    /// The topic to research.
    pub topic: String,
    /// Optional comma-separated list of sources to focus on.
    #[serde(default)]
    pub sources: String,
}

#[derive(Deserialize, JsonSchema)]
pub struct ClaimArgs {
    /// The claim to verify.
    pub claim: String,
    /// Optional comma-separated list of sources to check.
    #[serde(default)]
    pub sources: String,
}

#[derive(Deserialize, JsonSchema)]
pub struct SynthesizeResearchArgs {
    /// The research topic.
    pub topic: String,
    /// Comma-separated list of key points to include.
    pub key_points: String,
}

#[derive(Deserialize, JsonSchema)]
pub struct TopicArgs {
    /// The topic to get knowledge about.
    pub topic: String,
}

#[derive(Clone)]
pub struct ResearchAgent {
    handle: AgentHandle,
    settings: ResearchSection,
    limits: (u32, u64),
}

impl ResearchAgent {
    pub fn new(state: Arc<StateManager>, config: &AppConfig) -> Self {
        Self {
            handle: AgentHandle::new(
                config.agents.research_name.clone(),
                config.models.research(),
                state,
            ),
            settings: config.research.clone(),
            limits: (config.agents.max_iterations, config.agents.timeout_secs),
        }
    }

    /// 模拟检索；结果数不超过 max_search_results
    pub fn web_search(&self, query: &str, num_results: usize) -> Value {
        self.handle.update_state("last_search_query", query);
        self.handle.add_result(json!({
            "type": "search",
            "query": query,
            "num_results": num_results,
        }));

        let encoded = urlencoding::encode(query).replace("%20", "+");
        let count = num_results.min(self.settings.max_search_results);
        let results: Vec<Value> = (1..=count)
            .map(|i| {
                json!({
                    "title": format!("Result {i} for: {query}"),
                    "url": format!("https://example.com/result{i}?q={encoded}"),
                    "snippet": format!(
                        "This is a simulated search result snippet for query: {query}. \
                         Result number {i} contains relevant information."
                    ),
                })
            })
            .collect();
        json!({
            "query": query,
            "results": results,
            "note": "These are simulated results. In production, integrate with a real search API.",
        })
    }

    pub fn gather_information(&self, topic: &str, sources: &str) -> Value {
        self.handle.update_state("current_research_topic", topic);
        self.handle.add_result(json!({
            "type": "information_gathering",
            "topic": topic,
            "sources": sources,
        }));
        let source_list = split_list(sources, &["general"]);
        json!({
            "topic": topic,
            "sources": source_list,
            "information": {
                "overview": format!("Comprehensive information about {topic}"),
                "key_points": [
                    format!("Key point 1 about {topic}"),
                    format!("Key point 2 about {topic}"),
                    format!("Key point 3 about {topic}"),
                ],
                "details": format!(
                    "Detailed information about {topic} gathered from sources: {}",
                    source_list.join(", ")
                ),
            },
            "note": "This is simulated information gathering. Integrate with real data sources in production.",
        })
    }

    pub fn verify_information(&self, claim: &str, sources: &str) -> Value {
        self.handle.add_result(json!({
            "type": "verification",
            "claim": claim,
            "sources": sources,
        }));
        json!({
            "claim": claim,
            "verification_status": "pending",
            "confidence": "medium",
            "sources_checked": split_list(sources, &["general"]),
            "findings": format!("Verification findings for: {claim}"),
            "note": "This is a simulated verification. Implement actual fact-checking in production.",
        })
    }

    pub fn synthesize_research(&self, topic: &str, key_points: &str) -> Value {
        let points = split_list(key_points, &[]);
        let synthesis = json!({
            "topic": topic,
            "key_findings": points,
            "summary": format!("Research summary for {topic} covering: {}", points.join(", ")),
            "recommendations": [
                "Recommendation 1 based on research",
                "Recommendation 2 based on research",
            ],
            "sources": ["Source 1", "Source 2", "Source 3"],
        });
        self.handle.add_result(json!({
            "type": "synthesis",
            "topic": topic,
            "synthesis": synthesis,
        }));
        synthesis
    }

    /// 只读，不记录结果
    pub fn get_current_knowledge(&self, topic: &str) -> Value {
        json!({
            "topic": topic,
            "status": "Using AI knowledge base",
            "coverage": "general",
            "last_updated": "2025-01",
            "note": format!(
                "Information about {topic} from AI knowledge base. For real-time information, use web_search tool."
            ),
        })
    }
}

impl SpecializedAgent for ResearchAgent {
    fn handle(&self) -> &AgentHandle {
        &self.handle
    }

    fn limits(&self) -> (u32, u64) {
        self.limits
    }

    fn system_instruction(&self) -> String {
        "You are the Research Agent in a multi-agent system. Your role is to:
1. Conduct thorough research on topics and questions
2. Search for relevant information from various sources
3. Gather and organize factual information
4. Validate information accuracy when possible
5. Synthesize research findings into coherent summaries
6. Provide citations and sources for information

When conducting research:
- Use search tools to find relevant information
- Cross-reference information from multiple sources
- Distinguish between facts, opinions, and speculation
- Provide clear, well-organized research summaries
- Include sources and references in your findings

Your research should be comprehensive, accurate, and well-documented."
            .to_string()
    }

    /// enable_web_search 关闭时不提供 web_search
    fn tools(&self) -> Vec<FunctionTool> {
        let mut tools = Vec::new();
        if self.settings.enable_web_search {
            let agent = self.clone();
            tools.push(FunctionTool::new(
                "web_search",
                "Simulate a web search for information.",
                move |a: WebSearchArgs| Ok(agent.web_search(&a.query, a.num_results)),
            ));
        }
        let gather = self.clone();
        let verify = self.clone();
        let synth = self.clone();
        let knowledge = self.clone();
        tools.extend([
            FunctionTool::new(
                "gather_information",
                "Gather comprehensive information on a topic.",
                move |a: TopicSourcesArgs| Ok(gather.gather_information(&a.topic, &a.sources)),
            ),
            FunctionTool::new(
                "verify_information",
                "Verify a claim or piece of information.",
                move |a: ClaimArgs| Ok(verify.verify_information(&a.claim, &a.sources)),
            ),
            FunctionTool::new(
                "synthesize_research",
                "Synthesize research findings into a summary.",
                move |a: SynthesizeResearchArgs| Ok(synth.synthesize_research(&a.topic, &a.key_points)),
            ),
            FunctionTool::new(
                "get_current_knowledge",
                "Get current knowledge and understanding about a topic.",
                move |a: TopicArgs| Ok(knowledge.get_current_knowledge(&a.topic)),
            ),
        ]);
        tools
    }
}
