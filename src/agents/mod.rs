//! Agent 层：共享句柄与 SpecializedAgent trait、协调者、三个专职 agent、注册表

pub mod base;
pub mod code_generation;
pub mod coordinator;
pub mod data_analysis;
pub mod registry;
pub mod research;

pub use base::{AgentDefinition, AgentHandle, SpecializedAgent};
pub use code_generation::CodeGenerationAgent;
pub use coordinator::CoordinatorAgent;
pub use data_analysis::DataAnalysisAgent;
pub use registry::{AgentKind, AgentRegistry};
pub use research::ResearchAgent;
