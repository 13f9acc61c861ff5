//! 工具层：Tool trait 与注册表、函数工具、输入输出校验、调用管线、执行器

pub mod executor;
pub mod function;
pub mod pipeline;
pub mod registry;
pub mod schema;
pub mod validation;

pub use executor::ToolExecutor;
pub use function::FunctionTool;
pub use pipeline::{Stage, ToolPipeline};
pub use registry::{Tool, ToolRegistry};
pub use schema::{schema_of, NoArgs};
pub use validation::{
    InputValidator, OutputConstraints, OutputValidator, ToolInputConstraints, ValueKind,
};
