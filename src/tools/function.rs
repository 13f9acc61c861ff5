//! 函数工具：{名称, 参数 schema, 处理函数} 三元组
//!
//! 参数是带 `Deserialize + JsonSchema` 的结构体，schema 由类型生成，调用时先把 JSON 解码成该类型，
//! 解码失败即为 Validation 错误；处理函数只面对已类型化的参数。

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::core::AgentError;
use crate::tools::schema::schema_of;
use crate::tools::Tool;

type Handler = Arc<dyn Fn(Value) -> Result<Value, AgentError> + Send + Sync>;

/// 基于闭包的工具描述符
#[derive(Clone)]
pub struct FunctionTool {
    name: String,
    description: String,
    schema: Value,
    handler: Handler,
}

impl fmt::Debug for FunctionTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionTool")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

impl FunctionTool {
    pub fn new<A, F>(name: impl Into<String>, description: impl Into<String>, handler: F) -> Self
    where
        A: DeserializeOwned + JsonSchema + 'static,
        F: Fn(A) -> Result<Value, AgentError> + Send + Sync + 'static,
    {
        let name = name.into();
        let tool_name = name.clone();
        let handler: Handler = Arc::new(move |args: Value| {
            let args = if args.is_null() {
                Value::Object(Default::default())
            } else {
                args
            };
            let typed: A = serde_json::from_value(args).map_err(|e| {
                AgentError::validation(
                    format!("Invalid arguments for {tool_name}: {e}"),
                    "args",
                    "<undecodable>",
                )
            })?;
            handler(typed)
        });
        Self {
            name,
            description: description.into(),
            schema: schema_of::<A>(),
            handler,
        }
    }

    /// 直接以 JSON 值调用处理函数（同步，不经过管线）
    pub fn call(&self, args: Value) -> Result<Value, AgentError> {
        (self.handler)(args)
    }
}

#[async_trait]
impl Tool for FunctionTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.schema.clone()
    }

    async fn execute(&self, args: Value) -> Result<String, AgentError> {
        match self.call(args)? {
            Value::String(text) => Ok(text),
            other => Ok(serde_json::to_string_pretty(&other)?),
        }
    }
}
