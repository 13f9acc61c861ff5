//! 工具参数 JSON Schema 生成（schemars）
//!
//! 参数结构体派生 JsonSchema，生成的 schema 随 AgentDefinition 一起交给托管运行时。

use schemars::{schema_for, JsonSchema};
use serde_json::Value;

/// 返回类型 T 的 JSON Schema
pub fn schema_of<T: JsonSchema>() -> Value {
    let schema = schema_for!(T);
    serde_json::to_value(&schema).unwrap_or_else(|_| serde_json::json!({ "type": "object" }))
}

/// 无参数工具使用的参数类型
#[derive(Debug, Default, serde::Deserialize, JsonSchema)]
pub struct NoArgs {}

#[cfg(test)]
mod tests {
    use super::*;

    /// 查询参数
    #[allow(dead_code)]
    #[derive(JsonSchema)]
    struct Query {
        /// 查询文本
        query: String,
        num_results: Option<u32>,
    }

    #[test]
    fn test_required_follows_option() {
        let schema = schema_of::<Query>();
        assert_eq!(schema["type"], "object");
        let required = schema["required"].as_array().unwrap();
        assert!(required.contains(&Value::from("query")));
        assert!(!required.contains(&Value::from("num_results")));
        assert_eq!(schema["properties"]["query"]["description"], "查询文本");
    }
}
