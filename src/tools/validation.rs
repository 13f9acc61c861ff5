//! 工具输入 / 输出校验
//!
//! 输入：按 JSON 值类型做白名单、字符串长度与禁用正则、集合大小、嵌套深度、必填字段检查。
//! 输出：空值、输出长度，以及要求为对象时的必填字段。所有失败都是不可恢复的 Validation 错误。

use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::core::AgentError;

/// JSON 值类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Null,
    Bool,
    Number,
    String,
    Array,
    Object,
}

impl ValueKind {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(_) => Self::Bool,
            Value::Number(_) => Self::Number,
            Value::String(_) => Self::String,
            Value::Array(_) => Self::Array,
            Value::Object(_) => Self::Object,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool => "bool",
            Self::Number => "number",
            Self::String => "string",
            Self::Array => "array",
            Self::Object => "object",
        }
    }

    pub fn all() -> Vec<Self> {
        vec![
            Self::Null,
            Self::Bool,
            Self::Number,
            Self::String,
            Self::Array,
            Self::Object,
        ]
    }
}

/// 输入约束
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ToolInputConstraints {
    pub max_string_length: usize,
    pub max_list_size: usize,
    pub max_dict_size: usize,
    pub max_nesting_depth: usize,
    pub allowed_types: Vec<ValueKind>,
    pub forbidden_patterns: Vec<String>,
    pub required_fields: Vec<String>,
}

impl Default for ToolInputConstraints {
    fn default() -> Self {
        Self {
            max_string_length: 10_000,
            max_list_size: 1_000,
            max_dict_size: 1_000,
            max_nesting_depth: 10,
            allowed_types: ValueKind::all(),
            forbidden_patterns: Vec::new(),
            required_fields: Vec::new(),
        }
    }
}

/// 输入校验器；禁用正则在构造时编译，非法正则是配置错误
#[derive(Clone, Debug)]
pub struct InputValidator {
    constraints: ToolInputConstraints,
    forbidden: Vec<Regex>,
}

impl InputValidator {
    pub fn new(constraints: ToolInputConstraints) -> Result<Self, AgentError> {
        let forbidden = constraints
            .forbidden_patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| {
                    AgentError::configuration(
                        format!("Invalid forbidden pattern {p:?}: {e}"),
                        Some("forbidden_patterns"),
                    )
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            constraints,
            forbidden,
        })
    }

    pub fn constraints(&self) -> &ToolInputConstraints {
        &self.constraints
    }

    pub fn validate_type(&self, value: &Value) -> Result<(), AgentError> {
        let kind = ValueKind::of(value);
        if self.constraints.allowed_types.contains(&kind) {
            return Ok(());
        }
        let allowed: Vec<&str> = self
            .constraints
            .allowed_types
            .iter()
            .map(ValueKind::as_str)
            .collect();
        Err(AgentError::validation(
            format!("Type {} not allowed. Allowed types: {allowed:?}", kind.as_str()),
            "type",
            kind.as_str(),
        ))
    }

    pub fn validate_string(&self, value: &str, field_name: &str) -> Result<(), AgentError> {
        let len = value.chars().count();
        if len > self.constraints.max_string_length {
            return Err(AgentError::validation(
                format!(
                    "String length {len} exceeds maximum {}",
                    self.constraints.max_string_length
                ),
                field_name,
                format!("<string of length {len}>"),
            ));
        }
        if let Some(re) = self.forbidden.iter().find(|re| re.is_match(value)) {
            return Err(AgentError::validation(
                format!("String contains forbidden pattern: {}", re.as_str()),
                field_name,
                "<redacted>",
            ));
        }
        Ok(())
    }

    pub fn validate_collection_size(&self, value: &Value, field_name: &str) -> Result<(), AgentError> {
        let (len, max) = match value {
            Value::Array(items) => (items.len(), self.constraints.max_list_size),
            Value::Object(map) => (map.len(), self.constraints.max_dict_size),
            _ => return Ok(()),
        };
        if len > max {
            return Err(AgentError::validation(
                format!("Collection size {len} exceeds maximum {max}"),
                field_name,
                format!("<collection of size {len}>"),
            ));
        }
        Ok(())
    }

    pub fn validate_nesting_depth(&self, value: &Value) -> Result<(), AgentError> {
        self.check_depth(value, 0)
    }

    fn check_depth(&self, value: &Value, depth: usize) -> Result<(), AgentError> {
        let max = self.constraints.max_nesting_depth;
        if depth > max {
            return Err(AgentError::validation(
                format!("Nesting depth {depth} exceeds maximum {max}"),
                "nesting_depth",
                depth,
            ));
        }
        match value {
            Value::Array(items) => items.iter().try_for_each(|v| self.check_depth(v, depth + 1)),
            Value::Object(map) => map.values().try_for_each(|v| self.check_depth(v, depth + 1)),
            _ => Ok(()),
        }
    }

    pub fn validate_required_fields(&self, data: &Map<String, Value>) -> Result<(), AgentError> {
        let missing: Vec<&str> = self
            .constraints
            .required_fields
            .iter()
            .filter(|f| !data.contains_key(f.as_str()))
            .map(String::as_str)
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(AgentError::validation(
                format!("Missing required fields: {missing:?}"),
                "required_fields",
                missing.join(","),
            ))
        }
    }

    /// 校验单个值：类型 → 字符串 / 集合大小与深度 → 对象必填字段
    pub fn validate_input(&self, value: &Value, field_name: &str) -> Result<(), AgentError> {
        self.validate_type(value)?;
        match value {
            Value::String(s) => self.validate_string(s, field_name)?,
            Value::Array(_) | Value::Object(_) => {
                self.validate_collection_size(value, field_name)?;
                self.validate_nesting_depth(value)?;
            }
            _ => {}
        }
        if let Value::Object(map) = value {
            self.validate_required_fields(map)?;
        }
        Ok(())
    }

    /// 校验一次工具调用的参数：对象参数先查必填，再逐个字段校验；其它形态按整体校验
    pub fn validate_arguments(&self, args: &Value) -> Result<(), AgentError> {
        match args {
            Value::Object(map) => {
                self.validate_required_fields(map)?;
                map.iter()
                    .try_for_each(|(key, value)| self.validate_input(value, key))
            }
            other => self.validate_input(other, "input"),
        }
    }
}

/// 输出约束
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct OutputConstraints {
    /// 字符数
    pub max_output_size: usize,
    pub required_fields: Vec<String>,
    /// 为 true 时输出必须是 JSON 对象，并检查 required_fields
    pub require_object: bool,
    pub allow_none: bool,
}

impl Default for OutputConstraints {
    fn default() -> Self {
        Self {
            max_output_size: 100_000,
            required_fields: Vec::new(),
            require_object: false,
            allow_none: true,
        }
    }
}

/// 输出校验器
#[derive(Clone, Debug, Default)]
pub struct OutputValidator {
    constraints: OutputConstraints,
}

impl OutputValidator {
    pub fn new(constraints: OutputConstraints) -> Self {
        Self { constraints }
    }

    pub fn constraints(&self) -> &OutputConstraints {
        &self.constraints
    }

    pub fn validate_output(&self, output: &str) -> Result<(), AgentError> {
        let trimmed = output.trim();
        if trimmed.is_empty() || trimmed == "null" {
            if self.constraints.allow_none {
                return Ok(());
            }
            return Err(AgentError::validation("Output cannot be None", "output", "null"));
        }

        let len = output.chars().count();
        if len > self.constraints.max_output_size {
            return Err(AgentError::validation(
                format!(
                    "Output size {len} exceeds maximum {}",
                    self.constraints.max_output_size
                ),
                "output_size",
                len,
            ));
        }

        if self.constraints.require_object {
            let map = match serde_json::from_str::<Value>(output) {
                Ok(Value::Object(map)) => map,
                Ok(other) => {
                    return Err(AgentError::validation(
                        "Output must be an object",
                        "output_type",
                        ValueKind::of(&other).as_str(),
                    ))
                }
                Err(_) => {
                    return Err(AgentError::validation(
                        "Output must be an object",
                        "output_type",
                        "text",
                    ))
                }
            };
            if let Some(field) = self
                .constraints
                .required_fields
                .iter()
                .find(|f| !map.contains_key(f.as_str()))
            {
                return Err(AgentError::validation(
                    format!("Required output field missing: {field}"),
                    "required_fields",
                    field,
                ));
            }
        }
        Ok(())
    }
}
