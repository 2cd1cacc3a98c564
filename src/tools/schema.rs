//! 工具参数 JSON Schema 生成（schemars 自动从输入结构体生成）
//!
//! 生成的 schema 直接作为 ToolSchema.input_schema 发给模型；执行时用 parse_input 反序列化，
//! 保证宣告的参数格式与实际解析的结构体一致。

use schemars::gen::SchemaSettings;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::core::ToolError;

/// 为输入类型生成内联的对象 schema（去掉 `$schema` / `title` 元信息）
pub fn input_schema<T: JsonSchema>() -> Value {
    let generator = SchemaSettings::draft07()
        .with(|s| {
            s.inline_subschemas = true;
        })
        .into_generator();
    let root = generator.into_root_schema_for::<T>();
    let mut value = serde_json::to_value(root).unwrap_or_else(|_| serde_json::json!({"type": "object"}));
    if let Some(obj) = value.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
        obj.remove("definitions");
    }
    value
}

/// 将模型给出的 JSON 输入解析为工具参数结构体
pub fn parse_input<T: DeserializeOwned>(input: Value) -> Result<T, ToolError> {
    serde_json::from_value(input).map_err(|e| ToolError::InvalidInput(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    /// 测试用参数
    #[allow(dead_code)]
    #[derive(Deserialize, JsonSchema)]
    struct ReadArgs {
        /// 相对路径
        path: String,
        limit: Option<u32>,
    }

    #[test]
    fn test_input_schema_is_plain_object() {
        let schema = input_schema::<ReadArgs>();
        assert_eq!(schema["type"], "object");
        assert!(schema.get("$schema").is_none());
        assert!(schema.get("title").is_none());
        assert_eq!(schema["properties"]["path"]["description"], "相对路径");
        assert_eq!(schema["required"], serde_json::json!(["path"]));
    }

    #[test]
    fn test_parse_input_reports_missing_field() {
        let err = parse_input::<ReadArgs>(serde_json::json!({"limit": 3})).err().unwrap();
        assert!(err.to_string().contains("path"));
    }
}
