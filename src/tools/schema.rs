//! 能力参数 JSON Schema 生成（schemars 自动生成）
//!
//! 生成结果整理为补全服务接受的形状：`{"type": "object", "properties": {...}, "required": [...]}`。

use schemars::{schema_for, JsonSchema};
use serde_json::{json, Value};

/// 由参数结构体生成能力参数 schema
pub fn parameters_schema<T: JsonSchema>() -> Value {
    let schema = schema_for!(T);
    let mut value = serde_json::to_value(&schema).unwrap_or_else(|_| json!({}));
    if let Some(obj) = value.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
        obj.insert("type".to_string(), json!("object"));
        obj.entry("properties").or_insert_with(|| json!({}));
        obj.entry("required").or_insert_with(|| json!([]));
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 测试参数
    #[allow(dead_code)]
    #[derive(JsonSchema)]
    struct Args {
        /// 要查询的城市
        city: String,
        days: Option<u32>,
    }

    #[allow(dead_code)]
    #[derive(JsonSchema)]
    struct NoArgs {}

    #[test]
    fn test_schema_shape() {
        let schema = parameters_schema::<Args>();
        assert_eq!(schema["type"], "object");
        assert!(schema.get("$schema").is_none());
        assert_eq!(schema["properties"]["city"]["description"], "要查询的城市");
        assert_eq!(schema["required"], json!(["city"]));
    }

    #[test]
    fn test_empty_struct_has_properties_and_required() {
        let schema = parameters_schema::<NoArgs>();
        assert_eq!(schema["properties"], json!({}));
        assert_eq!(schema["required"], json!([]));
    }
}
