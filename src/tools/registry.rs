//! 能力注册表
//!
//! 所有能力实现 Capability trait（name / description / parameters_schema / execute），
//! 由 CapabilityRegistry 按名注册与查找；list_metadata 的结果原样随每次提交发给补全服务。
//! 启动时注册完毕，运行期间只读，可被多个轮次无锁并发读取。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// 能力 trait：名称、描述（供模型理解）、参数 schema、异步执行（args 为 JSON 对象）
#[async_trait]
pub trait Capability: Send + Sync {
    /// 能力名称（模型 tool call 中的 name 字段）
    fn name(&self) -> &str;

    /// 能力描述（供模型理解功能）
    fn description(&self) -> &str;

    /// 参数 JSON Schema：`{"type": "object", "properties": {...}, "required": [...]}`
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 执行能力；Err 中的文本会被适配器包装为 `Error: <message>`
    async fn execute(&self, args: Value) -> Result<String, String>;
}

/// 注册表错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    #[error("capability name must match [A-Za-z0-9_-]{{1,64}}, got {0:?}")]
    InvalidName(String),

    #[error("capability '{name}' has invalid parameter schema: {reason}")]
    InvalidSchema { name: String, reason: String },

    #[error("Unknown skill: {0}")]
    NotFound(String),
}

/// 提交给补全服务的能力元数据
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapabilityMetadata {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// 用闭包实现的能力，便于启动时直接声明
pub struct FnCapability {
    name: String,
    description: String,
    schema: Value,
    handler: Arc<dyn Fn(Value) -> Result<String, String> + Send + Sync>,
}

impl FnCapability {
    pub fn new<F>(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: Value,
        handler: F,
    ) -> Self
    where
        F: Fn(Value) -> Result<String, String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            schema,
            handler: Arc::new(handler),
        }
    }
}

#[async_trait]
impl Capability for FnCapability {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.schema.clone()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        (self.handler)(args)
    }
}

/// 能力注册表：保持注册顺序；同名再次注册时原位覆盖（后注册者生效）
#[derive(Default)]
pub struct CapabilityRegistry {
    entries: Vec<Arc<dyn Capability>>,
    index: HashMap<String, usize>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册能力；返回被覆盖的旧能力（如有）
    pub fn register(
        &mut self,
        capability: impl Capability + 'static,
    ) -> Result<Option<Arc<dyn Capability>>, CapabilityError> {
        self.register_arc(Arc::new(capability))
    }

    pub fn register_arc(
        &mut self,
        capability: Arc<dyn Capability>,
    ) -> Result<Option<Arc<dyn Capability>>, CapabilityError> {
        let name = capability.name().to_string();
        validate_name(&name)?;
        validate_schema(&name, &capability.parameters_schema())?;

        if let Some(&slot) = self.index.get(&name) {
            tracing::warn!("Capability '{}' registered twice, last registration wins", name);
            let previous = std::mem::replace(&mut self.entries[slot], capability);
            return Ok(Some(previous));
        }
        self.index.insert(name, self.entries.len());
        self.entries.push(capability);
        Ok(None)
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<dyn Capability>, CapabilityError> {
        self.index
            .get(name)
            .map(|&slot| self.entries[slot].clone())
            .ok_or_else(|| CapabilityError::NotFound(name.to_string()))
    }

    /// 按注册顺序返回能力元数据
    pub fn list_metadata(&self) -> Vec<CapabilityMetadata> {
        self.entries
            .iter()
            .map(|c| CapabilityMetadata {
                name: c.name().to_string(),
                description: c.description().to_string(),
                parameters: c.parameters_schema(),
            })
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|c| c.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn validate_name(name: &str) -> Result<(), CapabilityError> {
    let ok = !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if ok {
        Ok(())
    } else {
        Err(CapabilityError::InvalidName(name.to_string()))
    }
}

fn validate_schema(name: &str, schema: &Value) -> Result<(), CapabilityError> {
    let invalid = |reason: &str| CapabilityError::InvalidSchema {
        name: name.to_string(),
        reason: reason.to_string(),
    };
    let obj = schema
        .as_object()
        .ok_or_else(|| invalid("schema must be a JSON object"))?;
    if obj.get("type").and_then(Value::as_str) != Some("object") {
        return Err(invalid("schema type must be \"object\""));
    }
    if let Some(props) = obj.get("properties") {
        if !props.is_object() {
            return Err(invalid("properties must be an object"));
        }
    }
    if let Some(required) = obj.get("required") {
        let all_strings = required
            .as_array()
            .map(|items| items.iter().all(Value::is_string))
            .unwrap_or(false);
        if !all_strings {
            return Err(invalid("required must be a list of property names"));
        }
    }
    Ok(())
}
