//! 技能调用适配器
//!
//! 解析 tool call 参数（字符串或 JSON 对象）、在超时内调用能力，并把一切失败隔离在本层：
//! 参数格式错误 → `{"error": "ArgumentFormatError: ..."}`；能力返回 Err / 超时 / panic → `Error: <message>`。
//! 每次调用（无论成败）向能力日志追加一行 `<name> -> <摘要>`，并输出结构化审计日志（JSON）。

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::time::timeout;

use crate::tools::Capability;

/// 能力日志中单条结果摘要的最大字符数
const SUMMARY_CHARS: usize = 200;

/// 参数不是合法 JSON 对象
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArgumentFormatError {
    #[error("arguments must be a JSON object, got {0}")]
    NotAnObject(&'static str),

    #[error("arguments are not valid JSON: {0}")]
    Malformed(String),
}

/// 单次调用失败原因（不会向上抛出，仅随结果返回）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvocationError {
    #[error("ArgumentFormatError: {0}")]
    ArgumentFormat(#[from] ArgumentFormatError),

    #[error("{0}")]
    Handler(String),

    #[error("capability '{name}' timed out after {secs}s")]
    Timeout { name: String, secs: u64 },

    #[error("capability panicked: {0}")]
    Panicked(String),

    #[error("Unknown skill: {0}")]
    UnknownCapability(String),
}

/// 单次调用结果：提交给补全服务的 output，以及可选的失败原因
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub output: String,
    pub error: Option<InvocationError>,
}

impl Invocation {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// 能力日志：每次调用一行
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilityLog {
    entries: Vec<String>,
}

impl CapabilityLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: &str, summary: &str) {
        self.entries.push(format!("{} -> {}", name, preview(summary)));
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for CapabilityLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.entries.join("\n"))
    }
}

/// 解析原始参数：字符串需解析为 JSON 对象；对象原样接受；其它类型拒绝
pub fn parse_arguments(raw: &Value) -> Result<Map<String, Value>, ArgumentFormatError> {
    match raw {
        Value::Object(map) => Ok(map.clone()),
        Value::String(text) => {
            let text = text.trim();
            if !text.starts_with('{') || !text.ends_with('}') {
                return Err(ArgumentFormatError::NotAnObject("a non-object string"));
            }
            match serde_json::from_str::<Value>(text) {
                Ok(Value::Object(map)) => Ok(map),
                Ok(_) => Err(ArgumentFormatError::NotAnObject("a non-object value")),
                Err(e) => Err(ArgumentFormatError::Malformed(e.to_string())),
            }
        }
        Value::Null => Err(ArgumentFormatError::NotAnObject("null")),
        Value::Bool(_) => Err(ArgumentFormatError::NotAnObject("a boolean")),
        Value::Number(_) => Err(ArgumentFormatError::NotAnObject("a number")),
        Value::Array(_) => Err(ArgumentFormatError::NotAnObject("an array")),
    }
}

/// 技能调用适配器：对每次调用施加超时，把失败转为结构化结果
#[derive(Debug, Clone)]
pub struct SkillInvoker {
    timeout: Duration,
}

impl SkillInvoker {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// 调用能力；永不返回 Err，失败信息体现在 Invocation.error 与 output 中
    pub async fn invoke(
        &self,
        capability: &dyn Capability,
        raw_arguments: &Value,
        log: &mut CapabilityLog,
    ) -> Invocation {
        let name = capability.name().to_string();
        let start = Instant::now();

        let invocation = match parse_arguments(raw_arguments) {
            Err(e) => {
                let err = InvocationError::from(e);
                Invocation {
                    output: serde_json::json!({ "error": err.to_string() }).to_string(),
                    error: Some(err),
                }
            }
            Ok(args) => {
                let call = AssertUnwindSafe(capability.execute(Value::Object(args))).catch_unwind();
                let err = match timeout(self.timeout, call).await {
                    Ok(Ok(Ok(output))) => {
                        log.push(&name, &output);
                        audit(&name, "ok", start, raw_arguments);
                        return Invocation {
                            output,
                            error: None,
                        };
                    }
                    Ok(Ok(Err(message))) => InvocationError::Handler(message),
                    Ok(Err(panic)) => InvocationError::Panicked(panic_message(panic.as_ref())),
                    Err(_) => InvocationError::Timeout {
                        name: name.clone(),
                        secs: self.timeout.as_secs(),
                    },
                };
                Invocation {
                    output: format!("Error: {}", err),
                    error: Some(err),
                }
            }
        };

        log.push(&name, &invocation.output);
        let outcome = match &invocation.error {
            Some(InvocationError::ArgumentFormat(_)) => "bad_arguments",
            Some(InvocationError::Timeout { .. }) => "timeout",
            Some(InvocationError::Panicked(_)) => "panic",
            _ => "error",
        };
        audit(&name, outcome, start, raw_arguments);
        invocation
    }

    /// 模型请求了未注册的能力：合成结构化错误，回填协议，不中断本轮
    pub fn unknown(&self, name: &str, log: &mut CapabilityLog) -> Invocation {
        let err = InvocationError::UnknownCapability(name.to_string());
        let output = serde_json::json!({ "error": err.to_string() }).to_string();
        log.push(name, "unknown capability");
        tracing::warn!("Model requested unknown capability '{}'", name);
        Invocation {
            output,
            error: Some(err),
        }
    }
}

impl Default for SkillInvoker {
    fn default() -> Self {
        Self::new(30)
    }
}

fn audit(name: &str, outcome: &str, start: Instant, args: &Value) {
    let audit = serde_json::json!({
        "event": "capability_audit",
        "capability": name,
        "ok": outcome == "ok",
        "outcome": outcome,
        "duration_ms": start.elapsed().as_millis() as u64,
        "args_preview": preview(&args.to_string()),
    });
    tracing::info!(audit = %audit, "capability");
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// 单行、截断后的摘要
fn preview(s: &str) -> String {
    let flat: String = s
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect();
    if flat.chars().count() > SUMMARY_CHARS {
        format!("{}...", flat.chars().take(SUMMARY_CHARS).collect::<String>())
    } else {
        flat
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::FnCapability;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn adder(calls: Arc<AtomicUsize>) -> FnCapability {
        FnCapability::new(
            "add",
            "adds a and b",
            json!({"type": "object", "properties": {"a": {"type": "integer"}, "b": {"type": "integer"}}, "required": ["a", "b"]}),
            move |args| {
                calls.fetch_add(1, Ordering::SeqCst);
                let a = args["a"].as_i64().ok_or("a must be an integer")?;
                let b = args["b"].as_i64().ok_or("b must be an integer")?;
                Ok((a + b).to_string())
            },
        )
    }

    #[test]
    fn test_parse_arguments() {
        assert!(parse_arguments(&json!({"x": 1})).is_ok());
        assert_eq!(parse_arguments(&json!(" {\"x\": 1} ")).unwrap()["x"], 1);
        assert!(matches!(
            parse_arguments(&json!("{not json}")),
            Err(ArgumentFormatError::Malformed(_))
        ));
        assert!(matches!(
            parse_arguments(&json!("[1, 2]")),
            Err(ArgumentFormatError::NotAnObject(_))
        ));
        assert!(matches!(
            parse_arguments(&json!(42)),
            Err(ArgumentFormatError::NotAnObject(_))
        ));
    }

    #[tokio::test]
    async fn test_invoke_success_logs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cap = adder(calls.clone());
        let mut log = CapabilityLog::new();
        let inv = SkillInvoker::default()
            .invoke(&cap, &json!("{\"a\": 2, \"b\": 3}"), &mut log)
            .await;
        assert!(inv.is_ok());
        assert_eq!(inv.output, "5");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(log.entries(), &["add -> 5".to_string()]);
    }

    #[tokio::test]
    async fn test_malformed_arguments_never_call_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cap = adder(calls.clone());
        let mut log = CapabilityLog::new();
        let inv = SkillInvoker::default()
            .invoke(&cap, &json!("{\"a\": 2,"), &mut log)
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(matches!(inv.error, Some(InvocationError::ArgumentFormat(_))));
        let parsed: Value = serde_json::from_str(&inv.output).unwrap();
        assert!(parsed["error"]
            .as_str()
            .unwrap()
            .starts_with("ArgumentFormatError"));
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn test_handler_error_is_wrapped() {
        let cap = adder(Arc::new(AtomicUsize::new(0)));
        let mut log = CapabilityLog::new();
        let inv = SkillInvoker::default()
            .invoke(&cap, &json!({"a": "x", "b": 1}), &mut log)
            .await;
        assert_eq!(inv.output, "Error: a must be an integer");
        assert!(log.entries()[0].starts_with("add -> Error:"));
    }

    struct Slow;

    #[async_trait]
    impl Capability for Slow {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "sleeps"
        }
        async fn execute(&self, _args: Value) -> Result<String, String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("late".into())
        }
    }

    struct Boom;

    #[async_trait]
    impl Capability for Boom {
        fn name(&self) -> &str {
            "boom"
        }
        fn description(&self) -> &str {
            "panics"
        }
        async fn execute(&self, _args: Value) -> Result<String, String> {
            panic!("kaboom")
        }
    }

    #[tokio::test]
    async fn test_timeout_and_panic_are_isolated() {
        let invoker = SkillInvoker {
            timeout: Duration::from_millis(20),
        };
        let mut log = CapabilityLog::new();

        let slow = invoker.invoke(&Slow, &json!({}), &mut log).await;
        assert!(matches!(slow.error, Some(InvocationError::Timeout { .. })));

        let boom = invoker.invoke(&Boom, &json!({}), &mut log).await;
        assert_eq!(boom.output, "Error: capability panicked: kaboom");
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_unknown_capability_output() {
        let mut log = CapabilityLog::new();
        let inv = SkillInvoker::default().unknown("Ghost", &mut log);
        let parsed: Value = serde_json::from_str(&inv.output).unwrap();
        assert_eq!(parsed["error"], "Unknown skill: Ghost");
        assert_eq!(log.to_string(), "Ghost -> unknown capability");
    }

    #[test]
    fn test_log_summary_is_single_line_and_bounded() {
        let mut log = CapabilityLog::new();
        log.push("big", &format!("line1\nline2{}", "x".repeat(500)));
        let entry = &log.entries()[0];
        assert!(!entry.contains('\n'));
        assert!(entry.ends_with("..."));
    }
}
