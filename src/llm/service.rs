//! 外部补全服务协议
//!
//! 一次 Run：submit → poll（queued / in_progress / requires_action / completed / failed）
//! → submit_tool_outputs → poll … → list_messages 取回助手回复；中途放弃的 Run 用 cancel 释放。
//! 所有实现（OpenAI 兼容 HTTP / Mock）都实现 CompletionService，编排器只依赖这个 trait。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::core::Retryable;
use crate::memory::Message;
use crate::tools::CapabilityMetadata;

/// 一次提交：线程当前消息、可调用能力元数据、运行指令
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub thread_id: String,
    pub messages: Vec<Message>,
    pub tools: Vec<CapabilityMetadata>,
    pub instructions: Option<String>,
}

/// Run 句柄
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunHandle {
    pub id: String,
    pub thread_id: String,
}

/// 服务请求的单次能力调用；arguments 通常是 JSON 字符串，也可能已是对象
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// 回填给服务的能力调用结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub tool_call_id: String,
    pub output: String,
}

/// Run 状态
#[derive(Debug, Clone, PartialEq)]
pub enum RunStatus {
    Queued,
    InProgress,
    RequiresAction(Vec<ToolCall>),
    Completed,
    Failed(String),
    /// 协议之外的状态（如 expired、cancelled）
    Other(String),
}

impl RunStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, RunStatus::Queued | RunStatus::InProgress)
    }

    pub fn label(&self) -> &str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::InProgress => "in_progress",
            RunStatus::RequiresAction(_) => "requires_action",
            RunStatus::Completed => "completed",
            RunStatus::Failed(_) => "failed",
            RunStatus::Other(s) => s,
        }
    }
}

/// 补全服务错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// 网络抖动、超时、连接失败
    #[error("transport error: {0}")]
    Transport(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    /// 5xx / 408
    #[error("service unavailable ({status}): {message}")]
    Unavailable { status: u16, message: String },

    /// 其它 4xx 或请求无法构造
    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("invalid service response: {0}")]
    InvalidResponse(String),

    #[error("unknown run: {0}")]
    UnknownRun(String),

    #[error("run {run_id} is not waiting for tool outputs")]
    NotAwaitingOutputs { run_id: String },
}

impl ServiceError {
    /// 按 HTTP 状态码分类
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            429 => ServiceError::RateLimited(message),
            408 | 500..=599 => ServiceError::Unavailable { status, message },
            _ => ServiceError::Rejected { status, message },
        }
    }
}

impl Retryable for ServiceError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            ServiceError::Transport(_)
                | ServiceError::RateLimited(_)
                | ServiceError::Unavailable { .. }
        )
    }
}

/// 补全服务 trait
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// 提交消息与能力元数据，创建 Run
    async fn submit(&self, request: RunRequest) -> Result<RunHandle, ServiceError>;

    /// 查询 Run 状态
    async fn poll(&self, run: &RunHandle) -> Result<RunStatus, ServiceError>;

    /// 一次性回填本轮全部能力调用结果
    async fn submit_tool_outputs(
        &self,
        run: &RunHandle,
        outputs: Vec<ToolOutput>,
    ) -> Result<RunHandle, ServiceError>;

    /// 线程上的消息，最新在前
    async fn list_messages(&self, thread_id: &str) -> Result<Vec<Message>, ServiceError>;

    /// 放弃一个未到终态的 Run 并释放其状态；Run 已结束或不存在时也返回 Ok
    async fn cancel(&self, run: &RunHandle) -> Result<(), ServiceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(ServiceError::from_status(429, "slow down").is_retryable());
        assert!(ServiceError::from_status(503, "busy").is_retryable());
        assert!(ServiceError::from_status(408, "timeout").is_retryable());
        assert!(!ServiceError::from_status(401, "bad key").is_retryable());
        assert!(!ServiceError::from_status(400, "bad request").is_retryable());
        assert!(ServiceError::Transport("reset".into()).is_retryable());
        assert!(!ServiceError::InvalidResponse("no choices".into()).is_retryable());
    }

    #[test]
    fn test_status_labels() {
        assert!(RunStatus::Queued.is_pending());
        assert!(RunStatus::InProgress.is_pending());
        assert!(!RunStatus::Completed.is_pending());
        assert_eq!(RunStatus::RequiresAction(vec![]).label(), "requires_action");
        assert_eq!(RunStatus::Other("expired".into()).label(), "expired");
    }
}
