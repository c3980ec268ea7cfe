//! 轮次错误类型
//!
//! TurnError 只在编排器内部流转；对外统一降级为道歉文本（见 TurnOrchestrator::run_turn）。
//! 存储层、服务层、能力层各自的错误定义在对应模块中，这里通过 `#[from]` 汇总。

use thiserror::Error;

use crate::llm::ServiceError;
use crate::memory::StoreError;

/// 对外统一的道歉回复
pub const APOLOGY: &str =
    "Sorry, I encountered an error while processing your request. Please try again later.";

/// 单轮对话过程中可能出现的错误
#[derive(Error, Debug)]
pub enum TurnError {
    /// 补全服务调用失败（不可重试，或重试次数耗尽）
    #[error("completion service failed after {attempts} attempt(s): {source}")]
    Service {
        attempts: u32,
        #[source]
        source: ServiceError,
    },

    #[error("run {0} still pending after polling budget was exhausted")]
    PollTimeout(String),

    #[error("run {run_id} exceeded {limit} tool rounds")]
    TooManyToolRounds { run_id: String, limit: usize },

    #[error("run {run_id} failed: {reason}")]
    RunFailed { run_id: String, reason: String },

    #[error("run {run_id} reported unhandled status '{status}'")]
    UnexpectedStatus { run_id: String, status: String },

    #[error("run {0} completed without an assistant message")]
    NoAssistantMessage(String),

    #[error("thread store error: {0}")]
    Store(#[from] StoreError),

    #[error("turn panicked: {0}")]
    Panicked(String),
}
