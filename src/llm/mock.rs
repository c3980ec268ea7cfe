//! Mock 后端（用于测试与无 API Key 的本地运行）
//!
//! MockCompletionService 按脚本逐步回放：每一步先报告若干次 queued / in_progress，
//! 再给出文本（completed）、能力调用（requires_action）或失败。脚本耗尽后回显用户最后一条消息。
//! 另可注入 submit / poll 的瞬时失败，用于验证重试。

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::llm::{
    CompletionService, LlmClient, RunHandle, RunRequest, RunStatus, ServiceError, ToolCall,
    ToolOutput,
};
use crate::memory::{Message, Role};

/// 脚本中的一步
#[derive(Debug, Clone)]
pub enum MockStep {
    Reply(String),
    Call(Vec<ToolCall>),
    Fail(String),
}

impl MockStep {
    /// 单个能力调用；arguments 以 JSON 字符串形式下发，与真实服务一致
    pub fn call(name: &str, arguments: Value) -> Self {
        MockStep::Call(vec![mock_call(name, arguments)])
    }
}

static CALL_SEQ: AtomicU64 = AtomicU64::new(1);

/// 构造一个能力调用；对象参数会被序列化为字符串，字符串参数原样保留
pub fn mock_call(name: &str, arguments: Value) -> ToolCall {
    let arguments = match arguments {
        Value::String(_) => arguments,
        other => Value::String(other.to_string()),
    };
    ToolCall {
        id: format!("call_{}", CALL_SEQ.fetch_add(1, Ordering::Relaxed)),
        name: name.to_string(),
        arguments,
    }
}

#[derive(Debug)]
struct MockRun {
    thread_id: String,
    last_user: String,
    pending_polls: usize,
    current: Option<MockStep>,
}

/// 脚本化补全服务
#[derive(Debug, Default)]
pub struct MockCompletionService {
    script: Mutex<VecDeque<MockStep>>,
    pending_polls: usize,
    submit_failures: Mutex<u32>,
    poll_failures: Mutex<u32>,
    runs: Mutex<HashMap<String, MockRun>>,
    threads: Mutex<HashMap<String, Vec<Message>>>,
    submissions: Mutex<Vec<RunRequest>>,
    outputs: Mutex<Vec<Vec<ToolOutput>>>,
    cancelled: Mutex<Vec<String>>,
    polls: AtomicU64,
}

impl MockCompletionService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(steps: Vec<MockStep>) -> Self {
        Self {
            script: Mutex::new(steps.into()),
            ..Self::default()
        }
    }

    /// 每一步在给出结果前报告 n 次未完成
    pub fn with_pending_polls(mut self, n: usize) -> Self {
        self.pending_polls = n;
        self
    }

    /// 前 n 次 submit 返回瞬时错误
    pub fn with_submit_failures(self, n: u32) -> Self {
        Self {
            submit_failures: Mutex::new(n),
            ..self
        }
    }

    /// 前 n 次 poll 返回瞬时错误
    pub fn with_poll_failures(self, n: u32) -> Self {
        Self {
            poll_failures: Mutex::new(n),
            ..self
        }
    }

    pub async fn submissions(&self) -> Vec<RunRequest> {
        self.submissions.lock().await.clone()
    }

    /// 每次 submit_tool_outputs 回填的批次
    pub async fn tool_outputs(&self) -> Vec<Vec<ToolOutput>> {
        self.outputs.lock().await.clone()
    }

    pub fn poll_count(&self) -> u64 {
        self.polls.load(Ordering::Relaxed)
    }

    /// 被 cancel 释放的 Run id
    pub async fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().await.clone()
    }

    /// 尚未释放的 Run 数
    pub async fn open_runs(&self) -> usize {
        self.runs.lock().await.len()
    }

    async fn take_failure(counter: &Mutex<u32>) -> bool {
        let mut left = counter.lock().await;
        if *left > 0 {
            *left -= 1;
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl CompletionService for MockCompletionService {
    async fn submit(&self, request: RunRequest) -> Result<RunHandle, ServiceError> {
        self.submissions.lock().await.push(request.clone());
        if Self::take_failure(&self.submit_failures).await {
            return Err(ServiceError::Unavailable {
                status: 503,
                message: "mock submit failure".to_string(),
            });
        }
        let last_user = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let handle = RunHandle {
            id: format!("run_mock_{}", uuid::Uuid::new_v4().simple()),
            thread_id: request.thread_id,
        };
        self.runs.lock().await.insert(
            handle.id.clone(),
            MockRun {
                thread_id: handle.thread_id.clone(),
                last_user,
                pending_polls: self.pending_polls,
                current: None,
            },
        );
        Ok(handle)
    }

    async fn poll(&self, run: &RunHandle) -> Result<RunStatus, ServiceError> {
        self.polls.fetch_add(1, Ordering::Relaxed);
        if Self::take_failure(&self.poll_failures).await {
            return Err(ServiceError::Transport("mock poll failure".to_string()));
        }

        let mut runs = self.runs.lock().await;
        let state = runs
            .get_mut(&run.id)
            .ok_or_else(|| ServiceError::UnknownRun(run.id.clone()))?;
        if state.pending_polls > 0 {
            let status = if state.pending_polls > 1 {
                RunStatus::Queued
            } else {
                RunStatus::InProgress
            };
            state.pending_polls -= 1;
            return Ok(status);
        }

        if state.current.is_none() {
            let next = self.script.lock().await.pop_front();
            let step = next.unwrap_or_else(|| MockStep::Reply(format!("Echo: {}", state.last_user)));
            if let MockStep::Reply(text) = &step {
                self.threads
                    .lock()
                    .await
                    .entry(state.thread_id.clone())
                    .or_default()
                    .push(Message::assistant(text.clone()));
            }
            state.current = Some(step);
        }

        Ok(match &state.current {
            Some(MockStep::Call(calls)) => RunStatus::RequiresAction(calls.clone()),
            Some(MockStep::Fail(reason)) => RunStatus::Failed(reason.clone()),
            _ => RunStatus::Completed,
        })
    }

    async fn submit_tool_outputs(
        &self,
        run: &RunHandle,
        outputs: Vec<ToolOutput>,
    ) -> Result<RunHandle, ServiceError> {
        let mut runs = self.runs.lock().await;
        let state = runs
            .get_mut(&run.id)
            .ok_or_else(|| ServiceError::UnknownRun(run.id.clone()))?;
        if !matches!(state.current, Some(MockStep::Call(_))) {
            return Err(ServiceError::NotAwaitingOutputs {
                run_id: run.id.clone(),
            });
        }
        state.current = None;
        state.pending_polls = self.pending_polls;
        self.outputs.lock().await.push(outputs);
        Ok(run.clone())
    }

    async fn list_messages(&self, thread_id: &str) -> Result<Vec<Message>, ServiceError> {
        Ok(self
            .threads
            .lock()
            .await
            .get(thread_id)
            .map(|msgs| msgs.iter().rev().cloned().collect())
            .unwrap_or_default())
    }

    async fn cancel(&self, run: &RunHandle) -> Result<(), ServiceError> {
        if self.runs.lock().await.remove(&run.id).is_some() {
            self.cancelled.lock().await.push(run.id.clone());
        }
        Ok(())
    }
}

/// Mock LLM：给出确定性的一句话摘要
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        let prompt = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("");
        let topic: String = prompt
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("(empty)")
            .chars()
            .take(60)
            .collect();
        Ok(format!("Conversation about: {}", topic.trim()))
    }
}
