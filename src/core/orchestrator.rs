//! 轮次编排器
//!
//! 一轮：解析线程 → 追加用户消息 → submit → poll（退避等待）→
//! {requires_action → 逐个分发能力调用 → 一次性回填 → poll}* → completed 取助手回复 →
//! 裁剪上下文 → 刷新摘要 → 持久化（新线程 save，否则 update）→ 追加交互日志。
//!
//! 同一 thread id 的轮次串行执行（ThreadLocks）；不同线程完全并发。
//! 任何失败（服务重试耗尽、Run 失败、未知状态、panic）都在这里降级为固定道歉文本，
//! 线程保持上一次成功持久化时的状态；未走到终态的 Run 会被 cancel 释放。
//! 持久化（线程正文与交互日志一次写入）失败只记日志，已算出的回复照常返回。

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use tokio::task::JoinHandle;

use crate::core::suggest::{suggest_actions, SUGGESTION_WINDOW};
use crate::core::{retry, RetryPolicy, Sleeper, ThreadLocks, TokioSleeper, TurnError, TurnPhase, APOLOGY};
use crate::llm::{CompletionService, RunHandle, RunRequest, RunStatus, ServiceError, Summarizer, ToolCall, ToolOutput};
use crate::memory::{
    new_thread_id, ContextWindow, Interaction, Message, StoreError, Thread, ThreadData,
    ThreadListing, ThreadStore, UserInfo, NO_SUMMARY,
};
use crate::tools::{CapabilityLog, CapabilityRegistry, SkillInvoker};

/// 轮次结束时用于摘要的最近消息条数
const TURN_SUMMARY_MESSAGES: usize = 5;
/// 按需刷新摘要时的最近消息条数
const THREAD_SUMMARY_MESSAGES: usize = 10;

/// 一轮对话的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    pub assistant_text: String,
    /// 每次能力调用一行 `<name> -> <摘要>`，无调用时为空串
    pub capability_log: String,
    pub thread_id: String,
}

impl TurnOutcome {
    pub fn is_apology(&self) -> bool {
        self.assistant_text == APOLOGY
    }
}

/// Run 成功结束后的产物
struct RunResult {
    text: String,
    tool_messages: Vec<Message>,
    capabilities_used: Vec<String>,
}

/// 轮次编排器：长生命周期、显式构建，经 Arc 共享给调用方
pub struct TurnOrchestrator {
    registry: Arc<CapabilityRegistry>,
    service: Arc<dyn CompletionService>,
    store: Arc<dyn ThreadStore>,
    summarizer: Option<Arc<dyn Summarizer>>,
    invoker: SkillInvoker,
    locks: ThreadLocks,
    window: ContextWindow,
    request_policy: RetryPolicy,
    polling_policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    max_tool_rounds: usize,
    instructions: Option<String>,
    summary_timeout: Duration,
}

impl TurnOrchestrator {
    pub fn new(
        registry: CapabilityRegistry,
        service: Arc<dyn CompletionService>,
        store: Arc<dyn ThreadStore>,
    ) -> Self {
        Self {
            registry: Arc::new(registry),
            service,
            store,
            summarizer: None,
            invoker: SkillInvoker::default(),
            locks: ThreadLocks::new(),
            window: ContextWindow::default(),
            request_policy: RetryPolicy::request(),
            polling_policy: RetryPolicy::polling(),
            sleeper: Arc::new(TokioSleeper),
            max_tool_rounds: 20,
            instructions: None,
            summary_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn with_invoker(mut self, invoker: SkillInvoker) -> Self {
        self.invoker = invoker;
        self
    }

    pub fn with_window(mut self, window: ContextWindow) -> Self {
        self.window = window;
        self
    }

    pub fn with_policies(mut self, request: RetryPolicy, polling: RetryPolicy) -> Self {
        self.request_policy = request;
        self.polling_policy = polling;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_max_tool_rounds(mut self, rounds: usize) -> Self {
        self.max_tool_rounds = rounds.max(1);
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn with_summary_timeout(mut self, timeout: Duration) -> Self {
        self.summary_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// 执行一轮对话；永不返回错误、不向外传播 panic
    pub async fn run_turn(
        &self,
        thread_id: Option<&str>,
        user_input: &str,
        user_info: Option<UserInfo>,
    ) -> TurnOutcome {
        let started = Instant::now();
        let lock_id = thread_id.map(str::to_string).unwrap_or_else(new_thread_id);
        let _guard = self.locks.lock(&lock_id).await;

        let mut log = CapabilityLog::new();
        let mut resolved_id = lock_id.clone();
        let result = AssertUnwindSafe(self.execute_turn(
            thread_id,
            &lock_id,
            user_input,
            user_info,
            started,
            &mut log,
            &mut resolved_id,
        ))
        .catch_unwind()
        .await;

        let error = match result {
            Ok(Ok(text)) => {
                tracing::info!(
                    thread_id = %resolved_id,
                    capability_calls = log.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Turn completed"
                );
                return TurnOutcome {
                    assistant_text: text,
                    capability_log: log.to_string(),
                    thread_id: resolved_id,
                };
            }
            Ok(Err(e)) => e,
            Err(panic) => TurnError::Panicked(crate::tools::invoker::panic_message(panic.as_ref())),
        };

        tracing::error!(
            thread_id = %resolved_id,
            error = %error,
            capability_calls = log.len(),
            "Turn failed, returning apology"
        );
        TurnOutcome {
            assistant_text: APOLOGY.to_string(),
            capability_log: log.to_string(),
            thread_id: resolved_id,
        }
    }

    /// 在独立任务中执行一轮，轮询等待不会占用调用方的任务
    pub fn spawn_turn(
        self: &Arc<Self>,
        thread_id: Option<String>,
        user_input: String,
        user_info: Option<UserInfo>,
    ) -> JoinHandle<TurnOutcome> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run_turn(thread_id.as_deref(), &user_input, user_info)
                .await
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_turn(
        &self,
        requested: Option<&str>,
        fresh_id: &str,
        user_input: &str,
        user_info: Option<UserInfo>,
        started: Instant,
        log: &mut CapabilityLog,
        resolved_id: &mut String,
    ) -> Result<String, TurnError> {
        let (mut thread, is_new) = self.resolve_thread(requested, fresh_id, user_info).await?;
        *resolved_id = thread.id.clone();

        thread.data.messages.push(Message::user(user_input));
        let result = self.drive_run(&thread, log).await?;

        thread.data.messages.extend(result.tool_messages);
        thread.data.messages.push(Message::assistant(result.text.clone()));
        let dropped = self.window.trim(&mut thread);
        if dropped > 0 {
            tracing::debug!(thread_id = %thread.id, dropped, "Trimmed context window");
        }
        let recent = tail(thread.messages(), TURN_SUMMARY_MESSAGES).to_vec();
        self.refresh_summary(&mut thread, &recent).await;

        let interaction = Interaction::new(
            user_input,
            result.text.clone(),
            started.elapsed().as_secs_f64(),
            result.capabilities_used,
        );
        self.persist(thread, is_new, interaction).await;
        Ok(result.text)
    }

    /// 未传 id、id 不存在或不合法时新建线程
    async fn resolve_thread(
        &self,
        requested: Option<&str>,
        fresh_id: &str,
        user_info: Option<UserInfo>,
    ) -> Result<(Thread, bool), TurnError> {
        let fresh = |id: String, user_info: Option<UserInfo>| {
            Thread::new(
                id,
                ThreadData::new(Vec::new(), NO_SUMMARY),
                NO_SUMMARY,
                user_info.unwrap_or_else(UserInfo::anonymous),
            )
        };

        let Some(id) = requested else {
            return Ok((fresh(fresh_id.to_string(), user_info), true));
        };
        match self.store.retrieve(id).await {
            Ok(thread) => Ok((thread, false)),
            Err(StoreError::NotFound(_)) | Err(StoreError::InvalidId(_)) => {
                let new_id = new_thread_id();
                tracing::info!(requested = id, thread_id = %new_id, "Thread not found, starting a new one");
                Ok((fresh(new_id, user_info), true))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn drive_run(&self, thread: &Thread, log: &mut CapabilityLog) -> Result<RunResult, TurnError> {
        let request = RunRequest {
            thread_id: thread.id.clone(),
            messages: thread.messages().to_vec(),
            tools: self.registry.list_metadata(),
            instructions: self.instructions.clone(),
        };
        let mut run = self
            .call("submit", || self.service.submit(request.clone()))
            .await?;
        tracing::debug!(run_id = %run.id, thread_id = %run.thread_id, "Run submitted");

        let result = self.advance_run(&mut run, log).await;
        if result.is_err() {
            self.release(&run).await;
        }
        result
    }

    /// 推进 Run 直到 completed；出错时 run 保持最后一次有效的句柄
    async fn advance_run(
        &self,
        run: &mut RunHandle,
        log: &mut CapabilityLog,
    ) -> Result<RunResult, TurnError> {
        let mut phase = TurnPhase::Submitted;
        let mut rounds = 0usize;
        let mut tool_messages = Vec::new();
        let mut capabilities_used = Vec::new();

        loop {
            let status = self.wait_for_progress(run).await?;
            phase = phase.advance(&status);
            tracing::debug!(run_id = %run.id, status = status.label(), ?phase, "Run progressed");

            match status {
                RunStatus::RequiresAction(calls) => {
                    rounds += 1;
                    if rounds > self.max_tool_rounds {
                        return Err(TurnError::TooManyToolRounds {
                            run_id: run.id.clone(),
                            limit: self.max_tool_rounds,
                        });
                    }
                    let outputs = self
                        .dispatch(&calls, log, &mut tool_messages, &mut capabilities_used)
                        .await;
                    let next = self
                        .call("submit_tool_outputs", || {
                            self.service.submit_tool_outputs(run, outputs.clone())
                        })
                        .await?;
                    *run = next;
                }
                RunStatus::Completed => {
                    let text = self.final_text(run).await?;
                    return Ok(RunResult {
                        text,
                        tool_messages,
                        capabilities_used,
                    });
                }
                RunStatus::Failed(reason) => {
                    return Err(TurnError::RunFailed {
                        run_id: run.id.clone(),
                        reason,
                    })
                }
                other => {
                    return Err(TurnError::UnexpectedStatus {
                        run_id: run.id.clone(),
                        status: other.label().to_string(),
                    })
                }
            }
        }
    }

    /// 放弃未到终态的 Run；释放失败只记日志
    async fn release(&self, run: &RunHandle) {
        match self.service.cancel(run).await {
            Ok(()) => tracing::debug!(run_id = %run.id, "Run released"),
            Err(e) => tracing::warn!(run_id = %run.id, error = %e, "Failed to release run"),
        }
    }

    /// 轮询直到 Run 离开 queued / in_progress；等待按轮询退避递增并封顶，总次数有上限
    async fn wait_for_progress(&self, run: &RunHandle) -> Result<RunStatus, TurnError> {
        let mut backoff = self.polling_policy.backoff();
        loop {
            let status = self.call("poll", || self.service.poll(run)).await?;
            if !status.is_pending() {
                return Ok(status);
            }
            match backoff.next() {
                Some(delay) => {
                    tracing::debug!(run_id = %run.id, delay_ms = delay.as_millis() as u64, "Run pending");
                    self.sleeper.sleep(delay).await;
                }
                None => return Err(TurnError::PollTimeout(run.id.clone())),
            }
        }
    }

    /// 按收到的顺序逐个处理能力调用；单个调用的失败只体现在它自己的 output 中
    async fn dispatch(
        &self,
        calls: &[ToolCall],
        log: &mut CapabilityLog,
        tool_messages: &mut Vec<Message>,
        capabilities_used: &mut Vec<String>,
    ) -> Vec<ToolOutput> {
        let mut outputs = Vec::with_capacity(calls.len());
        for call in calls {
            let invocation = match self.registry.lookup(&call.name) {
                Ok(capability) => {
                    capabilities_used.push(call.name.clone());
                    self.invoker
                        .invoke(capability.as_ref(), &call.arguments, log)
                        .await
                }
                Err(_) => self.invoker.unknown(&call.name, log),
            };
            tool_messages.push(Message::tool(&call.name, invocation.output.clone()));
            outputs.push(ToolOutput {
                tool_call_id: call.id.clone(),
                output: invocation.output,
            });
        }
        outputs
    }

    /// 线程消息最新在前，取第一条助手消息
    async fn final_text(&self, run: &RunHandle) -> Result<String, TurnError> {
        let messages = self
            .call("list_messages", || self.service.list_messages(&run.thread_id))
            .await?;
        messages
            .into_iter()
            .find(Message::is_assistant)
            .map(|m| m.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| TurnError::NoAssistantMessage(run.id.clone()))
    }

    /// 对补全服务的单次调用套上请求级重试
    async fn call<T, F, Fut>(&self, label: &str, op: F) -> Result<T, TurnError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        retry(&self.request_policy, self.sleeper.as_ref(), label, op)
            .await
            .map_err(|e| TurnError::Service {
                attempts: e.attempts,
                source: e.last_error,
            })
    }

    /// 摘要失败时保留原摘要
    async fn refresh_summary(&self, thread: &mut Thread, recent: &[Message]) -> bool {
        let Some(summarizer) = &self.summarizer else {
            return false;
        };
        match tokio::time::timeout(self.summary_timeout, summarizer.summarize(recent)).await {
            Ok(Ok(summary)) => {
                thread.summary = summary.clone();
                thread.data.summary = summary;
                true
            }
            Ok(Err(e)) => {
                tracing::warn!(thread_id = %thread.id, "Summary generation failed: {}", e);
                false
            }
            Err(_) => {
                tracing::warn!(thread_id = %thread.id, "Summary generation timed out");
                false
            }
        }
    }

    async fn persist(&self, thread: Thread, is_new: bool, interaction: Interaction) {
        let id = thread.id.clone();
        if let Err(e) = self.store.commit_turn(thread, is_new, interaction).await {
            tracing::error!(thread_id = %id, is_new, error = %e, "Failed to persist turn");
        }
    }

    /// 从 message_id 之前的前缀派生新线程
    pub async fn branch(&self, thread_id: &str, message_id: &str) -> Result<String, StoreError> {
        let _guard = self.locks.lock(thread_id).await;
        let new_id = self.store.branch(thread_id, message_id).await?;
        tracing::info!(source = thread_id, thread_id = %new_id, "Thread branched");
        Ok(new_id)
    }

    pub async fn list_threads(&self) -> Result<Vec<ThreadListing>, StoreError> {
        self.store.list().await
    }

    pub async fn delete_thread(&self, thread_id: &str) -> Result<(), StoreError> {
        let _guard = self.locks.lock(thread_id).await;
        self.store.delete(thread_id).await?;
        tracing::info!(thread_id, "Thread deleted");
        Ok(())
    }

    pub async fn get_thread(&self, thread_id: &str) -> Result<Thread, StoreError> {
        self.store.retrieve(thread_id).await
    }

    pub async fn get_summary(&self, thread_id: &str) -> Result<String, StoreError> {
        Ok(self.store.retrieve(thread_id).await?.summary)
    }

    /// 按最近的消息与线程库给出下一步线程命令建议
    pub async fn suggest_next_action(&self, thread_id: &str) -> Result<Vec<String>, StoreError> {
        let thread = self.store.retrieve(thread_id).await?;
        let threads = self.store.list().await?;
        let recent = tail(thread.messages(), SUGGESTION_WINDOW);
        Ok(suggest_actions(thread_id, recent, &threads))
    }

    /// 按最近 10 条消息重新生成摘要并持久化；生成失败时返回原摘要
    pub async fn summarize_thread(&self, thread_id: &str) -> Result<String, StoreError> {
        let _guard = self.locks.lock(thread_id).await;
        let mut thread = self.store.retrieve(thread_id).await?;
        let recent = tail(thread.messages(), THREAD_SUMMARY_MESSAGES).to_vec();
        if self.refresh_summary(&mut thread, &recent).await {
            self.store
                .update(thread_id, thread.data, &thread.summary)
                .await?;
        }
        Ok(thread.summary)
    }
}

fn tail(messages: &[Message], n: usize) -> &[Message] {
    &messages[messages.len().saturating_sub(n)..]
}
