//! OpenAI 兼容 chat/completions 上的 Run 协议
//!
//! submit 只登记 Run（不发请求）；poll 时对处于 pending 的 Run 发起一次 /chat/completions：
//! 返回 tool_calls → requires_action；返回文本 → completed，并把回复记入线程消息。
//! HTTP 失败时 Run 保持 pending，同一次 poll 可被重试。
//! Run 在终态或 cancel 时释放；回复由 list_messages 取走后即从缓冲中移除。
//! 历史能力结果以 `function` 角色（带 name）发送；本 Run 内的回填以 `tool` 角色（带 tool_call_id）发送。

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::llm::{CompletionService, RunHandle, RunRequest, RunStatus, ServiceError, ToolCall, ToolOutput};
use crate::memory::{Message, Role};
use crate::tools::CapabilityMetadata;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// 每个线程在被 list_messages 取走前最多缓冲的回复条数
const REPLIES_PER_THREAD: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
}

impl WireMessage {
    fn text(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content.into()),
            name: None,
            tool_call_id: None,
            tool_calls: Vec::new(),
        }
    }
}

impl From<&Message> for WireMessage {
    fn from(m: &Message) -> Self {
        match m.role {
            Role::User => WireMessage::text("user", m.content.clone()),
            Role::Assistant => WireMessage::text("assistant", m.content.clone()),
            Role::Tool => WireMessage {
                name: Some(m.name.clone().unwrap_or_else(|| "capability".to_string())),
                ..WireMessage::text("function", m.content.clone())
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: WireFunctionCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Clone, Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    kind: String,
    function: CapabilityMetadata,
}

fn function_kind() -> String {
    "function".to_string()
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [WireMessage],
    #[serde(skip_serializing_if = "no_tools")]
    tools: &'a [WireTool],
}

fn no_tools(tools: &&[WireTool]) -> bool {
    tools.is_empty()
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: WireMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Clone)]
enum RunPhase {
    Pending,
    AwaitingOutputs(Vec<ToolCall>),
}

#[derive(Debug, Clone)]
struct RunState {
    thread_id: String,
    transcript: Vec<WireMessage>,
    tools: Vec<WireTool>,
    phase: RunPhase,
}

/// 基于 chat/completions 的补全服务（OpenAI / DeepSeek / 自建兼容端点）
pub struct ChatRunService {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    runs: Mutex<HashMap<String, RunState>>,
    replies: Mutex<HashMap<String, Vec<Message>>>,
}

impl ChatRunService {
    pub fn new(
        base_url: Option<&str>,
        model: &str,
        api_key: &str,
        request_timeout_secs: u64,
    ) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(request_timeout_secs))
            .build()
            .map_err(|e| ServiceError::Rejected {
                status: 0,
                message: e.to_string(),
            })?;
        let base = base_url.unwrap_or(OPENAI_BASE_URL).trim_end_matches('/');
        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", base),
            api_key: api_key.to_string(),
            model: model.to_string(),
            runs: Mutex::new(HashMap::new()),
            replies: Mutex::new(HashMap::new()),
        })
    }

    async fn chat(
        &self,
        transcript: &[WireMessage],
        tools: &[WireTool],
    ) -> Result<ChatResponse, ServiceError> {
        let body = ChatRequest {
            model: &self.model,
            messages: transcript,
            tools,
        };
        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ServiceError::from_status(status.as_u16(), text));
        }
        resp.json::<ChatResponse>()
            .await
            .map_err(|e| ServiceError::InvalidResponse(e.to_string()))
    }

    async fn remember_reply(&self, thread_id: &str, text: &str) {
        let mut replies = self.replies.lock().await;
        let list = replies.entry(thread_id.to_string()).or_default();
        list.push(Message::assistant(text));
        if list.len() > REPLIES_PER_THREAD {
            let excess = list.len() - REPLIES_PER_THREAD;
            list.drain(..excess);
        }
    }
}

fn build_transcript(request: &RunRequest) -> Vec<WireMessage> {
    let mut transcript = Vec::with_capacity(request.messages.len() + 1);
    if let Some(instructions) = &request.instructions {
        transcript.push(WireMessage::text("system", instructions.clone()));
    }
    transcript.extend(request.messages.iter().map(WireMessage::from));
    transcript
}

fn build_tools(metadata: &[CapabilityMetadata]) -> Vec<WireTool> {
    metadata
        .iter()
        .map(|m| WireTool {
            kind: function_kind(),
            function: m.clone(),
        })
        .collect()
}

fn to_tool_calls(calls: &[WireToolCall]) -> Vec<ToolCall> {
    calls
        .iter()
        .map(|c| ToolCall {
            id: c.id.clone(),
            name: c.function.name.clone(),
            arguments: Value::String(c.function.arguments.clone()),
        })
        .collect()
}

#[async_trait]
impl CompletionService for ChatRunService {
    async fn submit(&self, request: RunRequest) -> Result<RunHandle, ServiceError> {
        let handle = RunHandle {
            id: format!("run_{}", uuid::Uuid::new_v4().simple()),
            thread_id: request.thread_id.clone(),
        };
        let state = RunState {
            thread_id: request.thread_id.clone(),
            transcript: build_transcript(&request),
            tools: build_tools(&request.tools),
            phase: RunPhase::Pending,
        };
        self.runs.lock().await.insert(handle.id.clone(), state);
        tracing::debug!(run_id = %handle.id, thread_id = %handle.thread_id, "Run submitted");
        Ok(handle)
    }

    async fn poll(&self, run: &RunHandle) -> Result<RunStatus, ServiceError> {
        let (transcript, tools) = {
            let runs = self.runs.lock().await;
            let state = runs
                .get(&run.id)
                .ok_or_else(|| ServiceError::UnknownRun(run.id.clone()))?;
            match &state.phase {
                RunPhase::AwaitingOutputs(calls) => {
                    return Ok(RunStatus::RequiresAction(calls.clone()))
                }
                RunPhase::Pending => (state.transcript.clone(), state.tools.clone()),
            }
        };

        let response = self.chat(&transcript, &tools).await?;
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ServiceError::InvalidResponse("response has no choices".to_string()))?;

        let mut runs = self.runs.lock().await;
        let Some(state) = runs.get_mut(&run.id) else {
            return Err(ServiceError::UnknownRun(run.id.clone()));
        };

        if !choice.message.tool_calls.is_empty() {
            let calls = to_tool_calls(&choice.message.tool_calls);
            state.transcript.push(choice.message);
            state.phase = RunPhase::AwaitingOutputs(calls.clone());
            return Ok(RunStatus::RequiresAction(calls));
        }

        // 终态只报告一次，随后释放 Run
        let thread_id = state.thread_id.clone();
        runs.remove(&run.id);
        drop(runs);

        if choice.finish_reason.as_deref() == Some("content_filter") {
            return Ok(RunStatus::Failed("response blocked by content filter".to_string()));
        }
        let text = choice.message.content.unwrap_or_default();
        self.remember_reply(&thread_id, &text).await;
        Ok(RunStatus::Completed)
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
        if !matches!(state.phase, RunPhase::AwaitingOutputs(_)) {
            return Err(ServiceError::NotAwaitingOutputs {
                run_id: run.id.clone(),
            });
        }
        for output in outputs {
            state.transcript.push(WireMessage {
                tool_call_id: Some(output.tool_call_id),
                ..WireMessage::text("tool", output.output)
            });
        }
        state.phase = RunPhase::Pending;
        Ok(run.clone())
    }

    /// 取走线程上缓冲的回复（最新在前）
    async fn list_messages(&self, thread_id: &str) -> Result<Vec<Message>, ServiceError> {
        let mut replies = self.replies.lock().await;
        Ok(replies
            .remove(thread_id)
            .map(|list| list.into_iter().rev().collect())
            .unwrap_or_default())
    }

    async fn cancel(&self, run: &RunHandle) -> Result<(), ServiceError> {
        if self.runs.lock().await.remove(&run.id).is_some() {
            tracing::debug!(run_id = %run.id, thread_id = %run.thread_id, "Run cancelled");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{RecordingSleeper, TurnOrchestrator};
    use crate::memory::MemoryThreadStore;
    use crate::tools::CapabilityRegistry;
    use serde_json::json;
    use std::sync::Arc;

    fn service() -> ChatRunService {
        ChatRunService::new(Some("http://127.0.0.1:9/v1/"), "test-model", "sk-test", 2).unwrap()
    }

    fn request() -> RunRequest {
        RunRequest {
            thread_id: "thread_1".into(),
            messages: vec![
                Message::user("what time is it?"),
                Message::tool("clock", "Monday"),
                Message::assistant("It is Monday."),
            ],
            tools: vec![CapabilityMetadata {
                name: "clock".into(),
                description: "current time".into(),
                parameters: json!({"type": "object", "properties": {}, "required": []}),
            }],
            instructions: Some("Respond concisely.".into()),
        }
    }

    #[test]
    fn test_endpoint_strips_trailing_slash() {
        assert_eq!(service().endpoint, "http://127.0.0.1:9/v1/chat/completions");
    }

    #[test]
    fn test_transcript_roles() {
        let transcript = build_transcript(&request());
        let roles: Vec<&str> = transcript.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "function", "assistant"]);
        assert_eq!(transcript[2].name.as_deref(), Some("clock"));

        let wire = serde_json::to_value(&transcript[1]).unwrap();
        assert!(wire.get("tool_calls").is_none());
        assert!(wire.get("name").is_none());
    }

    #[test]
    fn test_tools_payload_shape() {
        let tools = build_tools(&request().tools);
        let wire = serde_json::to_value(&tools).unwrap();
        assert_eq!(wire[0]["type"], "function");
        assert_eq!(wire[0]["function"]["name"], "clock");
        assert_eq!(wire[0]["function"]["parameters"]["type"], "object");
    }

    #[test]
    fn test_parse_tool_call_response() {
        let raw = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "echo", "arguments": "{\"text\":\"hi\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        });
        let resp: ChatResponse = serde_json::from_value(raw).unwrap();
        let calls = to_tool_calls(&resp.choices[0].message.tool_calls);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "echo");
        assert_eq!(calls[0].arguments, json!("{\"text\":\"hi\"}"));
    }

    #[tokio::test]
    async fn test_tool_outputs_require_pending_action() {
        let svc = service();
        let run = svc.submit(request()).await.unwrap();
        let err = svc
            .submit_tool_outputs(
                &run,
                vec![ToolOutput {
                    tool_call_id: "call_1".into(),
                    output: "x".into(),
                }],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotAwaitingOutputs { .. }));

        {
            let mut runs = svc.runs.lock().await;
            let state = runs.get_mut(&run.id).unwrap();
            state.phase = RunPhase::AwaitingOutputs(vec![]);
        }
        svc.submit_tool_outputs(
            &run,
            vec![ToolOutput {
                tool_call_id: "call_1".into(),
                output: "x".into(),
            }],
        )
        .await
        .unwrap();
        let runs = svc.runs.lock().await;
        let last = runs[&run.id].transcript.last().unwrap().clone();
        assert_eq!(last.role, "tool");
        assert_eq!(last.tool_call_id.as_deref(), Some("call_1"));
    }

    #[tokio::test]
    async fn test_unknown_run() {
        let svc = service();
        let ghost = RunHandle {
            id: "run_missing".into(),
            thread_id: "t".into(),
        };
        assert!(matches!(
            svc.poll(&ghost).await,
            Err(ServiceError::UnknownRun(_))
        ));
        assert!(svc.list_messages("t").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_replies_newest_first_and_drained() {
        let svc = service();
        svc.remember_reply("t", "first").await;
        svc.remember_reply("t", "second").await;
        let msgs = svc.list_messages("t").await.unwrap();
        assert_eq!(msgs[0].content, "second");
        assert_eq!(msgs[1].content, "first");

        assert!(svc.list_messages("t").await.unwrap().is_empty());
        assert!(svc.replies.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_replies_capped_per_thread() {
        let svc = service();
        for i in 0..REPLIES_PER_THREAD + 5 {
            svc.remember_reply("t", &format!("r{i}")).await;
        }
        let msgs = svc.list_messages("t").await.unwrap();
        assert_eq!(msgs.len(), REPLIES_PER_THREAD);
        assert_eq!(msgs[0].content, format!("r{}", REPLIES_PER_THREAD + 4));
    }

    #[tokio::test]
    async fn test_cancel_releases_run() {
        let svc = service();
        let run = svc.submit(request()).await.unwrap();
        assert_eq!(svc.runs.lock().await.len(), 1);

        svc.cancel(&run).await.unwrap();
        assert!(svc.runs.lock().await.is_empty());
        assert!(matches!(svc.poll(&run).await, Err(ServiceError::UnknownRun(_))));
        // 重复 cancel 不报错
        svc.cancel(&run).await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_leaves_no_runs_behind() {
        let svc = Arc::new(service());
        let store = Arc::new(MemoryThreadStore::new());
        let orchestrator = TurnOrchestrator::new(CapabilityRegistry::new(), svc.clone(), store)
            .with_sleeper(Arc::new(RecordingSleeper::new()));

        for i in 0..5 {
            let outcome = orchestrator.run_turn(None, &format!("hello {i}"), None).await;
            assert!(outcome.is_apology());
        }
        assert!(svc.runs.lock().await.is_empty());
        assert!(svc.replies.lock().await.is_empty());
    }
}
