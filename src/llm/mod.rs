//! LLM 层：补全服务协议与实现（OpenAI 兼容 / DeepSeek / Mock），摘要生成

pub mod chat_run;
pub mod deepseek;
pub mod mock;
pub mod openai;
pub mod service;
pub mod summarizer;
pub mod traits;

pub use chat_run::{ChatRunService, OPENAI_BASE_URL};
pub use deepseek::{deepseek_api_key, deepseek_model, DEEPSEEK_BASE_URL, DEEPSEEK_CHAT, DEEPSEEK_REASONER};
pub use mock::{mock_call, MockCompletionService, MockLlmClient, MockStep};
pub use openai::{OpenAiClient, TokenUsage};
pub use service::{
    CompletionService, RunHandle, RunRequest, RunStatus, ServiceError, ToolCall, ToolOutput,
};
pub use summarizer::{summary_prompt, LlmSummarizer, Summarizer};
pub use traits::LlmClient;
