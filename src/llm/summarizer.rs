//! 线程摘要
//!
//! 把最近若干条消息拼成提示，请 LLM 用一句话概括。调用方决定取多少条（轮次结束取 5 条，按需刷新取 10 条）。

use std::sync::Arc;

use async_trait::async_trait;

use crate::llm::LlmClient;
use crate::memory::Message;

const SUMMARY_PROMPT: &str = "Briefly summarize the following conversation in one sentence:";

/// 摘要生成器
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, messages: &[Message]) -> Result<String, String>;
}

/// 基于 LlmClient 的摘要生成器
pub struct LlmSummarizer {
    llm: Arc<dyn LlmClient>,
}

impl LlmSummarizer {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

/// 摘要提示：`<role>: <content>` 逐行列出
pub fn summary_prompt(messages: &[Message]) -> String {
    let mut prompt = String::from(SUMMARY_PROMPT);
    prompt.push_str("\n\n");
    for m in messages {
        prompt.push_str(m.role.as_str());
        prompt.push_str(": ");
        prompt.push_str(&m.content);
        prompt.push('\n');
    }
    prompt
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize(&self, messages: &[Message]) -> Result<String, String> {
        if messages.is_empty() {
            return Err("nothing to summarize".to_string());
        }
        let reply = self
            .llm
            .complete(&[Message::user(summary_prompt(messages))])
            .await?;
        let reply = reply.trim();
        if reply.is_empty() {
            Err("empty summary".to_string())
        } else {
            Ok(reply.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;

    #[test]
    fn test_prompt_lists_roles() {
        let prompt = summary_prompt(&[Message::user("hi"), Message::assistant("hello")]);
        assert!(prompt.starts_with(SUMMARY_PROMPT));
        assert!(prompt.contains("user: hi\n"));
        assert!(prompt.ends_with("assistant: hello\n"));
    }

    #[tokio::test]
    async fn test_llm_summarizer() {
        let summarizer = LlmSummarizer::new(Arc::new(MockLlmClient));
        let summary = summarizer
            .summarize(&[Message::user("tell me a joke"), Message::assistant("ha")])
            .await
            .unwrap();
        assert_eq!(summary, "Conversation about: assistant: ha");
        assert!(summarizer.summarize(&[]).await.is_err());
    }
}
