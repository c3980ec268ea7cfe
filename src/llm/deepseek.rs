//! DeepSeek 预设（OpenAI 兼容格式）
//!
//! - Base URL: https://api.deepseek.com
//! - 模型: deepseek-chat (常规对话), deepseek-reasoner (思考模式，不支持能力调用)

pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const DEEPSEEK_CHAT: &str = "deepseek-chat";
pub const DEEPSEEK_REASONER: &str = "deepseek-reasoner";

/// DeepSeek API Key：优先 `DEEPSEEK_API_KEY`，其次 `OPENAI_API_KEY`
pub fn deepseek_api_key() -> Option<String> {
    std::env::var("DEEPSEEK_API_KEY")
        .ok()
        .or_else(|| std::env::var("OPENAI_API_KEY").ok())
        .filter(|k| !k.trim().is_empty())
}

/// 配置中的模型名若仍是 OpenAI 默认值，则换成 deepseek-chat；`DEEPSEEK_MODEL` 优先。
/// deepseek-reasoner 不支持能力调用，同样退回 deepseek-chat。
pub fn deepseek_model(configured: &str) -> String {
    let model = match std::env::var("DEEPSEEK_MODEL") {
        Ok(model) => model,
        Err(_) if configured.starts_with("deepseek") => configured.to_string(),
        Err(_) => DEEPSEEK_CHAT.to_string(),
    };
    if model == DEEPSEEK_REASONER {
        tracing::warn!("{} does not support tool calls, using {}", DEEPSEEK_REASONER, DEEPSEEK_CHAT);
        return DEEPSEEK_CHAT.to_string();
    }
    model
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_resolution() {
        if std::env::var("DEEPSEEK_MODEL").is_ok() {
            return;
        }
        assert_eq!(deepseek_model("gpt-4o"), DEEPSEEK_CHAT);
        assert_eq!(deepseek_model("deepseek-chat"), DEEPSEEK_CHAT);
        assert_eq!(deepseek_model(DEEPSEEK_REASONER), DEEPSEEK_CHAT);
        assert_eq!(deepseek_model("deepseek-coder"), "deepseek-coder");
    }
}
