//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__LLM__PROVIDER=openai`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::RetryPolicy;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub tools: ToolsSection,
    #[serde(default)]
    pub store: StoreSection,
}

/// [app] 段：助手名、人设、上下文窗口、回复长度上限
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_persona")]
    pub persona: String,
    #[serde(default)]
    pub characteristic_description: String,
    /// 每个线程保留的最近消息条数
    #[serde(default = "default_context_window")]
    pub context_window: usize,
    /// 写入 run instructions 的回复 token 上限
    #[serde(default = "default_max_response_tokens")]
    pub max_response_tokens: u32,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: default_name(),
            persona: default_persona(),
            characteristic_description: String::new(),
            context_window: default_context_window(),
            max_response_tokens: default_max_response_tokens(),
        }
    }
}

fn default_name() -> String {
    "Hive".to_string()
}

fn default_persona() -> String {
    "You are a helpful assistant.".to_string()
}

fn default_context_window() -> usize {
    10
}

fn default_max_response_tokens() -> u32 {
    100
}

impl AppSection {
    /// 拼出每次提交给补全服务的 instructions
    pub fn instructions(&self) -> String {
        let persona = format!("{} {}", self.persona, self.characteristic_description);
        format!(
            "{}\nRespond concisely. Your response should not exceed {} tokens.",
            persona.trim(),
            self.max_response_tokens
        )
    }
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：openai / deepseek / mock；无 API Key 时退回 mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    60
}

/// [retry] 段：请求级重试与轮询退避两套策略
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_request_backoff")]
    pub request: BackoffSection,
    #[serde(default = "default_polling_backoff")]
    pub polling: BackoffSection,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            request: default_request_backoff(),
            polling: default_polling_backoff(),
        }
    }
}

/// 单套退避参数（毫秒）
#[derive(Debug, Clone, Deserialize)]
pub struct BackoffSection {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl BackoffSection {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.initial_delay_ms),
            self.multiplier,
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_request_backoff() -> BackoffSection {
    BackoffSection {
        max_attempts: 3,
        initial_delay_ms: 2_000,
        multiplier: default_multiplier(),
        max_delay_ms: 8_000,
    }
}

fn default_polling_backoff() -> BackoffSection {
    BackoffSection {
        max_attempts: 40,
        initial_delay_ms: 500,
        multiplier: default_multiplier(),
        max_delay_ms: 8_000,
    }
}

/// [tools] 段：单次能力调用超时、单轮最多 requires_action 次数
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
            max_tool_rounds: default_max_tool_rounds(),
        }
    }
}

fn default_tool_timeout_secs() -> u64 {
    30
}

fn default_max_tool_rounds() -> usize {
    20
}

/// 线程存储后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    File,
    Memory,
}

/// [store] 段：后端与文件存储目录
#[derive(Debug, Clone, Deserialize)]
pub struct StoreSection {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("data/threads")
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
