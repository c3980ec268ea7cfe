//! 编排器构建器：按配置装配注册表、补全服务、摘要器与线程存储
//!
//! 后端选择：provider=mock 或缺少 API Key 时用 Mock；deepseek 走 DeepSeek 预设端点；其余走 OpenAI 兼容端点。

use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::core::{Sleeper, TurnOrchestrator};
use crate::llm::{
    deepseek_api_key, deepseek_model, ChatRunService, CompletionService, LlmClient, LlmSummarizer,
    MockCompletionService, MockLlmClient, OpenAiClient, Summarizer, DEEPSEEK_BASE_URL,
};
use crate::memory::{create_thread_store, ContextWindow, ThreadStore};
use crate::tools::{
    Capability, CapabilityError, CapabilityRegistry, ClockCapability, EchoCapability, SkillInvoker,
};

/// 编排器构建器：默认注册内置能力，组件均可替换
pub struct HiveBuilder {
    config: AppConfig,
    registry: CapabilityRegistry,
    builtins: bool,
    service: Option<Arc<dyn CompletionService>>,
    summarizer: Option<Arc<dyn Summarizer>>,
    store: Option<Arc<dyn ThreadStore>>,
    sleeper: Option<Arc<dyn Sleeper>>,
}

impl HiveBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            registry: CapabilityRegistry::new(),
            builtins: true,
            service: None,
            summarizer: None,
            store: None,
            sleeper: None,
        }
    }

    /// 注册能力（同名时后注册者生效）
    pub fn capability(mut self, capability: impl Capability + 'static) -> Result<Self, CapabilityError> {
        self.registry.register(capability)?;
        Ok(self)
    }

    /// 不注册 echo / clock
    pub fn without_builtins(mut self) -> Self {
        self.builtins = false;
        self
    }

    pub fn with_service(mut self, service: Arc<dyn CompletionService>) -> Self {
        self.service = Some(service);
        self
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn ThreadStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = Some(sleeper);
        self
    }

    /// 内置能力先注册，调用方注册的同名能力覆盖内置实现
    fn build_registry(&mut self) -> Result<CapabilityRegistry, CapabilityError> {
        let custom = std::mem::take(&mut self.registry);
        if !self.builtins {
            return Ok(custom);
        }
        let mut registry = CapabilityRegistry::new();
        registry.register(EchoCapability)?;
        registry.register(ClockCapability)?;
        for name in custom.names() {
            registry.register_arc(custom.lookup(&name)?)?;
        }
        Ok(registry)
    }

    /// 根据配置与环境变量选择补全服务与摘要 LLM
    fn build_backends(&self) -> anyhow::Result<(Arc<dyn CompletionService>, Arc<dyn LlmClient>)> {
        let llm = &self.config.llm;
        let provider = llm.provider.to_lowercase();
        let timeout = llm.timeouts.request;

        let credentials = match provider.as_str() {
            "mock" => None,
            "deepseek" => deepseek_api_key().map(|key| {
                (
                    llm.base_url.clone().unwrap_or_else(|| DEEPSEEK_BASE_URL.to_string()),
                    deepseek_model(&llm.model),
                    key,
                )
            }),
            _ => std::env::var("OPENAI_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty())
                .map(|key| {
                    (
                        llm.base_url
                            .clone()
                            .unwrap_or_else(|| crate::llm::OPENAI_BASE_URL.to_string()),
                        llm.model.clone(),
                        key,
                    )
                }),
        };

        let Some((base_url, model, key)) = credentials else {
            if provider != "mock" {
                tracing::warn!("No API key set for provider '{}', using Mock backend", provider);
            }
            return Ok((Arc::new(MockCompletionService::new()), Arc::new(MockLlmClient)));
        };

        tracing::info!("Using {} backend ({}) at {}", provider, model, base_url);
        let service = ChatRunService::new(Some(&base_url), &model, &key, timeout)?;
        let client = OpenAiClient::new(Some(&base_url), &model, &key);
        Ok((Arc::new(service), Arc::new(client)))
    }

    pub fn build(mut self) -> anyhow::Result<TurnOrchestrator> {
        let registry = self.build_registry()?;
        let (default_service, default_llm) = self.build_backends()?;
        let service = self.service.take().unwrap_or(default_service);
        let summarizer = self
            .summarizer
            .take()
            .unwrap_or_else(|| Arc::new(LlmSummarizer::new(default_llm)));
        let store = self
            .store
            .take()
            .unwrap_or_else(|| create_thread_store(&self.config.store));

        let cfg = &self.config;
        tracing::info!(
            capabilities = registry.len(),
            context_window = cfg.app.context_window,
            "Building turn orchestrator"
        );
        let mut orchestrator = TurnOrchestrator::new(registry, service, store)
            .with_summarizer(summarizer)
            .with_invoker(SkillInvoker::new(cfg.tools.tool_timeout_secs))
            .with_window(ContextWindow::new(cfg.app.context_window))
            .with_policies(cfg.retry.request.to_policy(), cfg.retry.polling.to_policy())
            .with_max_tool_rounds(cfg.tools.max_tool_rounds)
            .with_instructions(cfg.app.instructions())
            .with_summary_timeout(Duration::from_secs(cfg.llm.timeouts.request));
        if let Some(sleeper) = self.sleeper.take() {
            orchestrator = orchestrator.with_sleeper(sleeper);
        }
        Ok(orchestrator)
    }
}
