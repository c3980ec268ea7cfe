//! Hive - Rust 对话轮次编排引擎
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 轮次编排器、重试退避、线程级串行化、错误分类、组件构建
//! - **llm**: 外部补全服务协议（Run / Tool Call）与实现（OpenAI 兼容 / Mock），摘要 LLM
//! - **memory**: 消息、线程数据模型、上下文窗口裁剪、线程存储（文件 / 内存）
//! - **observability**: 日志初始化
//! - **tools**: 能力注册表、技能调用适配器、内置能力（echo、clock）

pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod tools;

pub use crate::core::{HiveBuilder, TurnOrchestrator, TurnOutcome};
