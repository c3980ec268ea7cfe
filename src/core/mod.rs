//! 核心编排层：轮次编排器、Run 状态、重试退避、线程级串行化、线程命令建议、错误类型、构建器

pub mod builder;
pub mod error;
pub mod orchestrator;
pub mod retry;
pub mod state;
pub mod suggest;
pub mod supervisor;

pub use builder::HiveBuilder;
pub use error::{TurnError, APOLOGY};
pub use orchestrator::{TurnOrchestrator, TurnOutcome};
pub use retry::{
    retry, Backoff, Exhausted, RecordingSleeper, RetryPolicy, Retryable, Sleeper, TokioSleeper,
};
pub use state::TurnPhase;
pub use suggest::suggest_actions;
pub use supervisor::{ThreadGuard, ThreadLocks};
