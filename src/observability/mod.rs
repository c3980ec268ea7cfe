//! 可观测性：日志初始化
//!
//! 默认 info 级别，可通过 RUST_LOG 覆盖（如 `RUST_LOG=hive=debug`）。
//! 能力调用审计记录以 `event = "capability_audit"` 的 JSON 字段输出。

use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*, EnvFilter};

/// 安装全局日志订阅者；只应由二进制入口调用一次，重复调用静默忽略
pub fn init() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .try_init();
}
