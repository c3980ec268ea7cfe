//! 重试与退避
//!
//! RetryPolicy 描述 {max_attempts, initial_delay, multiplier, cap}；Backoff 按策略产出递增且封顶的等待时间。
//! `retry` 包裹对补全服务的单次调用：可重试错误按退避等待后重来，耗尽后返回 Exhausted（不 panic、不抛出）。
//! 等待通过 Sleeper 完成，测试中可替换为只记录时长的实现。

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

/// 退避策略
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub cap: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration, multiplier: f64, cap: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            multiplier: if multiplier < 1.0 { 1.0 } else { multiplier },
            cap: cap.max(initial_delay),
        }
    }

    /// 请求级重试：3 次，2s 起步，×2，封顶 8s
    pub fn request() -> Self {
        Self::new(3, Duration::from_secs(2), 2.0, Duration::from_secs(8))
    }

    /// 轮询等待：0.5s 起步，×2，封顶 8s；最多 40 次等待
    pub fn polling() -> Self {
        Self::new(40, Duration::from_millis(500), 2.0, Duration::from_secs(8))
    }

    /// 第 retry_index 次（从 0 开始）等待的时长，封顶 cap
    pub fn delay_for(&self, retry_index: u32) -> Duration {
        let factor = self.multiplier.powi(retry_index.min(32) as i32);
        let secs = self.initial_delay.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.cap.as_secs_f64() {
            self.cap
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    pub fn backoff(&self) -> Backoff {
        Backoff {
            policy: self.clone(),
            issued: 0,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::request()
    }
}

/// 退避序列：最多产出 max_attempts 个等待时长，之后返回 None
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
    issued: u32,
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.issued >= self.policy.max_attempts {
            return None;
        }
        let delay = self.policy.delay_for(self.issued);
        self.issued += 1;
        Some(delay)
    }
}

/// 挂起原语抽象（生产用 tokio::time::sleep）
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// 只记录等待时长、不真正挂起
#[derive(Debug, Default, Clone)]
pub struct RecordingSleeper {
    slept: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recorded(&self) -> Vec<Duration> {
        self.slept.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        if let Ok(mut slept) = self.slept.lock() {
            slept.push(duration);
        }
        tokio::task::yield_now().await;
    }
}

/// 错误是否值得重试
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// 重试失败信号：总尝试次数与最后一次错误
#[derive(Debug)]
pub struct Exhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

/// 按策略执行 op：成功立即返回；可重试错误在未到上限前等待后重试；不可重试错误直接返回
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    label: &str,
    mut op: F,
) -> Result<T, Exhausted<E>>
where
    E: Retryable + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut backoff = policy.backoff();
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if !e.is_retryable() || attempts >= policy.max_attempts {
                    tracing::warn!(
                        call = label,
                        attempts,
                        retryable = e.is_retryable(),
                        "Giving up: {}",
                        e
                    );
                    return Err(Exhausted {
                        attempts,
                        last_error: e,
                    });
                }
                let delay = backoff.next().unwrap_or(policy.cap);
                tracing::warn!(
                    call = label,
                    attempt = attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Error occurred: {}. Retrying",
                    e
                );
                sleeper.sleep(delay).await;
            }
        }
    }
}
