//! 线程级串行化
//!
//! 同一 thread id 的轮次与写操作必须串行；不同 thread id 完全并发。
//! ThreadLocks 为每个 id 懒创建一把 tokio Mutex，持有 ThreadGuard 期间其它同 id 请求排队等待。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// 持有期间独占对应 thread id
pub type ThreadGuard = OwnedMutexGuard<()>;

/// 按 thread id 分片的锁集合，可 clone 共享
#[derive(Debug, Default, Clone)]
pub struct ThreadLocks {
    slots: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl ThreadLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取 thread_id 的独占权；顺带清理已无人持有的空闲槽位
    pub async fn lock(&self, thread_id: &str) -> ThreadGuard {
        let slot = {
            let mut slots = self.slots.lock().await;
            slots.retain(|id, slot| id == thread_id || Arc::strong_count(slot) > 1);
            slots
                .entry(thread_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        slot.lock_owned().await
    }

    /// 当前登记的槽位数（含正在等待者）
    pub async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_id_is_serialized() {
        let locks = ThreadLocks::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let locks = locks.clone();
            let inside = inside.clone();
            let max_inside = max_inside.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock("thread_a").await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_different_ids_do_not_block() {
        let locks = ThreadLocks::new();
        let _a = locks.lock("a").await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock("b")).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_idle_slots_are_pruned() {
        let locks = ThreadLocks::new();
        drop(locks.lock("a").await);
        drop(locks.lock("b").await);
        let _c = locks.lock("c").await;
        assert_eq!(locks.len().await, 1);
    }
}
