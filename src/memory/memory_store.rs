//! 内存线程存储

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::memory::store::{branch_from, merge_turn, sort_listings};
use crate::memory::{
    Interaction, StoreError, Thread, ThreadData, ThreadListing, ThreadStore, UserInfo,
};

/// 进程内线程存储：每个操作在一次写锁内完成
#[derive(Debug, Default)]
pub struct MemoryThreadStore {
    threads: RwLock<HashMap<String, Thread>>,
}

impl MemoryThreadStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ThreadStore for MemoryThreadStore {
    async fn save(
        &self,
        id: &str,
        data: ThreadData,
        summary: &str,
        user_info: UserInfo,
    ) -> Result<(), StoreError> {
        let mut threads = self.threads.write().await;
        if threads.contains_key(id) {
            return Err(StoreError::AlreadyExists(id.to_string()));
        }
        threads.insert(id.to_string(), Thread::new(id, data, summary, user_info));
        Ok(())
    }

    async fn update(&self, id: &str, data: ThreadData, summary: &str) -> Result<(), StoreError> {
        let mut threads = self.threads.write().await;
        let thread = threads
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        thread.data = data;
        thread.summary = summary.to_string();
        thread.touch();
        Ok(())
    }

    async fn retrieve(&self, id: &str) -> Result<Thread, StoreError> {
        self.threads
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn list(&self) -> Result<Vec<ThreadListing>, StoreError> {
        let mut listings: Vec<ThreadListing> =
            self.threads.read().await.values().map(Thread::listing).collect();
        sort_listings(&mut listings);
        Ok(listings)
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.threads
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn log_interaction(&self, id: &str, interaction: Interaction) -> Result<(), StoreError> {
        let mut threads = self.threads.write().await;
        let thread = threads
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        thread.interactions.push(interaction);
        thread.touch();
        Ok(())
    }

    async fn branch(&self, id: &str, message_id: &str) -> Result<String, StoreError> {
        let mut threads = self.threads.write().await;
        let source = threads
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let branched = branch_from(source, message_id)?;
        let new_id = branched.id.clone();
        threads.insert(new_id.clone(), branched);
        Ok(new_id)
    }

    async fn commit_turn(
        &self,
        thread: Thread,
        is_new: bool,
        interaction: Interaction,
    ) -> Result<(), StoreError> {
        let mut threads = self.threads.write().await;
        let stored = if is_new {
            if threads.contains_key(&thread.id) {
                return Err(StoreError::AlreadyExists(thread.id));
            }
            None
        } else {
            let stored = threads
                .remove(&thread.id)
                .ok_or_else(|| StoreError::NotFound(thread.id.clone()))?;
            Some(stored)
        };
        let merged = merge_turn(stored, thread, interaction);
        threads.insert(merged.id.clone(), merged);
        Ok(())
    }
}
