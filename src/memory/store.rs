//! 线程存储抽象层
//!
//! 定义统一的线程 CRUD / 列表 / 分支接口，前置条件不满足时显式返回错误（不静默成功）。
//! 参考实现：MemoryThreadStore（进程内）与 FileThreadStore（每线程一个 JSON 文件，原子替换写入）。

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{StoreBackend, StoreSection};
use crate::memory::{
    new_thread_id, FileThreadStore, Interaction, MemoryThreadStore, Thread, ThreadData,
    ThreadListing, UserInfo,
};

/// 线程存储错误
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Thread {0} not found")]
    NotFound(String),

    #[error("Thread {0} already exists")]
    AlreadyExists(String),

    #[error("Message {message_id} not found in thread {thread_id}")]
    MessageNotFound {
        thread_id: String,
        message_id: String,
    },

    #[error("Invalid thread id: {0}")]
    InvalidId(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// 线程存储接口
#[async_trait]
pub trait ThreadStore: Send + Sync {
    /// 新建线程；id 已存在时返回 AlreadyExists
    async fn save(
        &self,
        id: &str,
        data: ThreadData,
        summary: &str,
        user_info: UserInfo,
    ) -> Result<(), StoreError>;

    /// 覆盖线程正文与摘要；不存在时返回 NotFound
    async fn update(&self, id: &str, data: ThreadData, summary: &str) -> Result<(), StoreError>;

    async fn retrieve(&self, id: &str) -> Result<Thread, StoreError>;

    /// 按 created_at、id 排序的线程概览
    async fn list(&self) -> Result<Vec<ThreadListing>, StoreError>;

    async fn delete(&self, id: &str) -> Result<(), StoreError>;

    /// 追加交互日志并刷新 updated_at
    async fn log_interaction(&self, id: &str, interaction: Interaction) -> Result<(), StoreError>;

    /// 以 message_id 之前的严格前缀创建独立的新线程，返回新 id；源线程不变
    async fn branch(&self, id: &str, message_id: &str) -> Result<String, StoreError>;

    /// 保存一整轮的结果：is_new 时新建（已存在则 AlreadyExists），否则覆盖正文与摘要（不存在则 NotFound），
    /// 并追加交互日志。默认实现是 save / update 加 log_interaction 两次写入；内置存储一次写入完成。
    async fn commit_turn(
        &self,
        thread: Thread,
        is_new: bool,
        interaction: Interaction,
    ) -> Result<(), StoreError> {
        if is_new {
            self.save(&thread.id, thread.data, &thread.summary, thread.user_info)
                .await?;
        } else {
            self.update(&thread.id, thread.data, &thread.summary).await?;
        }
        self.log_interaction(&thread.id, interaction).await
    }

    async fn exists(&self, id: &str) -> Result<bool, StoreError> {
        match self.retrieve(id).await {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// 从源线程派生分支线程（消息深拷贝，交互日志清空）
pub(crate) fn branch_from(source: &Thread, message_id: &str) -> Result<Thread, StoreError> {
    let cut = source
        .data
        .messages
        .iter()
        .position(|m| m.id == message_id)
        .ok_or_else(|| StoreError::MessageNotFound {
            thread_id: source.id.clone(),
            message_id: message_id.to_string(),
        })?;
    let data = ThreadData::new(source.data.messages[..cut].to_vec(), source.data.summary.clone());
    Ok(Thread::new(
        new_thread_id(),
        data,
        source.summary.clone(),
        source.user_info.clone(),
    ))
}

/// 合并一轮结果：已有记录只替换正文与摘要（保留 user_info、created_at、历史交互）
pub(crate) fn merge_turn(stored: Option<Thread>, turn: Thread, interaction: Interaction) -> Thread {
    let mut thread = match stored {
        Some(mut stored) => {
            stored.data = turn.data;
            stored.summary = turn.summary;
            stored
        }
        None => turn,
    };
    thread.interactions.push(interaction);
    thread.touch();
    thread
}

pub(crate) fn sort_listings(listings: &mut [ThreadListing]) {
    listings.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
}

/// 按配置创建线程存储
pub fn create_thread_store(cfg: &StoreSection) -> Arc<dyn ThreadStore> {
    match cfg.backend {
        StoreBackend::File => {
            tracing::info!("Using file thread store: {:?}", cfg.path);
            Arc::new(FileThreadStore::new(&cfg.path))
        }
        StoreBackend::Memory => {
            tracing::info!("Using in-memory thread store");
            Arc::new(MemoryThreadStore::new())
        }
    }
}
