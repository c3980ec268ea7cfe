//! 文件线程存储
//!
//! 每个线程一个 `<id>.json` 文件；写入先落临时文件再 rename，读-改-写操作按 id 加锁，
//! 多个写者并发时不会产生半截文件或丢失更新。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::core::ThreadLocks;
use crate::memory::store::{branch_from, merge_turn, sort_listings};
use crate::memory::{
    Interaction, StoreError, Thread, ThreadData, ThreadListing, ThreadStore, UserInfo,
};

/// 文件线程存储：base_path 下每线程一个 JSON 文件
#[derive(Debug)]
pub struct FileThreadStore {
    base_path: PathBuf,
    locks: ThreadLocks,
}

impl FileThreadStore {
    pub fn new(base_path: impl AsRef<Path>) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
            locks: ThreadLocks::new(),
        }
    }

    fn thread_path(&self, thread_id: &str) -> Result<PathBuf, StoreError> {
        validate_thread_id(thread_id)?;
        Ok(self.base_path.join(format!("{}.json", thread_id)))
    }

    async fn load(&self, thread_id: &str) -> Result<Thread, StoreError> {
        let path = self.thread_path(thread_id)?;
        let raw = match fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(thread_id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&raw)?)
    }

    /// 写临时文件后 rename 覆盖目标，保证读者看到的总是完整记录
    async fn write(&self, thread: &Thread) -> Result<(), StoreError> {
        let path = self.thread_path(&thread.id)?;
        fs::create_dir_all(&self.base_path).await?;
        let tmp = self
            .base_path
            .join(format!(".{}.{}.tmp", thread.id, uuid::Uuid::new_v4().simple()));
        let body = serde_json::to_vec_pretty(thread)?;

        let written: std::io::Result<()> = async {
            let mut file = fs::File::create(&tmp).await?;
            file.write_all(&body).await?;
            file.sync_all().await?;
            fs::rename(&tmp, &path).await
        }
        .await;

        if let Err(e) = written {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn exists_on_disk(&self, thread_id: &str) -> Result<bool, StoreError> {
        let path = self.thread_path(thread_id)?;
        Ok(fs::try_exists(&path).await?)
    }
}

/// 拒绝可能逃逸出 base_path 的 id（路径分隔符、`..`、控制字符）
fn validate_thread_id(thread_id: &str) -> Result<(), StoreError> {
    if thread_id.is_empty() {
        return Err(StoreError::InvalidId("thread id cannot be empty".to_string()));
    }
    if thread_id.starts_with('.')
        || thread_id.contains('/')
        || thread_id.contains('\\')
        || thread_id.contains("..")
        || thread_id.chars().any(|c| c.is_control())
    {
        return Err(StoreError::InvalidId(format!(
            "thread id contains invalid characters: {thread_id:?}"
        )));
    }
    Ok(())
}

#[async_trait]
impl ThreadStore for FileThreadStore {
    async fn save(
        &self,
        id: &str,
        data: ThreadData,
        summary: &str,
        user_info: UserInfo,
    ) -> Result<(), StoreError> {
        let _guard = self.locks.lock(id).await;
        if self.exists_on_disk(id).await? {
            return Err(StoreError::AlreadyExists(id.to_string()));
        }
        self.write(&Thread::new(id, data, summary, user_info)).await
    }

    async fn update(&self, id: &str, data: ThreadData, summary: &str) -> Result<(), StoreError> {
        let _guard = self.locks.lock(id).await;
        let mut thread = self.load(id).await?;
        thread.data = data;
        thread.summary = summary.to_string();
        thread.touch();
        self.write(&thread).await
    }

    async fn retrieve(&self, id: &str) -> Result<Thread, StoreError> {
        self.load(id).await
    }

    async fn list(&self) -> Result<Vec<ThreadListing>, StoreError> {
        let mut listings = Vec::new();
        let mut entries = match fs::read_dir(&self.base_path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(listings),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            let Some(id) = name.strip_suffix(".json") else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            match self.load(id).await {
                Ok(thread) => listings.push(thread.listing()),
                // 列表期间被删除
                Err(StoreError::NotFound(_)) => {}
                Err(e) => tracing::warn!("Skipping unreadable thread file {}: {}", name, e),
            }
        }
        sort_listings(&mut listings);
        Ok(listings)
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let _guard = self.locks.lock(id).await;
        let path = self.thread_path(id)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn log_interaction(&self, id: &str, interaction: Interaction) -> Result<(), StoreError> {
        let _guard = self.locks.lock(id).await;
        let mut thread = self.load(id).await?;
        thread.interactions.push(interaction);
        thread.touch();
        self.write(&thread).await
    }

    async fn branch(&self, id: &str, message_id: &str) -> Result<String, StoreError> {
        let source = {
            let _guard = self.locks.lock(id).await;
            self.load(id).await?
        };
        let branched = branch_from(&source, message_id)?;
        let _guard = self.locks.lock(&branched.id).await;
        self.write(&branched).await?;
        Ok(branched.id)
    }

    async fn commit_turn(
        &self,
        thread: Thread,
        is_new: bool,
        interaction: Interaction,
    ) -> Result<(), StoreError> {
        let id = thread.id.clone();
        let _guard = self.locks.lock(&id).await;
        let stored = if is_new {
            if self.exists_on_disk(&id).await? {
                return Err(StoreError::AlreadyExists(id));
            }
            None
        } else {
            Some(self.load(&id).await?)
        };
        self.write(&merge_turn(stored, thread, interaction)).await
    }
}
