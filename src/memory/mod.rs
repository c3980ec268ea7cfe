//! 记忆层：消息与线程数据模型、上下文窗口、线程存储（文件 / 内存）

pub mod conversation;
pub mod file_store;
pub mod memory_store;
pub mod store;
pub mod thread;
pub mod window;

pub use conversation::{Message, Role};
pub use file_store::FileThreadStore;
pub use memory_store::MemoryThreadStore;
pub use store::{create_thread_store, StoreError, ThreadStore};
pub use thread::{
    new_thread_id, Interaction, Thread, ThreadData, ThreadListing, UserInfo, NO_SUMMARY,
};
pub use window::{trim_messages, ContextWindow};
