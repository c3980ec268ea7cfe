//! 线程数据模型
//!
//! 持久化布局：
//! `{id, data: {messages, summary}, summary, user_info, created_at, updated_at, interactions: [...]}`。

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::memory::Message;

/// 未生成摘要时的占位
pub const NO_SUMMARY: &str = "No summary available.";

/// 新线程 id
pub fn new_thread_id() -> String {
    format!("thread_{}", uuid::Uuid::new_v4().simple())
}

/// 线程正文：消息序列与摘要
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreadData {
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub summary: String,
}

impl ThreadData {
    pub fn new(messages: Vec<Message>, summary: impl Into<String>) -> Self {
        Self {
            messages,
            summary: summary.into(),
        }
    }
}

/// 发起会话的用户信息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    pub user_id: String,
    pub username: String,
    pub session_start: DateTime<Utc>,
}

impl UserInfo {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            user_id: uuid::Uuid::new_v4().to_string(),
            username: username.into(),
            session_start: Utc::now(),
        }
    }

    pub fn anonymous() -> Self {
        Self::new("anonymous")
    }
}

/// 单次交互日志（只追加）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub timestamp: DateTime<Utc>,
    pub user_input: String,
    pub assistant_response: String,
    /// 秒
    pub processing_time: f64,
    #[serde(rename = "skills_used", default)]
    pub capabilities_used: Vec<String>,
}

impl Interaction {
    pub fn new(
        user_input: impl Into<String>,
        assistant_response: impl Into<String>,
        processing_time: f64,
        capabilities_used: Vec<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            user_input: user_input.into(),
            assistant_response: assistant_response.into(),
            processing_time,
            capabilities_used,
        }
    }
}

/// 持久化的线程记录
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub id: String,
    pub data: ThreadData,
    pub summary: String,
    pub user_info: UserInfo,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub interactions: Vec<Interaction>,
}

impl Thread {
    pub fn new(
        id: impl Into<String>,
        data: ThreadData,
        summary: impl Into<String>,
        user_info: UserInfo,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            data,
            summary: summary.into(),
            user_info,
            created_at: now,
            updated_at: now,
            interactions: Vec::new(),
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.data.messages
    }

    /// 刷新 updated_at，保证严格递增（时钟未前进时补 1µs）
    pub fn touch(&mut self) {
        let now = Utc::now();
        self.updated_at = if now > self.updated_at {
            now
        } else {
            self.updated_at + Duration::microseconds(1)
        };
    }

    pub fn listing(&self) -> ThreadListing {
        ThreadListing {
            id: self.id.clone(),
            summary: self.summary.clone(),
            user_info: self.user_info.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            interaction_count: self.interactions.len(),
        }
    }
}

/// list() 返回的线程概览
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThreadListing {
    pub id: String,
    pub summary: String,
    pub user_info: UserInfo,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub interaction_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_touch_is_strictly_increasing() {
        let mut thread = Thread::new("t", ThreadData::default(), NO_SUMMARY, UserInfo::anonymous());
        let mut last = thread.updated_at;
        for _ in 0..100 {
            thread.touch();
            assert!(thread.updated_at > last);
            last = thread.updated_at;
        }
    }

    #[test]
    fn test_persisted_layout() {
        let mut thread = Thread::new(
            "thread_1",
            ThreadData::new(vec![Message::user("hi")], "greeting"),
            "greeting",
            UserInfo::new("ada"),
        );
        thread
            .interactions
            .push(Interaction::new("hi", "hello", 0.5, vec!["echo".into()]));

        let json = serde_json::to_value(&thread).unwrap();
        assert_eq!(json["id"], "thread_1");
        assert_eq!(json["data"]["summary"], "greeting");
        assert_eq!(json["data"]["messages"][0]["content"], "hi");
        assert_eq!(json["user_info"]["username"], "ada");
        assert_eq!(json["interactions"][0]["skills_used"][0], "echo");
        assert!(json["created_at"].is_string());

        let back: Thread = serde_json::from_value(json).unwrap();
        assert_eq!(back, thread);
    }
}
