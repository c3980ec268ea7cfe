//! 对话消息
//!
//! 线程内消息按插入顺序追加，只会被上下文窗口从最旧一端裁剪。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 消息角色（与补全服务协议一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    /// 能力调用结果；旧格式中记为 function
    #[serde(alias = "function")]
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    /// Tool 消息对应的能力名
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    fn new(role: Role, content: String, name: Option<String>) -> Self {
        Self {
            id: format!("msg_{}", uuid::Uuid::new_v4().simple()),
            role,
            content,
            name,
            created_at: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content.into(), None)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content.into(), None)
    }

    pub fn tool(capability: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(Role::Tool, content.into(), Some(capability.into()))
    }

    pub fn is_assistant(&self) -> bool {
        self.role == Role::Assistant
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_serde() {
        let msg = Message::tool("echo", "hi");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "tool");
        assert_eq!(json["name"], "echo");

        let legacy = serde_json::json!({
            "id": "m1",
            "role": "function",
            "content": "42",
            "name": "calc",
            "created_at": "2024-05-01T10:00:00Z"
        });
        let parsed: Message = serde_json::from_value(legacy).unwrap();
        assert_eq!(parsed.role, Role::Tool);
    }

    #[test]
    fn test_user_message_has_no_name() {
        let msg = Message::user("hello");
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("name").is_none());
        assert!(msg.id.starts_with("msg_"));
    }
}
