//! 上下文窗口
//!
//! 只保留最近 window_size 条消息，超出部分从最旧一端丢弃；有损，不做回溯摘要。

use crate::memory::{Message, Thread};

/// 上下文窗口管理：按条数裁剪线程消息
#[derive(Debug, Clone, Copy)]
pub struct ContextWindow {
    size: usize,
}

impl ContextWindow {
    pub fn new(size: usize) -> Self {
        Self { size }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// 裁剪线程消息，返回被丢弃的条数
    pub fn trim(&self, thread: &mut Thread) -> usize {
        trim_messages(&mut thread.data.messages, self.size)
    }
}

impl Default for ContextWindow {
    fn default() -> Self {
        Self::new(10)
    }
}

/// 超出 window_size 时丢弃最旧的消息，幸存者相对顺序不变
pub fn trim_messages(messages: &mut Vec<Message>, window_size: usize) -> usize {
    if messages.len() <= window_size {
        return 0;
    }
    let excess = messages.len() - window_size;
    messages.drain(..excess);
    excess
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{ThreadData, UserInfo};

    fn numbered(n: usize) -> Vec<Message> {
        (0..n).map(|i| Message::user(i.to_string())).collect()
    }

    #[test]
    fn test_trim_keeps_newest_in_order() {
        let mut messages = numbered(15);
        let dropped = trim_messages(&mut messages, 10);
        assert_eq!(dropped, 5);
        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["5", "6", "7", "8", "9", "10", "11", "12", "13", "14"]);
    }

    #[test]
    fn test_trim_within_window_is_noop() {
        let mut messages = numbered(3);
        let before = messages.clone();
        assert_eq!(trim_messages(&mut messages, 10), 0);
        assert_eq!(messages, before);
    }

    #[test]
    fn test_trim_is_idempotent() {
        for len in 0..20 {
            for w in 0..12 {
                let mut once = numbered(len);
                trim_messages(&mut once, w);
                let mut twice = once.clone();
                trim_messages(&mut twice, w);
                assert_eq!(once, twice);
                assert!(once.len() <= w);
            }
        }
    }

    #[test]
    fn test_trim_thread() {
        let mut thread = Thread::new(
            "t",
            ThreadData::new(numbered(4), ""),
            "",
            UserInfo::anonymous(),
        );
        let window = ContextWindow::new(2);
        assert_eq!(window.trim(&mut thread), 2);
        assert_eq!(thread.messages()[0].content, "2");
    }
}
