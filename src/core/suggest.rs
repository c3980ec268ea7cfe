//! 线程命令建议
//!
//! 按当前线程最近的消息与线程库概览，给出下一步可用的 REPL 命令（summary / branch / switch /
//! list threads / delete thread）。纯规则，不调用 LLM。

use crate::memory::{Message, ThreadListing};

/// 参与判断的最近消息条数
pub const SUGGESTION_WINDOW: usize = 10;

/// 线程数超过该值时建议清理
const CROWDED_LIBRARY: usize = 5;

const TOPIC_SHIFT_PHRASES: &[&str] = &[
    "by the way",
    "on another note",
    "changing the subject",
    "speaking of which",
];

pub const SUGGEST_SUMMARY: &str = "Use 'summary' to get an overview of the current conversation.";
pub const SUGGEST_BRANCH: &str =
    "Consider using 'branch <message_id>' to explore this new direction in a separate thread.";
pub const SUGGEST_LIST: &str = "Use 'list threads' to see all your saved conversations.";
pub const SUGGEST_CLEANUP: &str = "You have many saved threads. Consider using 'delete thread <thread_id>' to remove old or unnecessary conversations.";
pub const SUGGEST_CONTINUE: &str = "Continue the current conversation or start a new topic.";

fn is_topic_shift(content: &str) -> bool {
    let lower = content.to_lowercase();
    TOPIC_SHIFT_PHRASES.iter().any(|p| lower.contains(p))
}

/// `recent` 按时间正序，最多取最后 SUGGESTION_WINDOW 条；结果至少有一条建议
pub fn suggest_actions(
    current_thread_id: &str,
    recent: &[Message],
    threads: &[ThreadListing],
) -> Vec<String> {
    let recent = &recent[recent.len().saturating_sub(SUGGESTION_WINDOW)..];
    let mut suggestions = Vec::new();

    if recent.len() >= SUGGESTION_WINDOW {
        suggestions.push(SUGGEST_SUMMARY.to_string());
    }

    if recent.len() >= 3
        && recent[recent.len() - 2..]
            .iter()
            .any(|m| is_topic_shift(&m.content))
    {
        suggestions.push(SUGGEST_BRANCH.to_string());
    }

    let others = threads
        .iter()
        .filter(|t| t.id != current_thread_id)
        .count();
    if others > 0 {
        suggestions.push(format!(
            "You have {others} other thread(s). Use 'switch <thread_id>' to change to another conversation."
        ));
    }

    if threads.len() > 1 {
        suggestions.push(SUGGEST_LIST.to_string());
    }

    if threads.len() > CROWDED_LIBRARY {
        suggestions.push(SUGGEST_CLEANUP.to_string());
    }

    if suggestions.is_empty() {
        suggestions.push(SUGGEST_CONTINUE.to_string());
    }
    suggestions
}
