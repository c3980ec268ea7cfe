//! Run 状态机
//!
//! SUBMITTED → POLLING → {REQUIRES_ACTION → dispatch → POLLING}* → COMPLETED | FAILED。
//! TurnPhase 只用于日志与断言，不持久化。

use serde::Serialize;

use crate::llm::RunStatus;

/// 单轮对话中 Run 所处阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    Submitted,
    Polling,
    RequiresAction,
    Completed,
    Failed,
}

impl TurnPhase {
    /// 根据服务返回的状态推进阶段；已结束的阶段不再变化
    pub fn advance(self, status: &RunStatus) -> TurnPhase {
        if self.is_terminal() {
            return self;
        }
        match status {
            RunStatus::Queued | RunStatus::InProgress => TurnPhase::Polling,
            RunStatus::RequiresAction(_) => TurnPhase::RequiresAction,
            RunStatus::Completed => TurnPhase::Completed,
            RunStatus::Failed(_) | RunStatus::Other(_) => TurnPhase::Failed,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TurnPhase::Completed | TurnPhase::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_transitions() {
        let phase = TurnPhase::Submitted.advance(&RunStatus::Queued);
        assert_eq!(phase, TurnPhase::Polling);
        let phase = phase.advance(&RunStatus::RequiresAction(vec![]));
        assert_eq!(phase, TurnPhase::RequiresAction);
        let phase = phase.advance(&RunStatus::InProgress);
        assert_eq!(phase, TurnPhase::Polling);
        let phase = phase.advance(&RunStatus::Completed);
        assert_eq!(phase, TurnPhase::Completed);
        assert_eq!(phase.advance(&RunStatus::Queued), TurnPhase::Completed);
    }

    #[test]
    fn test_unknown_status_fails() {
        let phase = TurnPhase::Polling.advance(&RunStatus::Other("expired".into()));
        assert_eq!(phase, TurnPhase::Failed);
        assert!(phase.is_terminal());
    }
}
