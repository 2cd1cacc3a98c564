//! 循环阶段与终止原因

use serde::Serialize;

/// 循环阶段
///
/// AwaitingModel → ModelResponded → {Dispatching | Terminal | Done}；
/// Dispatching → {AwaitingModel | Terminal}；Terminal → Done。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    AwaitingModel,
    ModelResponded,
    Dispatching,
    Terminal,
    Done,
}

impl LoopPhase {
    pub fn can_transition_to(self, next: LoopPhase) -> bool {
        use LoopPhase::*;
        matches!(
            (self, next),
            (AwaitingModel, ModelResponded)
                | (AwaitingModel, Done)
                | (ModelResponded, Dispatching)
                | (ModelResponded, Done)
                | (Dispatching, AwaitingModel)
                | (Dispatching, Terminal)
                | (Dispatching, Done)
                | (Terminal, Done)
        )
    }
}

/// 循环为何结束
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum Termination {
    /// 模型调用了终止工具，payload 已捕获
    Submitted,
    /// 模型以 end_turn 结束且没有提交
    EndTurn,
    /// 其它非 tool_use 停止原因（max_tokens 等）
    StopReason(String),
    /// 回合预算耗尽
    Exhausted,
    /// 调用方通过取消令牌提前结束
    Cancelled,
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Submitted => f.write_str("submitted"),
            Self::EndTurn => f.write_str("end_turn"),
            Self::StopReason(r) => write!(f, "stop_reason={r}"),
            Self::Exhausted => f.write_str("exhausted"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}
