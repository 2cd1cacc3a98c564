//! 循环过程事件：可选地通过 mpsc 推送给调用方（进度展示、流式日志）

use serde::Serialize;
use serde_json::Value;

/// 单步过程事件（可序列化为 JSON）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoopEvent {
    /// 新回合开始
    TurnStarted { turn: usize, max_turns: usize },
    /// 模型输出的文本块
    ModelText { text: String },
    /// 模型请求调用工具
    ToolCall {
        call_id: String,
        tool: String,
        input: Value,
    },
    /// 工具返回（预览，避免过长）
    ToolResult {
        call_id: String,
        tool: String,
        preview: String,
        is_error: bool,
    },
    /// 终止工具被调用
    Submitted { payload: Value },
    /// 循环结束
    Finished { termination: String, turns: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_shape() {
        let ev = LoopEvent::TurnStarted { turn: 1, max_turns: 30 };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v, serde_json::json!({"type": "turn_started", "turn": 1, "max_turns": 30}));
    }
}
