//! 执行日志：按行记录回合标记、文本、工具调用与结果、提交内容和告警
//!
//! 工具输入与结果只保留有限长度的预览。

use serde::Serialize;
use serde_json::Value;

/// 单条日志
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogEntry {
    Turn { turn: usize, max_turns: usize },
    Text { text: String },
    ToolCall { call_id: String, name: String, input: String },
    ToolResult { call_id: String, name: String, preview: String, is_error: bool },
    Submitted { payload: Value },
    Info { message: String },
    Warning { message: String },
    Error { message: String },
}

impl std::fmt::Display for LogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Turn { turn, max_turns } => write!(f, "--- Turn {turn}/{max_turns} ---"),
            Self::Text { text } => write!(f, "{text}"),
            Self::ToolCall { name, input, .. } => write!(f, "[TOOL] {name}: {input}"),
            Self::ToolResult {
                name,
                preview,
                is_error,
                ..
            } => {
                let tag = if *is_error { "[RESULT][ERROR]" } else { "[RESULT]" };
                write!(f, "{tag} {name}: {preview}")
            }
            Self::Submitted { payload } => write!(f, "[SUBMIT] {payload}"),
            Self::Info { message } => write!(f, "[INFO] {message}"),
            Self::Warning { message } => write!(f, "[WARNING] {message}"),
            Self::Error { message } => write!(f, "[ERROR] {message}"),
        }
    }
}

/// 一次循环的执行日志
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionLog {
    entries: Vec<LogEntry>,
    #[serde(skip)]
    preview_chars: usize,
}

impl ExecutionLog {
    pub fn new(preview_chars: usize) -> Self {
        Self {
            entries: Vec::new(),
            preview_chars,
        }
    }

    pub fn push(&mut self, entry: LogEntry) {
        self.entries.push(entry);
    }

    pub fn turn(&mut self, turn: usize, max_turns: usize) {
        self.push(LogEntry::Turn { turn, max_turns });
    }

    pub fn text(&mut self, text: &str) {
        self.push(LogEntry::Text { text: text.to_string() });
    }

    pub fn tool_call(&mut self, call_id: &str, name: &str, input: &Value) {
        let input = self.preview(&input.to_string());
        self.push(LogEntry::ToolCall {
            call_id: call_id.to_string(),
            name: name.to_string(),
            input,
        });
    }

    pub fn tool_result(&mut self, call_id: &str, name: &str, content: &str, is_error: bool) {
        let preview = self.preview(content);
        self.push(LogEntry::ToolResult {
            call_id: call_id.to_string(),
            name: name.to_string(),
            preview,
            is_error,
        });
    }

    pub fn submitted(&mut self, payload: &Value) {
        self.push(LogEntry::Submitted {
            payload: payload.clone(),
        });
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.push(LogEntry::Info { message: message.into() });
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        self.push(LogEntry::Warning { message: message.into() });
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.push(LogEntry::Error { message: message.into() });
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn lines(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.to_string()).collect()
    }

    /// 回合标记数
    pub fn turn_markers(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e, LogEntry::Turn { .. }))
            .count()
    }

    /// 成功的工具分派数（不含终止工具）
    pub fn successful_dispatches(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e, LogEntry::ToolResult { is_error: false, .. }))
            .count()
    }

    pub fn failed_dispatches(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e, LogEntry::ToolResult { is_error: true, .. }))
            .count()
    }

    pub fn warnings(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter_map(|e| match e {
                LogEntry::Warning { message } => Some(message.as_str()),
                _ => None,
            })
            .collect()
    }

    fn preview(&self, s: &str) -> String {
        if s.chars().count() > self.preview_chars {
            format!("{}...", s.chars().take(self.preview_chars).collect::<String>())
        } else {
            s.to_string()
        }
    }
}

impl std::fmt::Display for ExecutionLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, entry) in self.entries.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{entry}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lines_and_counters() {
        let mut log = ExecutionLog::new(10);
        log.turn(1, 3);
        log.tool_call("c1", "bash", &json!({"command": "ls -la /very/long/path"}));
        log.tool_result("c1", "bash", "exit_code: 0", false);
        log.tool_result("c2", "read_file", "[ERROR] nope", true);
        log.warning("Reached max turns (3)");

        let lines = log.lines();
        assert_eq!(lines[0], "--- Turn 1/3 ---");
        assert_eq!(lines[1], "[TOOL] bash: {\"command\"...");
        assert_eq!(lines[3], "[RESULT][ERROR] read_file: [ERROR] no...");
        assert_eq!(log.turn_markers(), 1);
        assert_eq!(log.successful_dispatches(), 1);
        assert_eq!(log.failed_dispatches(), 1);
        assert_eq!(log.warnings(), vec!["Reached max turns (3)"]);
        assert_eq!(log.to_string().lines().count(), 5);
    }
}
