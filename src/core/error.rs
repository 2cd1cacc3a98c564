//! 错误类型
//!
//! 只有模型调用的传输错误会让 Agentic 循环中止；工具、沙箱相关的失败都降级为文本，
//! 作为 ToolResult 回传给模型。此处的枚举让调用方必须显式处理失败分支。

use std::time::Duration;

use thiserror::Error;

use crate::agentic::LoopAborted;
use crate::llm::LlmError;

/// 沙箱操作错误（路径逃逸、命令拦截、IO 等）
///
/// Display 只包含调用方传入的相对路径，绝不暴露解析后的绝对路径。
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Path '{0}' is outside sandbox")]
    PathEscape(String),

    #[error("Path '{0}' is outside sandbox or does not exist")]
    NotFound(String),

    #[error("Not a regular file: {0}")]
    NotAFile(String),

    #[error("Blocked: command contains forbidden pattern '{0}'")]
    CommandBlocked(String),

    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("Sandbox IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Manifest error: {0}")]
    Manifest(#[from] serde_json::Error),
}

/// 工具调用错误：未注册、参数不合法、执行失败、超时、所需能力缺失
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("tool '{name}' failed: {cause}")]
    Failed { name: String, cause: String },

    #[error("tool '{name}' timed out after {}", format_limit(.limit))]
    Timeout { name: String, limit: Duration },

    #[error("{0} not available")]
    Unavailable(&'static str),

    /// 沙箱拒绝属于正常反馈，原样保留措辞给模型看
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
}

impl ToolError {
    /// 执行器内部失败的便捷构造
    pub fn failed(name: impl Into<String>, cause: impl ToString) -> Self {
        Self::Failed {
            name: name.into(),
            cause: cause.to_string(),
        }
    }
}

/// 超时上限的展示形式（不足 1 秒时用毫秒）
pub(crate) fn format_limit(limit: &Duration) -> String {
    if limit.as_millis() < 1000 {
        format!("{}ms", limit.as_millis())
    } else if limit.subsec_millis() == 0 {
        format!("{}s", limit.as_secs())
    } else {
        format!("{:.1}s", limit.as_secs_f64())
    }
}

/// 运行级错误：配置、沙箱初始化、模型客户端构建等（循环内的传输错误见 LoopAborted）
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Capability error: {0}")]
    Capability(String),

    /// 模型调用失败导致循环中止（携带部分日志）
    #[error(transparent)]
    Aborted(Box<LoopAborted>),
}

impl From<LoopAborted> for AgentError {
    fn from(e: LoopAborted) -> Self {
        Self::Aborted(Box::new(e))
    }
}
