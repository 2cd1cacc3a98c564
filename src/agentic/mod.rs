//! Agentic 工具调用循环
//!
//! - **loop_**: 回合驱动、终止工具截获、工具分派
//! - **state**: 循环阶段与终止原因
//! - **log**: 按行的执行日志
//! - **events**: 可选推送给调用方的过程事件

pub mod events;
pub mod log;
pub mod loop_;
pub mod state;

pub use events::LoopEvent;
pub use log::{ExecutionLog, LogEntry};
pub use loop_::{
    default_terminal_schema, AgenticLoop, LoopAborted, LoopConfig, LoopOutcome, DEFAULT_TERMINAL_TOOL,
    SUBMIT_ACK,
};
pub use state::{LoopPhase, Termination};
