//! 模型层：请求/响应结构、客户端抽象与实现（Anthropic Messages / Scripted）

pub mod anthropic;
pub mod mock;
pub mod traits;
pub mod types;

pub use anthropic::{AnthropicClient, TokenUsage};
pub use mock::{tool_use_response, ScriptedModelClient};
pub use traits::{LlmError, ModelClient, RetryConfig, RetryingModelClient};
pub use types::{
    ContentBlock, ModelRequest, ModelResponse, Role, StopReason, ToolCall, ToolResult, Turn,
};
