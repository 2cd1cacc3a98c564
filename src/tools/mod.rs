//! 工具层：注册表、schema 生成与内置工具
//!
//! 每次运行按 ToolContext 中实际具备的能力组装一个全新的注册表，
//! 缺失的能力对应的工具不会出现在模型可见的 schema 中。

pub mod registry;
pub mod research;
pub mod sandbox_tools;
pub mod schema;
pub mod web;

use std::time::Duration;

pub use registry::{executor_fn, FnExecutor, ToolDefinition, ToolExecutor, ToolRegistry, ToolSchema};
pub use schema::{input_schema, parse_input};

use crate::capabilities::ToolContext;

/// 按上下文能力组装注册表；timeout 为每次工具调用的整体上限
pub fn build_registry(ctx: &ToolContext, timeout: Option<Duration>) -> ToolRegistry {
    let mut registry = match timeout {
        Some(t) => ToolRegistry::new().with_timeout(t),
        None => ToolRegistry::new(),
    };
    if ctx.sandbox.is_some() {
        registry.register_many(sandbox_tools::definitions());
    }
    if ctx.capabilities.browser.is_some() {
        registry.register_many(web::definitions());
    }
    if ctx.capabilities.paper_fetcher.is_some() {
        registry.register_many(research::paper_definitions());
    }
    if ctx.capabilities.data_fetcher.is_some() && ctx.sandbox.is_some() {
        registry.register_many(research::market_data_definitions());
    }
    tracing::debug!(tools = ?registry.get_tool_names(), "registry built");
    registry
}
