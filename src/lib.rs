//! Delve - 研究工作流 Agentic Tool-Use 运行时
//!
//! 模块划分：
//! - **agent**: 单次运行编排（沙箱创建、数据注入、循环、结果收集、清理）
//! - **agentic**: 回合式工具调用循环、终止工具、执行日志
//! - **browser**: 懒启动的浏览器会话（网页正文、搜索）
//! - **capabilities**: 可选能力（行情数据、论文检索、浏览器）与工具上下文
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型
//! - **llm**: 模型客户端抽象与实现（Anthropic Messages / Scripted）
//! - **observability**: tracing 初始化
//! - **sandbox**: 每次运行独立的工作区、路径约束、命令与脚本执行
//! - **tools**: 工具注册表、JSON Schema 与内置工具

pub mod agent;
pub mod agentic;
pub mod browser;
pub mod capabilities;
pub mod config;
pub mod core;
pub mod llm;
pub mod observability;
pub mod sandbox;
pub mod tools;

pub use agent::{create_model_client, run_agent, RunReport, RunRequest};
pub use agentic::{AgenticLoop, LoopConfig, LoopOutcome, Termination};
pub use capabilities::{Capabilities, ToolContext};
pub use config::{load_config, AppConfig};
pub use sandbox::{Dataset, Sandbox, SandboxConfig, SandboxManager};
pub use tools::{ToolRegistry, ToolSchema};
