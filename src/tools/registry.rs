//! 工具注册表
//!
//! 每次运行持有一个全新的 ToolRegistry：按名称登记 (schema, executor)，
//! get_schemas 供模型理解可调用的工具，execute 按名分发到执行器。
//! 执行器被视为不可信：错误与 panic 都被捕获并转为 `tool '<name>' failed: <cause>` 文本，
//! 可选的整体超时与每次调用的 JSON 审计日志沿用 ToolExecutor 的做法。

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::capabilities::ToolContext;
use crate::core::ToolError;

/// 工具 schema：名称、描述（供模型理解）、参数 JSON Schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl ToolSchema {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

/// 工具执行器：接收 JSON 输入与本次运行的上下文（沙箱、浏览器等能力）
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<String, ToolError>;
}

/// 闭包执行器：不需要运行上下文的领域工具可直接用 async 闭包登记
pub struct FnExecutor<F>(F);

/// 把 `Fn(Value) -> Future` 包装为 ToolExecutor
pub fn executor_fn<F, Fut>(f: F) -> FnExecutor<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<String, ToolError>> + Send,
{
    FnExecutor(f)
}

#[async_trait]
impl<F, Fut> ToolExecutor for FnExecutor<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<String, ToolError>> + Send,
{
    async fn execute(&self, input: Value, _ctx: &ToolContext) -> Result<String, ToolError> {
        (self.0)(input).await
    }
}

/// (name, schema, executor) 三元组，供 register_many 批量登记
#[derive(Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub schema: ToolSchema,
    pub executor: Arc<dyn ToolExecutor>,
}

impl ToolDefinition {
    pub fn new(schema: ToolSchema, executor: impl ToolExecutor + 'static) -> Self {
        Self {
            name: schema.name.clone(),
            schema,
            executor: Arc::new(executor),
        }
    }
}

struct RegisteredTool {
    schema: ToolSchema,
    executor: Arc<dyn ToolExecutor>,
}

/// 工具注册表：保持登记顺序，按名称查找执行器
#[derive(Default)]
pub struct ToolRegistry {
    order: Vec<String>,
    tools: HashMap<String, RegisteredTool>,
    timeout: Option<Duration>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 每次工具调用的整体超时（包含执行器内部的所有等待）
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// 登记单个工具；同名再次登记时覆盖，位置不变
    pub fn register(
        &mut self,
        name: impl Into<String>,
        schema: ToolSchema,
        executor: impl ToolExecutor + 'static,
    ) -> &mut Self {
        self.insert(name.into(), schema, Arc::new(executor));
        self
    }

    pub fn register_many(&mut self, tools: impl IntoIterator<Item = ToolDefinition>) -> &mut Self {
        for def in tools {
            self.insert(def.name, def.schema, def.executor);
        }
        self
    }

    fn insert(&mut self, name: String, mut schema: ToolSchema, executor: Arc<dyn ToolExecutor>) {
        // 对外宣告的名称以登记名为准
        schema.name = name.clone();
        if !self.tools.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.tools.insert(name, RegisteredTool { schema, executor });
    }

    /// 按登记顺序返回所有 schema
    pub fn get_schemas(&self) -> Vec<ToolSchema> {
        self.order
            .iter()
            .filter_map(|n| self.tools.get(n))
            .map(|t| t.schema.clone())
            .collect()
    }

    pub fn get_tool_names(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// 执行工具并返回结果字符串；任何失败都变成 `[ERROR] ...` 文本，从不 panic
    pub async fn execute(&self, name: &str, input: Value, ctx: &ToolContext) -> String {
        match self.try_execute(name, input, ctx).await {
            Ok(content) => content,
            Err(e) => format!("[ERROR] {e}"),
        }
    }

    /// 执行工具，失败以 ToolError 显式返回
    pub async fn try_execute(
        &self,
        name: &str,
        input: Value,
        ctx: &ToolContext,
    ) -> Result<String, ToolError> {
        let Some(tool) = self.tools.get(name) else {
            tracing::warn!(tool = %name, "unknown tool requested");
            return Err(ToolError::UnknownTool(name.to_string()));
        };

        let start = Instant::now();
        let args_preview = args_preview(&input);
        let guarded = AssertUnwindSafe(tool.executor.execute(input, ctx)).catch_unwind();
        let result = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, guarded).await {
                Ok(r) => r.map_err(|p| ToolError::failed(name, panic_message(p.as_ref()))),
                Err(_) => Err(ToolError::Timeout {
                    name: name.to_string(),
                    limit,
                }),
            },
            None => guarded
                .await
                .map_err(|p| ToolError::failed(name, panic_message(p.as_ref()))),
        };
        let result = match result {
            Ok(Ok(content)) => Ok(content),
            Ok(Err(e @ ToolError::Failed { .. })) => Err(e),
            Ok(Err(e)) => Err(ToolError::failed(name, e)),
            Err(e) => Err(e),
        };

        let outcome = match &result {
            Ok(_) => "ok",
            Err(ToolError::Timeout { .. }) => "timeout",
            Err(_) => "error",
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": name,
            "ok": result.is_ok(),
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit, "tool");
        if let Err(e) = &result {
            tracing::error!(tool = %name, error = %e, "tool execution failed");
        }
        result
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
