//! Agentic 主循环
//!
//! 每回合：带上历史、工具 schema 与 system prompt 调用模型 -> 原样追加 assistant 回合 ->
//! 逐个处理 tool_use 块（终止工具截获 payload，其余分派到注册表）-> 本回合所有结果合并为一个 user 回合。
//! 停止原因不是 tool_use、终止工具被调用、回合耗尽或被取消时结束。
//! 只有模型调用失败会让循环以 LoopAborted 返回，其余失败都变成模型可见的文本。

use std::collections::HashSet;

use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::agentic::{ExecutionLog, LoopEvent, LoopPhase, Termination};
use crate::capabilities::ToolContext;
use crate::llm::{
    ContentBlock, LlmError, ModelClient, ModelRequest, StopReason, ToolCall, ToolResult, Turn,
};
use crate::tools::{ToolRegistry, ToolSchema};

/// 默认终止工具名
pub const DEFAULT_TERMINAL_TOOL: &str = "submit_result";
/// 终止工具的合成结果
pub const SUBMIT_ACK: &str = "Results submitted successfully. Experiment complete.";

/// 默认终止工具 schema：`{results: {metrics, description}}`
pub fn default_terminal_schema(name: &str) -> ToolSchema {
    ToolSchema::new(
        name,
        "Submit the final results and end the loop. Call this ONLY when you have valid results to report.",
        json!({
            "type": "object",
            "properties": {
                "results": {
                    "type": "object",
                    "description": "The final results object",
                    "properties": {
                        "metrics": {
                            "type": "object",
                            "description": "Metric name -> value"
                        },
                        "description": {
                            "type": "string",
                            "description": "Brief description of the approach and its results"
                        }
                    }
                }
            },
            "required": ["results"]
        }),
    )
}

/// 循环参数
#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub max_turns: usize,
    /// 终止工具（按名称截获）
    pub terminal_tool: ToolSchema,
    pub system_prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// 日志中工具输入/结果的预览长度
    pub log_preview_chars: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_turns: 30,
            terminal_tool: default_terminal_schema(DEFAULT_TERMINAL_TOOL),
            system_prompt: String::new(),
            max_tokens: 4096,
            temperature: 0.0,
            log_preview_chars: 500,
        }
    }
}

/// 循环正常结束的结果；payload 为空表示没有提交
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    pub payload: Option<Value>,
    pub termination: Termination,
    pub turns: usize,
    pub log: ExecutionLog,
}

impl LoopOutcome {
    pub fn submitted(&self) -> bool {
        self.payload.is_some()
    }
}

/// 模型调用失败导致循环中止，携带已累积的日志
#[derive(Debug, thiserror::Error)]
#[error("model call failed on turn {turns}: {error}")]
pub struct LoopAborted {
    pub error: LlmError,
    pub log: ExecutionLog,
    pub turns: usize,
}

type SubmitHook<'a> = Box<dyn FnOnce(&Value) + Send + 'a>;

/// 单次循环调用（注册表在外部为本次运行新建）
pub struct AgenticLoop<'a> {
    client: &'a dyn ModelClient,
    registry: &'a ToolRegistry,
    ctx: &'a ToolContext,
    config: LoopConfig,
    cancel_token: Option<CancellationToken>,
    event_tx: Option<UnboundedSender<LoopEvent>>,
    on_submit: Option<SubmitHook<'a>>,
}

impl<'a> AgenticLoop<'a> {
    pub fn new(
        client: &'a dyn ModelClient,
        registry: &'a ToolRegistry,
        ctx: &'a ToolContext,
        config: LoopConfig,
    ) -> Self {
        Self {
            client,
            registry,
            ctx,
            config,
            cancel_token: None,
            event_tx: None,
            on_submit: None,
        }
    }

    /// 设置取消令牌（每次调用模型前检查）
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = Some(token);
        self
    }

    /// 设置事件推送通道
    pub fn with_event_tx(mut self, tx: UnboundedSender<LoopEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// 提交时回调，收到原样的 payload
    pub fn on_submit(mut self, hook: impl FnOnce(&Value) + Send + 'a) -> Self {
        self.on_submit = Some(Box::new(hook));
        self
    }

    fn emit(&self, ev: LoopEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(ev);
        }
    }

    /// 以任务描述作为首个 user 回合运行循环
    pub async fn run(mut self, task: &str) -> Result<LoopOutcome, LoopAborted> {
        let max_turns = self.config.max_turns;
        let terminal = self.config.terminal_tool.name.clone();
        let mut log = ExecutionLog::new(self.config.log_preview_chars);

        if self.registry.has_tool(&terminal) {
            tracing::warn!(tool = %terminal, "registered tool shares the terminal tool name; calls will be intercepted");
            log.warning(format!(
                "Registered tool '{terminal}' collides with the terminal tool; its calls are intercepted"
            ));
        }
        let mut tools: Vec<ToolSchema> = self
            .registry
            .get_schemas()
            .into_iter()
            .filter(|s| s.name != terminal)
            .collect();
        tools.push(self.config.terminal_tool.clone());

        let mut history = vec![Turn::user(task)];
        let mut phase = LoopPhase::AwaitingModel;
        let mut turns = 0usize;
        let mut payload = None;

        let termination = loop {
            if turns >= max_turns {
                tracing::warn!(max_turns, "loop exhausted without submission");
                log.warning(format!("Reached max turns ({max_turns})"));
                break Termination::Exhausted;
            }
            if self.cancel_token.as_ref().is_some_and(|t| t.is_cancelled()) {
                log.info("Cancelled by caller");
                break Termination::Cancelled;
            }

            turns += 1;
            log.turn(turns, max_turns);
            self.emit(LoopEvent::TurnStarted { turn: turns, max_turns });
            tracing::info!(turn = turns, max_turns, "agentic turn");

            let request = ModelRequest {
                system: self.config.system_prompt.clone(),
                messages: history.clone(),
                tools: tools.clone(),
                max_tokens: self.config.max_tokens,
                temperature: self.config.temperature,
            };
            let response = match self.client.respond(&request).await {
                Ok(r) => r,
                Err(error) => {
                    tracing::error!(turn = turns, error = %error, "model call failed, aborting loop");
                    log.error(format!("Model call failed: {error}"));
                    self.emit(LoopEvent::Finished {
                        termination: "aborted".to_string(),
                        turns,
                    });
                    return Err(LoopAborted { error, log, turns });
                }
            };
            phase = advance(phase, LoopPhase::ModelResponded);

            for text in response.texts() {
                log.text(text);
                self.emit(LoopEvent::ModelText {
                    text: text.to_string(),
                });
            }

            let (content, duplicates) = dedupe_tool_use(response.content);
            for id in &duplicates {
                tracing::warn!(call_id = %id, "duplicate call_id in model response");
                log.warning(format!("Duplicate call_id '{id}' ignored"));
            }
            let calls: Vec<ToolCall> = content
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::ToolUse { id, name, input } => Some(ToolCall {
                        call_id: id.clone(),
                        name: name.clone(),
                        input: input.clone(),
                    }),
                    _ => None,
                })
                .collect();
            history.push(Turn::assistant(content));

            if response.stop_reason != StopReason::ToolUse || calls.is_empty() {
                log.info(format!("Model finished: stop_reason={}", response.stop_reason));
                phase = advance(phase, LoopPhase::Done);
                break match response.stop_reason {
                    StopReason::EndTurn | StopReason::ToolUse => Termination::EndTurn,
                    other => Termination::StopReason(other.to_string()),
                };
            }

            phase = advance(phase, LoopPhase::Dispatching);
            let mut results = Vec::with_capacity(calls.len());
            for call in calls {
                log.tool_call(&call.call_id, &call.name, &call.input);
                self.emit(LoopEvent::ToolCall {
                    call_id: call.call_id.clone(),
                    tool: call.name.clone(),
                    input: call.input.clone(),
                });

                if call.name == terminal {
                    if payload.is_none() {
                        tracing::info!(turn = turns, "terminal tool called");
                        log.submitted(&call.input);
                        self.emit(LoopEvent::Submitted {
                            payload: call.input.clone(),
                        });
                        payload = Some(call.input);
                    } else {
                        log.warning("Additional terminal call in the same turn ignored");
                    }
                    results.push(ToolResult::ok(call.call_id, SUBMIT_ACK));
                    continue;
                }

                let result = match self
                    .registry
                    .try_execute(&call.name, call.input, self.ctx)
                    .await
                {
                    Ok(content) => ToolResult::ok(call.call_id, content),
                    Err(e) => ToolResult::error(call.call_id, format!("[ERROR] {e}")),
                };
                log.tool_result(&result.call_id, &call.name, &result.content, result.is_error);
                self.emit(LoopEvent::ToolResult {
                    call_id: result.call_id.clone(),
                    tool: call.name,
                    preview: result.content.chars().take(self.config.log_preview_chars).collect(),
                    is_error: result.is_error,
                });
                results.push(result);
            }
            history.push(Turn::tool_results(results));

            if let Some(p) = &payload {
                phase = advance(phase, LoopPhase::Terminal);
                if let Some(hook) = self.on_submit.take() {
                    hook(p);
                }
                phase = advance(phase, LoopPhase::Done);
                break Termination::Submitted;
            }
            phase = advance(phase, LoopPhase::AwaitingModel);
        };

        if phase != LoopPhase::Done {
            phase = advance(phase, LoopPhase::Done);
        }
        tracing::debug!(phase = ?phase, "loop settled");
        log.info(format!("Loop finished: {termination} after {turns} turns"));
        self.emit(LoopEvent::Finished {
            termination: termination.to_string(),
            turns,
        });
        Ok(LoopOutcome {
            payload,
            termination,
            turns,
            log,
        })
    }
}

fn advance(from: LoopPhase, to: LoopPhase) -> LoopPhase {
    debug_assert!(from.can_transition_to(to), "illegal loop transition {from:?} -> {to:?}");
    tracing::debug!(from = ?from, to = ?to, "loop phase");
    to
}

/// 去掉重复 call_id 的 tool_use 块（保留首次出现），返回去重后的内容与重复的 id
fn dedupe_tool_use(content: Vec<ContentBlock>) -> (Vec<ContentBlock>, Vec<String>) {
    let mut seen = HashSet::new();
    let mut duplicates = Vec::new();
    let kept = content
        .into_iter()
        .filter(|block| match block {
            ContentBlock::ToolUse { id, .. } => {
                if seen.insert(id.clone()) {
                    true
                } else {
                    duplicates.push(id.clone());
                    false
                }
            }
            _ => true,
        })
        .collect();
    (kept, duplicates)
}
