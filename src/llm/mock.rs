//! 脚本化模型客户端（用于测试与离线演示，无需 API）
//!
//! 按顺序回放预先排好的回复；脚本耗尽后返回纯文本 end_turn。
//! 同时记录每次收到的请求，便于断言 tool_use / tool_result 的配对。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::llm::{
    ContentBlock, LlmError, ModelClient, ModelRequest, ModelResponse, StopReason,
};

/// 脚本化客户端
#[derive(Debug, Default)]
pub struct ScriptedModelClient {
    script: Mutex<VecDeque<Result<ModelResponse, LlmError>>>,
    requests: Mutex<Vec<ModelRequest>>,
    /// 设置后，脚本耗尽时每轮都重复调用同一个工具（用于回合上限测试）
    repeat_tool: Option<(String, Value)>,
}

impl ScriptedModelClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 永远调用同一个工具、从不提交的模型
    pub fn looping(tool: impl Into<String>, input: Value) -> Self {
        Self {
            repeat_tool: Some((tool.into(), input)),
            ..Self::default()
        }
    }

    pub fn then_response(self, response: ModelResponse) -> Self {
        self.push(Ok(response));
        self
    }

    pub fn then_error(self, err: LlmError) -> Self {
        self.push(Err(err));
        self
    }

    /// 追加一轮：调用单个工具
    pub fn then_tool_call(self, call_id: &str, name: &str, input: Value) -> Self {
        self.then_response(tool_use_response(vec![(call_id, name, input)]))
    }

    /// 追加一轮：纯文本结束
    pub fn then_text(self, text: &str) -> Self {
        self.then_response(ModelResponse {
            content: vec![ContentBlock::text(text)],
            stop_reason: StopReason::EndTurn,
        })
    }

    fn push(&self, item: Result<ModelResponse, LlmError>) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(item);
        }
    }

    /// 已收到的请求快照
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }
}

/// 构造包含多个 tool_use 块的回复
pub fn tool_use_response(calls: Vec<(&str, &str, Value)>) -> ModelResponse {
    ModelResponse {
        content: calls
            .into_iter()
            .map(|(id, name, input)| ContentBlock::ToolUse {
                id: id.to_string(),
                name: name.to_string(),
                input,
            })
            .collect(),
        stop_reason: StopReason::ToolUse,
    }
}

#[async_trait]
impl ModelClient for ScriptedModelClient {
    async fn respond(&self, request: &ModelRequest) -> Result<ModelResponse, LlmError> {
        let turn = {
            let mut requests = self
                .requests
                .lock()
                .map_err(|e| LlmError::Transport(e.to_string()))?;
            requests.push(request.clone());
            requests.len()
        };
        let next = self
            .script
            .lock()
            .map_err(|e| LlmError::Transport(e.to_string()))?
            .pop_front();
        match next {
            Some(item) => item,
            None => match &self.repeat_tool {
                Some((name, input)) => Ok(tool_use_response(vec![(
                    &format!("call_{turn}"),
                    name,
                    input.clone(),
                )])),
                None => Ok(ModelResponse {
                    content: vec![ContentBlock::text("(script exhausted)")],
                    stop_reason: StopReason::EndTurn,
                }),
            },
        }
    }
}
