//! Anthropic Messages API 客户端
//!
//! 通过 reqwest 直接调用 `/v1/messages`（可配置 base_url，兼容自建代理），
//! 工具以 `{name, description, input_schema}` 形式随每次请求发送，回复按内容块解析。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::llm::{ContentBlock, LlmError, ModelClient, ModelRequest, ModelResponse, StopReason, Turn};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub input_tokens: Arc<AtomicU64>,
    pub output_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn add(&self, input: u64, output: u64) {
        self.input_tokens.fetch_add(input, Ordering::Relaxed);
        self.output_tokens.fetch_add(output, Ordering::Relaxed);
    }

    /// (input, output, total)
    pub fn get(&self) -> (u64, u64, u64) {
        let input = self.input_tokens.load(Ordering::Relaxed);
        let output = self.output_tokens.load(Ordering::Relaxed);
        (input, output, input + output)
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Anthropic 客户端：持有 HTTP Client、model 名与累计用量
pub struct AnthropicClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    pub usage: TokenUsage,
}

impl AnthropicClient {
    pub fn new(
        base_url: Option<&str>,
        model: &str,
        api_key: &str,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::Config(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            usage: TokenUsage::default(),
        })
    }

    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    /// 组装请求体；丢弃不认识的内容块，避免回传时被 API 拒绝
    pub fn request_body(&self, request: &ModelRequest) -> Value {
        let messages: Vec<Turn> = request
            .messages
            .iter()
            .map(|t| Turn {
                role: t.role,
                content: t
                    .content
                    .iter()
                    .filter(|b| !matches!(b, ContentBlock::Unsupported))
                    .cloned()
                    .collect(),
            })
            .collect();
        let mut body = json!({
            "model": self.model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "messages": messages,
        });
        if !request.system.is_empty() {
            body["system"] = Value::String(request.system.clone());
        }
        if !request.tools.is_empty() {
            body["tools"] = json!(request.tools);
        }
        body
    }
}

fn map_send_error(e: reqwest::Error) -> LlmError {
    if e.is_timeout() {
        LlmError::Timeout
    } else {
        LlmError::Transport(e.to_string())
    }
}

#[async_trait]
impl ModelClient for AnthropicClient {
    async fn respond(&self, request: &ModelRequest) -> Result<ModelResponse, LlmError> {
        let body = self.request_body(request);
        let response = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(map_send_error)?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after_ms = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1000)
                .unwrap_or(1000);
            return Err(LlmError::RateLimited { retry_after_ms });
        }
        let text = response.text().await.map_err(map_send_error)?;
        if !status.is_success() {
            let message = serde_json::from_str::<ErrorEnvelope>(&text)
                .map(|e| e.error.message)
                .unwrap_or(text);
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        parse_response(&text, &self.usage)
    }
}

fn parse_response(text: &str, usage: &TokenUsage) -> Result<ModelResponse, LlmError> {
    let parsed: MessagesResponse =
        serde_json::from_str(text).map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
    if let Some(u) = &parsed.usage {
        usage.add(u.input_tokens, u.output_tokens);
    }
    let stop_reason = parsed
        .stop_reason
        .as_deref()
        .map(StopReason::from)
        .unwrap_or(StopReason::EndTurn);
    Ok(ModelResponse {
        content: parsed.content,
        stop_reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolSchema;

    fn client() -> AnthropicClient {
        AnthropicClient::new(None, "claude-test", "sk-test", Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_request_body_shape() {
        let request = ModelRequest {
            system: "be brief".to_string(),
            messages: vec![
                Turn::user("task"),
                Turn::assistant(vec![ContentBlock::Unsupported, ContentBlock::text("ok")]),
            ],
            tools: vec![ToolSchema::new(
                "bash",
                "run a command",
                json!({"type": "object", "properties": {}}),
            )],
            max_tokens: 1024,
            temperature: 0.2,
        };
        let body = client().request_body(&request);
        assert_eq!(body["model"], "claude-test");
        assert_eq!(body["system"], "be brief");
        assert_eq!(body["tools"][0]["name"], "bash");
        assert!(body["tools"][0].get("input_schema").is_some());
        assert_eq!(body["messages"][1]["content"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_parse_tool_use_response() {
        let usage = TokenUsage::default();
        let resp = parse_response(
            r#"{
                "content": [
                    {"type": "text", "text": "Let me look."},
                    {"type": "tool_use", "id": "toolu_1", "name": "list_files", "input": {}}
                ],
                "stop_reason": "tool_use",
                "usage": {"input_tokens": 12, "output_tokens": 7}
            }"#,
            &usage,
        )
        .unwrap();
        assert_eq!(resp.stop_reason, StopReason::ToolUse);
        assert_eq!(resp.tool_calls()[0].name, "list_files");
        assert_eq!(usage.get(), (12, 7, 19));
    }

    #[test]
    fn test_parse_invalid_response() {
        let usage = TokenUsage::default();
        assert!(matches!(
            parse_response("not json", &usage),
            Err(LlmError::InvalidResponse(_))
        ));
    }
}
