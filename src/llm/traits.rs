//! 模型客户端抽象
//!
//! 所有后端（Anthropic Messages / Scripted 测试替身）实现 ModelClient：一次请求对应一次回复。
//! 单次调用内的重试由客户端自己负责（RetryingModelClient），Agentic 循环不做跨回合重试。

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::llm::{ModelRequest, ModelResponse};

/// 模型调用错误（对循环而言都属于传输层失败）
#[derive(Error, Debug, Clone)]
pub enum LlmError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Request timed out")]
    Timeout,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl LlmError {
    /// 是否值得在同一次调用内重试
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Transport(_) | LlmError::Timeout | LlmError::RateLimited { .. } => true,
            LlmError::Api { status, .. } => *status >= 500 || *status == 529,
            LlmError::InvalidResponse(_) | LlmError::Config(_) => false,
        }
    }
}

/// 模型客户端 trait
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// 发送历史 + 工具 schema，返回一次完整回复
    async fn respond(&self, request: &ModelRequest) -> Result<ModelResponse, LlmError>;
}

/// 重试配置：指数退避
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryConfig {
    fn delay_for(&self, attempt: u32, err: &LlmError) -> Duration {
        if let LlmError::RateLimited { retry_after_ms } = err {
            return Duration::from_millis(*retry_after_ms).min(self.max_delay);
        }
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// 带重试的客户端包装：可重试错误按指数退避重发同一请求
pub struct RetryingModelClient<C> {
    inner: C,
    config: RetryConfig,
}

impl<C: ModelClient> RetryingModelClient<C> {
    pub fn new(inner: C, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl<C: ModelClient> ModelClient for RetryingModelClient<C> {
    async fn respond(&self, request: &ModelRequest) -> Result<ModelResponse, LlmError> {
        let mut attempt = 0;
        loop {
            match self.inner.respond(request).await {
                Ok(resp) => return Ok(resp),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let delay = self.config.delay_for(attempt, &e);
                    tracing::warn!(error = %e, attempt, delay_ms = delay.as_millis() as u64, "model call failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
