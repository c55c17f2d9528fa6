//! LLM 客户端抽象
//!
//! 模型端点接收有序消息历史与可用工具描述，返回一条 ai 消息（可能携带工具调用请求）。
//! RetryingLlmClient 在可重试错误（限流、超时、网络）上按重试预算重试。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::memory::Message;

/// 模型端点错误
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("API error: {0}")]
    ApiError(String),

    #[error("Rate limited (retry after {retry_after_ms}ms)")]
    RateLimited { retry_after_ms: u64 },

    #[error("Request timed out")]
    Timeout,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl LlmError {
    /// 是否值得重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited { .. } | LlmError::Timeout | LlmError::Network(_)
        )
    }
}

/// 提供给模型的工具描述（名称、用途、参数 JSON Schema）
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 以完整历史与工具描述请求一次补全，返回 ai 消息
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
    ) -> Result<Message, LlmError>;

    /// 后端/模型名（用于日志）
    fn model_name(&self) -> &str {
        "unknown"
    }
}

/// 重试配置
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// 首次失败后的最大重试次数
    pub max_retries: u32,
    /// 退避基数，第 n 次重试等待 base_delay * 2^n
    pub base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
        }
    }
}

/// 带重试的客户端包装
pub struct RetryingLlmClient {
    inner: Arc<dyn LlmClient>,
    config: RetryConfig,
}

impl RetryingLlmClient {
    pub fn new(inner: Arc<dyn LlmClient>, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl LlmClient for RetryingLlmClient {
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
    ) -> Result<Message, LlmError> {
        let mut attempt = 0u32;
        loop {
            match self.inner.complete(messages, tools).await {
                Ok(message) => return Ok(message),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let delay = match &e {
                        LlmError::RateLimited { retry_after_ms } => {
                            Duration::from_millis(*retry_after_ms)
                        }
                        _ => self.config.base_delay * 2u32.saturating_pow(attempt),
                    };
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        "LLM call failed ({}), retrying in {:?}",
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;

    #[tokio::test(start_paused = true)]
    async fn test_retries_retryable_errors_within_budget() {
        let mock = Arc::new(MockLlmClient::new());
        mock.push_error(LlmError::Timeout);
        mock.push_error(LlmError::Network("reset".into()));
        mock.push_response(Message::ai("ok"));

        let client = RetryingLlmClient::new(mock.clone(), RetryConfig::default());
        let reply = client.complete(&[Message::human("hi")], &[]).await.unwrap();
        assert_eq!(reply.content, "ok");
        assert_eq!(mock.calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_budget() {
        let mock = Arc::new(MockLlmClient::new());
        for _ in 0..3 {
            mock.push_error(LlmError::RateLimited { retry_after_ms: 10 });
        }
        let client = RetryingLlmClient::new(
            mock.clone(),
            RetryConfig {
                max_retries: 2,
                base_delay: Duration::from_millis(1),
            },
        );
        let err = client.complete(&[Message::human("hi")], &[]).await.unwrap_err();
        assert!(matches!(err, LlmError::RateLimited { .. }));
        assert_eq!(mock.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_immediately() {
        let mock = Arc::new(MockLlmClient::new());
        mock.push_error(LlmError::ApiError("bad request".into()));
        let client = RetryingLlmClient::new(mock.clone(), RetryConfig::default());
        assert!(client.complete(&[], &[]).await.is_err());
        assert_eq!(mock.calls().len(), 1);
    }
}
