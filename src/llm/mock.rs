//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 按顺序返回预置回复；预置用完后回显最后一条 human 消息，便于无 Key 时本地跑通 CLI。
//! 每次调用的历史与工具描述都会被记录，供测试断言。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError, ToolDescriptor};
use crate::memory::{Message, Role};

/// 一次调用的记录
#[derive(Clone, Debug)]
pub struct RecordedCall {
    pub messages: Vec<Message>,
    pub tools: Vec<String>,
}

/// Mock 客户端
#[derive(Debug, Default)]
pub struct MockLlmClient {
    replies: Mutex<VecDeque<Result<Message, LlmError>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以一组回复构造
    pub fn scripted(replies: impl IntoIterator<Item = Message>) -> Self {
        let client = Self::new();
        for reply in replies {
            client.push_response(reply);
        }
        client
    }

    pub fn push_response(&self, message: Message) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(Ok(message));
        }
    }

    pub fn push_error(&self, error: LlmError) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(Err(error));
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
    ) -> Result<Message, LlmError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                messages: messages.to_vec(),
                tools: tools.iter().map(|t| t.name.clone()).collect(),
            });
        }

        let scripted = self.replies.lock().ok().and_then(|mut r| r.pop_front());
        if let Some(reply) = scripted {
            return reply;
        }

        let last_human = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Human)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        Ok(Message::ai(format!("Echo from Mock: {}", last_human)))
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}
