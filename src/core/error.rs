//! 错误类型
//!
//! AgentError 是一次对话交换（exchange）层面的错误；ToolError 是单个工具调用的错误，
//! 只影响该次调用，不会中止同一轮中的其他工具调用。

use std::time::Duration;

use thiserror::Error;

use crate::llm::LlmError;
use crate::store::StoreError;

/// 交换过程中可能出现的错误（模型端点、会话、循环上限、取消等）
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Unknown session: {0}")]
    UnknownSession(String),

    #[error("Invalid message for session {session_id}: {reason}")]
    InvalidMessage { session_id: String, reason: String },

    #[error("LLM error: {0}")]
    LlmError(#[from] LlmError),

    /// 工具调用轮数超过上限（模型持续请求工具）
    #[error("Tool loop exceeded after {max_rounds} rounds")]
    ToolLoopExceeded { max_rounds: usize },

    #[error("Cancelled")]
    Cancelled,

    #[error("Exchange deadline exceeded")]
    DeadlineExceeded,

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// 工具调用错误
#[derive(Error, Debug)]
pub enum ToolError {
    /// 写入问题失败，或返回结果无法得到关联 ID
    #[error("Submit failed: {0}")]
    SubmitFailure(String),

    #[error("Query {correlation_id} timed out after {timeout:?}")]
    QueryTimeout {
        correlation_id: String,
        timeout: Duration,
    },

    /// 仅支持同步执行的工具被以异步方式调用
    #[error("Async execution is not supported by tool {0}")]
    AsyncUnsupported(String),

    /// 仅支持异步执行的工具被以同步方式调用
    #[error("Sync execution is not supported by tool {0}")]
    SyncUnsupported(String),

    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Cancelled")]
    Cancelled,

    #[error("Exchange deadline exceeded")]
    DeadlineExceeded,
}
