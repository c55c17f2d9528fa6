//! 工具调用上下文：外层取消令牌 + 交换截止时间
//!
//! 轮询等待必须能被外层交换的截止时间或取消信号打断，而不只是工具自身的超时。

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::core::ToolError;

/// 单次交换内所有工具调用共享的上下文
#[derive(Clone, Debug, Default)]
pub struct ToolContext {
    pub cancel: CancellationToken,
    pub deadline: Option<Instant>,
}

impl ToolContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    /// 已取消或已过截止时间则返回错误
    pub fn check(&self) -> Result<(), ToolError> {
        if self.cancel.is_cancelled() {
            return Err(ToolError::Cancelled);
        }
        match self.deadline {
            Some(d) if Instant::now() >= d => Err(ToolError::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// 截止时间到达时完成；无截止时间则永不完成
    pub async fn deadline_reached(&self) {
        match self.deadline {
            Some(d) => tokio::time::sleep_until(d).await,
            None => std::future::pending::<()>().await,
        }
    }

    /// 可取消的定时等待：等待 duration，期间被取消或到达截止时间则提前返回错误
    pub async fn sleep(&self, duration: Duration) -> Result<(), ToolError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ToolError::Cancelled),
            _ = self.deadline_reached() => Err(ToolError::DeadlineExceeded),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}
