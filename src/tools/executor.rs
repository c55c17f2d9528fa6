//! 工具执行器
//!
//! 持有 ToolRegistry，把模型的 ToolCallRequest 分发给同名工具；每次调用输出结构化审计日志（JSON）。
//! 未注册的工具名不产生结果；工具失败转成带错误标记的 ToolResult，只影响这一个调用。

use std::time::Instant;

use serde::Serialize;

use crate::core::ToolError;
use crate::llm::ToolDescriptor;
use crate::memory::{Message, ToolCallRequest};
use crate::tools::{ToolContext, ToolRegistry};

/// 单个工具调用的结果
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ToolResult {
    pub call_id: String,
    pub tool_name: String,
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    /// 写回会话的 tool 消息
    pub fn to_message(&self) -> Message {
        Message::tool(self.call_id.clone(), self.content.clone())
    }
}

/// 分发结果
#[derive(Debug)]
pub enum Dispatch {
    Completed(ToolResult),
    /// 没有同名工具
    Unknown,
    /// 被外层取消或截止时间打断，整个交换应终止
    Aborted(ToolError),
}

/// 工具执行器
pub struct ToolExecutor {
    registry: ToolRegistry,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry) -> Self {
        Self { registry }
    }

    pub async fn dispatch(&self, call: &ToolCallRequest, ctx: &ToolContext) -> Dispatch {
        let start = Instant::now();
        let args_preview = args_preview(&call.args);
        let Some(tool) = self.registry.get(&call.name) else {
            tracing::warn!(
                tool = %call.name,
                call_id = %call.id,
                "Model requested unregistered tool, skipping"
            );
            return Dispatch::Unknown;
        };

        // 工具本身不一定检查上下文，这里统一与取消和截止时间竞速
        let result = match ctx.check() {
            Err(e) => Err(e),
            Ok(()) => tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => Err(ToolError::Cancelled),
                _ = ctx.deadline_reached() => Err(ToolError::DeadlineExceeded),
                result = ToolRegistry::run_tool(tool.as_ref(), call.args.clone(), ctx) => result,
            },
        };

        let outcome = match &result {
            Ok(_) => "ok",
            Err(ToolError::QueryTimeout { .. }) => "timeout",
            Err(ToolError::Cancelled) | Err(ToolError::DeadlineExceeded) => "aborted",
            Err(_) => "error",
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": call.name,
            "call_id": call.id,
            "ok": result.is_ok(),
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit, "tool");

        match result {
            Ok(content) => Dispatch::Completed(ToolResult {
                call_id: call.id.clone(),
                tool_name: call.name.clone(),
                content,
                is_error: false,
            }),
            Err(e @ (ToolError::Cancelled | ToolError::DeadlineExceeded)) => Dispatch::Aborted(e),
            Err(e) => Dispatch::Completed(ToolResult {
                call_id: call.id.clone(),
                tool_name: call.name.clone(),
                content: format!("Error: {}", e),
                is_error: true,
            }),
        }
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.registry.descriptors()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{ExecutionMode, Tool};
    use async_trait::async_trait;
    use serde_json::Value;
    use tokio_util::sync::CancellationToken;

    struct Echo;

    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo args"
        }

        fn mode(&self) -> ExecutionMode {
            ExecutionMode::Sync
        }

        fn run(&self, args: Value) -> Result<String, ToolError> {
            Ok(args.to_string())
        }
    }

    struct Waits;

    #[async_trait]
    impl Tool for Waits {
        fn name(&self) -> &str {
            "waits"
        }

        fn description(&self) -> &str {
            "Sleeps on the context"
        }

        async fn execute(&self, _args: Value, ctx: &ToolContext) -> Result<String, ToolError> {
            ctx.sleep(std::time::Duration::from_secs(60)).await?;
            Ok("late".into())
        }
    }

    struct Fails;

    impl Tool for Fails {
        fn name(&self) -> &str {
            "fails"
        }

        fn description(&self) -> &str {
            "Always rejects its input"
        }

        fn mode(&self) -> ExecutionMode {
            ExecutionMode::Sync
        }

        fn run(&self, _args: Value) -> Result<String, ToolError> {
            Err(ToolError::InvalidArgs("missing dish".into()))
        }
    }

    fn executor() -> ToolExecutor {
        let mut registry = ToolRegistry::new();
        registry.register(Echo);
        registry.register(Fails);
        registry.register(Waits);
        ToolExecutor::new(registry)
    }

    #[tokio::test]
    async fn test_dispatch_outcomes() {
        let exec = executor();
        let ctx = ToolContext::default();

        let call = ToolCallRequest::new("c1", "echo", serde_json::json!({"a": 1}));
        match exec.dispatch(&call, &ctx).await {
            Dispatch::Completed(r) => {
                assert_eq!(r.content, r#"{"a":1}"#);
                assert!(!r.is_error);
                assert_eq!(r.to_message().tool_call_id.as_deref(), Some("c1"));
            }
            other => panic!("Expected Completed, got {:?}", other),
        }

        let call = ToolCallRequest::new("c2", "nope", Value::Null);
        assert!(matches!(exec.dispatch(&call, &ctx).await, Dispatch::Unknown));
    }

    #[tokio::test]
    async fn test_tool_failure_becomes_error_result() {
        let exec = executor();
        let call = ToolCallRequest::new("c1", "fails", Value::Null);
        match exec.dispatch(&call, &ToolContext::default()).await {
            Dispatch::Completed(r) => {
                assert!(r.is_error);
                assert_eq!(r.content, "Error: Invalid arguments: missing dish");
            }
            other => panic!("Expected error result, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_expired_deadline_aborts() {
        let exec = executor();
        let call = ToolCallRequest::new("c1", "waits", Value::Null);
        let ctx = ToolContext::default().with_deadline(Some(tokio::time::Instant::now()));
        assert!(matches!(
            exec.dispatch(&call, &ctx).await,
            Dispatch::Aborted(ToolError::DeadlineExceeded)
        ));
    }

    #[tokio::test]
    async fn test_cancellation_aborts() {
        let exec = executor();
        let token = CancellationToken::new();
        token.cancel();
        let ctx = ToolContext::new(token);
        let call = ToolCallRequest::new("c1", "waits", Value::Null);
        assert!(matches!(
            exec.dispatch(&call, &ctx).await,
            Dispatch::Aborted(ToolError::Cancelled)
        ));
    }

    struct Hangs;

    #[async_trait]
    impl Tool for Hangs {
        fn name(&self) -> &str {
            "hangs"
        }

        fn description(&self) -> &str {
            "Ignores the context and blocks for ten minutes"
        }

        async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<String, ToolError> {
            tokio::time::sleep(std::time::Duration::from_secs(600)).await;
            Ok("too late".into())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_interrupts_tool_that_ignores_context() {
        let mut registry = ToolRegistry::new();
        registry.register(Hangs);
        let exec = ToolExecutor::new(registry);
        let start = tokio::time::Instant::now();
        let ctx = ToolContext::default()
            .with_deadline(Some(start + std::time::Duration::from_secs(3)));

        let call = ToolCallRequest::new("c1", "hangs", Value::Null);
        assert!(matches!(
            exec.dispatch(&call, &ctx).await,
            Dispatch::Aborted(ToolError::DeadlineExceeded)
        ));
        assert!(start.elapsed() < std::time::Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_cancelled_context_skips_sync_tool() {
        let exec = executor();
        let token = CancellationToken::new();
        token.cancel();
        let call = ToolCallRequest::new("c1", "echo", Value::Null);
        assert!(matches!(
            exec.dispatch(&call, &ToolContext::new(token)).await,
            Dispatch::Aborted(ToolError::Cancelled)
        ));
    }

    #[test]
    fn test_args_preview_truncates() {
        let long = Value::String("x".repeat(500));
        assert!(args_preview(&long).ends_with("..."));
        assert!(args_preview(&long).chars().count() <= 203);
    }
}
