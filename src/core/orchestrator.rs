//! 编排器：一次交换的主控循环
//!
//! 状态：MODEL_CALL -> (结束 | DISPATCHING_TOOLS -> MODEL_CALL)。
//! 把输入追加到会话、携带完整历史调用模型、追加并产出 ai 消息；若带 tool calls，
//! 按请求顺序逐个分发并产出结果，再把全部结果作为下一轮输入。
//! 整个交换期间持有会话锁，同一会话的交换互斥。

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, BoxStream, StreamExt};
use tokio::sync::OwnedMutexGuard;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::core::{AgentError, ExchangeItem, ToolError};
use crate::llm::LlmClient;
use crate::memory::{Message, Session, SessionManager, ToolCallRequest};
use crate::tools::{Dispatch, ToolContext, ToolExecutor};

/// 编排配置
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    /// 单次交换最多执行的工具轮数
    pub max_tool_rounds: usize,
    /// 单次交换的总时限（含模型调用与轮询等待）
    pub exchange_timeout: Option<Duration>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: 8,
            exchange_timeout: None,
        }
    }
}

/// 交换输入：新的用户提示，或预先构造的消息序列，二者互斥
#[derive(Clone, Debug)]
pub enum ExchangeInput {
    Prompt(String),
    Messages(Vec<Message>),
}

impl From<&str> for ExchangeInput {
    fn from(prompt: &str) -> Self {
        ExchangeInput::Prompt(prompt.to_string())
    }
}

impl From<String> for ExchangeInput {
    fn from(prompt: String) -> Self {
        ExchangeInput::Prompt(prompt)
    }
}

pub struct Orchestrator {
    llm: Arc<dyn LlmClient>,
    executor: ToolExecutor,
    sessions: Arc<SessionManager>,
    config: OrchestratorConfig,
}

enum Phase {
    Start(ExchangeInput),
    ModelCall(Vec<Message>),
    Dispatch {
        pending: VecDeque<ToolCallRequest>,
        results: Vec<Message>,
    },
    Fail(AgentError),
    Done,
}

/// 单次交换的状态，由 stream 独占
struct Exchange<'a> {
    orchestrator: &'a Orchestrator,
    exchange_id: String,
    session_id: String,
    session: Option<OwnedMutexGuard<Session>>,
    phase: Phase,
    rounds: usize,
    ctx: ToolContext,
}

impl Orchestrator {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        executor: ToolExecutor,
        sessions: Arc<SessionManager>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            llm,
            executor,
            sessions,
            config,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn executor(&self) -> &ToolExecutor {
        &self.executor
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// 发起一次交换，返回惰性、有限、只能消费一次的输出流。
    /// 流在首次 poll 时才获取会话锁；产出 Err 后流结束。
    pub fn invoke(
        &self,
        session_id: &str,
        input: impl Into<ExchangeInput>,
        cancel: CancellationToken,
    ) -> BoxStream<'_, Result<ExchangeItem, AgentError>> {
        let exchange = Exchange {
            orchestrator: self,
            exchange_id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            session: None,
            phase: Phase::Start(input.into()),
            rounds: 0,
            ctx: ToolContext::new(cancel),
        };
        stream::unfold(exchange, |mut exchange| async move {
            let item = exchange.next_item().await?;
            Some((item, exchange))
        })
        .boxed()
    }

    /// 消费整个交换，返回最后一条 ai 消息的文本
    pub async fn ask(&self, session_id: &str, prompt: &str) -> Result<String, AgentError> {
        let mut items = self.invoke(session_id, prompt, CancellationToken::new());
        let mut last = String::new();
        while let Some(item) = items.next().await {
            if let ExchangeItem::Ai { message } = item? {
                last = message.content;
            }
        }
        Ok(last)
    }
}

impl Exchange<'_> {
    async fn next_item(&mut self) -> Option<Result<ExchangeItem, AgentError>> {
        loop {
            match std::mem::replace(&mut self.phase, Phase::Done) {
                Phase::Done => return None,
                Phase::Fail(e) => return Some(Err(e)),
                Phase::Start(input) => {
                    if let Err(e) = self.begin().await {
                        return Some(Err(e));
                    }
                    self.phase = Phase::ModelCall(match input {
                        ExchangeInput::Prompt(prompt) => vec![Message::human(prompt)],
                        ExchangeInput::Messages(messages) => messages,
                    });
                }
                Phase::ModelCall(input) => {
                    let reply = match self.model_call(input).await {
                        Ok(reply) => reply,
                        Err(e) => {
                            tracing::error!(exchange_id = %self.exchange_id, error = %e, "Exchange failed");
                            return Some(Err(e));
                        }
                    };
                    if reply.has_tool_calls() {
                        let max_rounds = self.orchestrator.config.max_tool_rounds;
                        self.phase = if self.rounds >= max_rounds {
                            tracing::warn!(exchange_id = %self.exchange_id, max_rounds, "Tool loop limit reached");
                            Phase::Fail(AgentError::ToolLoopExceeded { max_rounds })
                        } else {
                            Phase::Dispatch {
                                pending: reply.tool_calls.iter().cloned().collect(),
                                results: Vec::new(),
                            }
                        };
                    } else {
                        tracing::info!(
                            exchange_id = %self.exchange_id,
                            rounds = self.rounds,
                            "Exchange complete"
                        );
                    }
                    return Some(Ok(ExchangeItem::Ai { message: reply }));
                }
                Phase::Dispatch {
                    mut pending,
                    mut results,
                } => {
                    let Some(call) = pending.pop_front() else {
                        if results.is_empty() {
                            // 本轮全部是未注册工具，没有可回传的结果
                            tracing::warn!(exchange_id = %self.exchange_id, "No tool results to feed back, ending exchange");
                            return None;
                        }
                        self.rounds += 1;
                        self.phase = Phase::ModelCall(results);
                        continue;
                    };

                    match self.orchestrator.executor.dispatch(&call, &self.ctx).await {
                        Dispatch::Completed(result) => {
                            results.push(result.to_message());
                            self.phase = Phase::Dispatch { pending, results };
                            return Some(Ok(ExchangeItem::ToolResult { result }));
                        }
                        Dispatch::Unknown => {
                            self.phase = Phase::Dispatch { pending, results };
                            return Some(Ok(ExchangeItem::UnknownTool {
                                call_id: call.id,
                                name: call.name,
                            }));
                        }
                        Dispatch::Aborted(e) => return Some(Err(abort_reason(e))),
                    }
                }
            }
        }
    }

    /// 设置截止时间并获取会话锁
    async fn begin(&mut self) -> Result<(), AgentError> {
        let deadline = self
            .orchestrator
            .config
            .exchange_timeout
            .map(|t| Instant::now() + t);
        self.ctx = self.ctx.clone().with_deadline(deadline);
        tracing::info!(exchange_id = %self.exchange_id, session_id = %self.session_id, "Exchange started");

        let sessions = &self.orchestrator.sessions;
        let guard = tokio::select! {
            biased;
            _ = self.ctx.cancel.cancelled() => return Err(AgentError::Cancelled),
            _ = self.ctx.deadline_reached() => return Err(AgentError::DeadlineExceeded),
            guard = sessions.lock(&self.session_id) => guard,
        };
        self.session = Some(guard);
        Ok(())
    }

    /// 追加输入、调用模型、追加并返回 ai 消息
    async fn model_call(&mut self, input: Vec<Message>) -> Result<Message, AgentError> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| AgentError::UnknownSession(self.session_id.clone()))?;
        session.push_all(input)?;

        let tools = self.orchestrator.executor.descriptors();
        tracing::debug!(
            exchange_id = %self.exchange_id,
            history = session.len(),
            round = self.rounds,
            model = self.orchestrator.llm.model_name(),
            "Calling model"
        );
        let ctx = &self.ctx;
        let reply = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err(AgentError::Cancelled),
            _ = ctx.deadline_reached() => return Err(AgentError::DeadlineExceeded),
            reply = self.orchestrator.llm.complete(session.messages(), &tools) => reply?,
        };

        session.push(reply.clone())?;
        Ok(reply)
    }
}

fn abort_reason(e: ToolError) -> AgentError {
    match e {
        ToolError::DeadlineExceeded => AgentError::DeadlineExceeded,
        _ => AgentError::Cancelled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmError, MockLlmClient};
    use crate::memory::Role;
    use crate::tools::{Tool, ToolRegistry};
    use async_trait::async_trait;
    use serde_json::Value;

    struct Menu;

    impl Tool for Menu {
        fn name(&self) -> &str {
            "MenuTool"
        }

        fn description(&self) -> &str {
            "Returns the menu"
        }

        fn mode(&self) -> crate::tools::ExecutionMode {
            crate::tools::ExecutionMode::Sync
        }

        fn run(&self, _args: Value) -> Result<String, ToolError> {
            Ok("pizza, pasta".into())
        }
    }

    struct Broken;

    #[async_trait]
    impl Tool for Broken {
        fn name(&self) -> &str {
            "BrokenTool"
        }

        fn description(&self) -> &str {
            "Always fails"
        }

        async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<String, ToolError> {
            Err(ToolError::InvalidArgs("garbage".into()))
        }
    }

    struct Stuck;

    #[async_trait]
    impl Tool for Stuck {
        fn name(&self) -> &str {
            "StuckTool"
        }

        fn description(&self) -> &str {
            "Waits forever"
        }

        async fn execute(&self, _args: Value, ctx: &ToolContext) -> Result<String, ToolError> {
            loop {
                ctx.sleep(Duration::from_secs(1)).await?;
            }
        }
    }

    fn call(id: &str, name: &str) -> ToolCallRequest {
        ToolCallRequest::new(id, name, serde_json::json!({}))
    }

    fn orchestrator(llm: Arc<MockLlmClient>, config: OrchestratorConfig) -> Orchestrator {
        let mut registry = ToolRegistry::new();
        registry.register(Menu);
        registry.register(Broken);
        registry.register(Stuck);
        Orchestrator::new(
            llm,
            ToolExecutor::new(registry),
            Arc::new(SessionManager::new("You are a waiter.")),
            config,
        )
    }

    async fn collect(
        orch: &Orchestrator,
        input: impl Into<ExchangeInput>,
    ) -> Vec<Result<ExchangeItem, AgentError>> {
        orch.invoke("s1", input, CancellationToken::new())
            .collect()
            .await
    }

    #[tokio::test]
    async fn test_no_tool_calls_emits_single_item() {
        let llm = Arc::new(MockLlmClient::scripted([Message::ai("Welcome!")]));
        let orch = orchestrator(llm.clone(), OrchestratorConfig::default());

        let items = collect(&orch, "hi").await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().unwrap().as_ai().unwrap().content, "Welcome!");

        let history = orch.sessions().messages("s1").await.unwrap();
        let roles: Vec<_> = history.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::Human, Role::Ai]);
        assert_eq!(llm.calls()[0].tools, vec!["MenuTool", "BrokenTool", "StuckTool"]);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_skipped_and_order_kept() {
        let llm = Arc::new(MockLlmClient::scripted([
            Message::ai_with_tool_calls("", vec![call("c1", "MenuTool"), call("c2", "DanceTool")]),
            Message::ai("We have pizza and pasta."),
        ]));
        let orch = orchestrator(llm.clone(), OrchestratorConfig::default());

        let items: Vec<ExchangeItem> = collect(&orch, "menu?")
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(items.len(), 4);
        assert!(items[0].as_ai().unwrap().has_tool_calls());
        let result = items[1].as_tool_result().unwrap();
        assert_eq!(result.call_id, "c1");
        assert_eq!(result.content, "pizza, pasta");
        assert!(matches!(&items[2], ExchangeItem::UnknownTool { call_id, name } if call_id == "c2" && name == "DanceTool"));
        assert_eq!(items[3].as_ai().unwrap().content, "We have pizza and pasta.");

        // 第二次模型调用只带回一条 tool 消息
        let calls = llm.calls();
        assert_eq!(calls.len(), 2);
        let tool_messages: Vec<_> = calls[1]
            .messages
            .iter()
            .filter(|m| m.role == Role::Tool)
            .collect();
        assert_eq!(tool_messages.len(), 1);
        assert_eq!(tool_messages[0].tool_call_id.as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn test_tool_error_does_not_abort_siblings() {
        let llm = Arc::new(MockLlmClient::scripted([
            Message::ai_with_tool_calls("", vec![call("c1", "BrokenTool"), call("c2", "MenuTool")]),
            Message::ai("Sorry, partial info."),
        ]));
        let orch = orchestrator(llm, OrchestratorConfig::default());

        let items: Vec<ExchangeItem> = collect(&orch, "q")
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        let results: Vec<_> = items.iter().filter_map(|i| i.as_tool_result()).collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_error);
        assert!(results[0].content.starts_with("Error:"));
        assert!(!results[1].is_error);
    }

    #[tokio::test]
    async fn test_all_unknown_tools_end_exchange() {
        let llm = Arc::new(MockLlmClient::scripted([Message::ai_with_tool_calls(
            "",
            vec![call("c1", "DanceTool")],
        )]));
        let orch = orchestrator(llm.clone(), OrchestratorConfig::default());

        let items = collect(&orch, "dance").await;
        assert_eq!(items.len(), 2);
        assert!(matches!(items[1], Ok(ExchangeItem::UnknownTool { .. })));
        assert_eq!(llm.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_tool_loop_exceeded() {
        let llm = Arc::new(MockLlmClient::new());
        for i in 0..5 {
            llm.push_response(Message::ai_with_tool_calls(
                "",
                vec![call(&format!("c{i}"), "MenuTool")],
            ));
        }
        let orch = orchestrator(
            llm.clone(),
            OrchestratorConfig {
                max_tool_rounds: 2,
                exchange_timeout: None,
            },
        );

        let items = collect(&orch, "loop").await;
        assert!(matches!(
            items.last(),
            Some(Err(AgentError::ToolLoopExceeded { max_rounds: 2 }))
        ));
        assert_eq!(llm.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_model_error_is_fatal() {
        let llm = Arc::new(MockLlmClient::new());
        llm.push_error(LlmError::RateLimited {
            retry_after_ms: 100,
        });
        let orch = orchestrator(llm, OrchestratorConfig::default());

        let items = collect(&orch, "hi").await;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(AgentError::LlmError(_))));
    }

    #[tokio::test]
    async fn test_tool_result_messages_as_input() {
        let llm = Arc::new(MockLlmClient::scripted([
            Message::ai_with_tool_calls("", vec![call("c1", "DanceTool")]),
            Message::ai("ok"),
        ]));
        let orch = orchestrator(llm, OrchestratorConfig::default());
        let _ = collect(&orch, "hi").await;

        // 外部补上 DanceTool 的结果后继续
        let items = collect(
            &orch,
            ExchangeInput::Messages(vec![Message::tool("c1", "danced")]),
        )
        .await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().unwrap().as_ai().unwrap().content, "ok");
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_preempts_tool() {
        let llm = Arc::new(MockLlmClient::scripted([Message::ai_with_tool_calls(
            "",
            vec![call("c1", "StuckTool")],
        )]));
        let orch = orchestrator(
            llm,
            OrchestratorConfig {
                max_tool_rounds: 8,
                exchange_timeout: Some(Duration::from_secs(5)),
            },
        );

        let start = Instant::now();
        let items = collect(&orch, "wait").await;
        assert!(matches!(items.last(), Some(Err(AgentError::DeadlineExceeded))));
        assert!(start.elapsed() < Duration::from_secs(7));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let llm = Arc::new(MockLlmClient::new());
        let orch = orchestrator(llm.clone(), OrchestratorConfig::default());
        let token = CancellationToken::new();
        token.cancel();

        for _ in 0..20 {
            let items: Vec<_> = orch.invoke("s1", "hi", token.clone()).collect().await;
            assert_eq!(items.len(), 1);
            assert!(matches!(items[0], Err(AgentError::Cancelled)));
        }
        assert!(llm.calls().is_empty());
        assert!(orch.sessions().messages("s1").await.is_none());
    }

    #[tokio::test]
    async fn test_rejected_input_batch_leaves_history_unchanged() {
        let llm = Arc::new(MockLlmClient::scripted([Message::ai_with_tool_calls(
            "",
            vec![call("c1", "DanceTool")],
        )]));
        let orch = orchestrator(llm.clone(), OrchestratorConfig::default());
        let _ = collect(&orch, "dance").await;
        let before = orch.sessions().messages("s1").await.unwrap().len();

        let items = collect(
            &orch,
            ExchangeInput::Messages(vec![Message::tool("c1", "danced"), Message::tool("c9", "?")]),
        )
        .await;
        assert_eq!(items.len(), 1);
        assert!(matches!(&items[0], Err(AgentError::InvalidMessage { reason, .. }) if reason.contains("c9")));
        assert_eq!(orch.sessions().messages("s1").await.unwrap().len(), before);
        assert_eq!(llm.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_same_session_exchanges_are_serialized() {
        let llm = Arc::new(MockLlmClient::new());
        let orch = Arc::new(orchestrator(llm, OrchestratorConfig::default()));

        let mut handles = Vec::new();
        for i in 0..4 {
            let orch = orch.clone();
            handles.push(tokio::spawn(async move {
                orch.ask("shared", &format!("q{i}")).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let history = orch.sessions().messages("shared").await.unwrap();
        assert_eq!(history.len(), 9);
        // 每条 human 后紧跟它自己的回显
        for pair in history[1..].chunks(2) {
            assert_eq!(pair[0].role, Role::Human);
            assert_eq!(pair[1].content, format!("Echo from Mock: {}", pair[0].content));
        }
    }
}
