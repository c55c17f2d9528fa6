//! Agent 运行时装配
//!
//! 由配置构建模型客户端、记录库、工具注册表与编排器；CLI 与集成测试共用。
//! create_runtime_with 接受外部传入的模型与记录库（测试用 Mock / 内存库）。

use std::sync::Arc;

use futures_util::stream::BoxStream;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::{
    AgentError, ExchangeInput, ExchangeItem, Orchestrator, RecordStoreCleanup,
    SessionTableCleanup, ShutdownCoordinator, ShutdownManager,
};
use crate::llm::{LlmClient, MockLlmClient, OpenAiClient, RetryConfig, RetryingLlmClient};
use crate::memory::SessionManager;
use crate::prompt::load_system_prompt;
use crate::store::{RecordStore, SqlRecordStore};
use crate::tools::{
    CustomerQueryTool, QueryCorrelator, SetOrderSlipTool, SqlQueryTool, ToolExecutor,
    ToolRegistry,
};

/// 根据环境变量选择模型后端：有 OPENAI_API_KEY 用 OpenAI 兼容端点，否则 Mock
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    match std::env::var("OPENAI_API_KEY") {
        Ok(key) if !key.trim().is_empty() => {
            tracing::info!("Using OpenAI LLM ({})", cfg.llm.model);
            let client = OpenAiClient::new(cfg.llm.to_settings(Some(key)));
            Arc::new(RetryingLlmClient::new(
                Arc::new(client),
                RetryConfig {
                    max_retries: cfg.llm.retry_budget,
                    ..Default::default()
                },
            ))
        }
        _ => {
            tracing::warn!("OPENAI_API_KEY not set, using Mock LLM");
            Arc::new(MockLlmClient::new())
        }
    }
}

/// 注册工具：顾客问题、点单；SQL 工具需在配置中开启
pub fn build_registry(
    cfg: &AppConfig,
    store: Arc<dyn RecordStore>,
    order_slip: SetOrderSlipTool,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(CustomerQueryTool::new(QueryCorrelator::new(
        store.clone(),
        cfg.query.correlator_config(),
    )));
    registry.register(order_slip);
    if cfg.tools.sql_query_enabled {
        tracing::warn!("SQLQueryTool enabled: the model can run arbitrary SQL");
        registry.register(SqlQueryTool::new(store));
    }
    registry
}

/// 装配完成的运行时
pub struct AgentRuntime {
    pub orchestrator: Arc<Orchestrator>,
    pub sessions: Arc<SessionManager>,
    pub store: Arc<dyn RecordStore>,
    /// 与注册表中的点单工具共享同一份当前点单
    pub order_slip: SetOrderSlipTool,
    /// 默认会话 ID
    pub session_id: String,
}

impl AgentRuntime {
    /// 在默认会话上发起一次交换
    pub fn invoke(
        &self,
        input: impl Into<ExchangeInput>,
        cancel: CancellationToken,
    ) -> BoxStream<'_, Result<ExchangeItem, AgentError>> {
        self.orchestrator.invoke(&self.session_id, input, cancel)
    }

    pub async fn ask(&self, prompt: &str) -> Result<String, AgentError> {
        self.orchestrator.ask(&self.session_id, prompt).await
    }

    /// 关闭时：先清空会话表，再关闭记录库
    pub fn shutdown_coordinator(&self, manager: Arc<ShutdownManager>) -> ShutdownCoordinator {
        let mut coordinator = ShutdownCoordinator::new(manager);
        coordinator.register(SessionTableCleanup::new(self.sessions.clone()));
        coordinator.register(RecordStoreCleanup::new(self.store.clone()));
        coordinator
    }
}

/// 按配置创建运行时：读取系统提示、连接记录库、选择模型
pub async fn create_runtime(cfg: &AppConfig) -> Result<AgentRuntime, AgentError> {
    let system_prompt = load_system_prompt(&cfg.app)?;
    let store = SqlRecordStore::connect(
        &cfg.database.database_url(),
        &cfg.database.table,
        cfg.database.max_connections,
    )
    .await?;
    store.ensure_schema().await?;
    let llm = create_llm_from_config(cfg);
    Ok(create_runtime_with(cfg, system_prompt, llm, Arc::new(store)))
}

pub fn create_runtime_with(
    cfg: &AppConfig,
    system_prompt: impl Into<String>,
    llm: Arc<dyn LlmClient>,
    store: Arc<dyn RecordStore>,
) -> AgentRuntime {
    let sessions = Arc::new(SessionManager::new(system_prompt));
    let order_slip = SetOrderSlipTool::new();
    let registry = build_registry(cfg, store.clone(), order_slip.clone());
    tracing::info!(tools = ?registry.tool_names(), "Tools registered");

    let orchestrator = Arc::new(Orchestrator::new(
        llm,
        ToolExecutor::new(registry),
        sessions.clone(),
        cfg.agent.orchestrator_config(),
    ));

    AgentRuntime {
        orchestrator,
        sessions,
        store,
        order_slip,
        session_id: cfg.app.session_id.clone(),
    }
}
