//! 顾客问题工具：异步查询关联器
//!
//! 外部问答表由系统外的人或进程应答，无法同步 RPC。提交问题得到关联 ID，
//! 再按固定间隔轮询答案列，直到拿到答案或超过等待上限（QueryTimeout）。
//! 轮询等待可被外层交换的取消信号或截止时间打断。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use schemars::{schema_for, JsonSchema};
use serde::Deserialize;
use serde_json::Value;
use tokio::time::Instant;

use crate::core::ToolError;
use crate::store::{coerce_scalar, RecordStore};
use crate::tools::{Tool, ToolContext};

/// 轮询配置
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CorrelatorConfig {
    /// 总等待上限
    pub timeout: Duration,
    /// 两次轮询之间的间隔
    pub poll_interval: Duration,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(1),
        }
    }
}

impl CorrelatorConfig {
    /// 由秒数构造（允许小数）；非法值回退默认
    pub fn from_secs_f64(timeout_secs: f64, poll_interval_secs: f64) -> Self {
        let defaults = Self::default();
        Self {
            timeout: Duration::try_from_secs_f64(timeout_secs).unwrap_or(defaults.timeout),
            poll_interval: Duration::try_from_secs_f64(poll_interval_secs)
                .unwrap_or(defaults.poll_interval),
        }
    }
}

/// 查询关联器：submit -> 轮询 fetch_answer
pub struct QueryCorrelator {
    store: Arc<dyn RecordStore>,
    config: CorrelatorConfig,
}

impl QueryCorrelator {
    pub fn new(store: Arc<dyn RecordStore>, config: CorrelatorConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> CorrelatorConfig {
        self.config
    }

    /// 写入待答问题，返回关联 ID
    pub async fn submit(&self, question: &str) -> Result<String, ToolError> {
        let raw = self
            .store
            .insert_question(question)
            .await
            .map_err(|e| ToolError::SubmitFailure(e.to_string()))?;
        let coerced = coerce_scalar(&raw);
        if coerced.is_fallback() {
            tracing::warn!(?raw, "Submit result not structured, using raw text as correlation id");
        }
        match coerced.value {
            Some(id) if !id.is_empty() => Ok(id),
            _ => Err(ToolError::SubmitFailure(format!(
                "store returned no id: {:?}",
                raw
            ))),
        }
    }

    /// 读取答案；尚未应答（无行或 NULL）返回 None
    pub async fn fetch_answer(&self, correlation_id: &str) -> Result<Option<String>, ToolError> {
        let raw = self.store.select_answer(correlation_id).await?;
        let coerced = coerce_scalar(&raw);
        if coerced.is_fallback() {
            tracing::warn!(correlation_id, "Answer result not structured, using raw text as answer");
        }
        Ok(coerced.value)
    }

    /// 轮询直到拿到答案、超过 timeout，或被上下文打断
    pub async fn wait_for_answer(
        &self,
        correlation_id: &str,
        ctx: &ToolContext,
    ) -> Result<String, ToolError> {
        let start = Instant::now();
        let mut polls = 0u32;
        loop {
            ctx.check()?;
            polls += 1;
            if let Some(answer) = self.fetch_answer(correlation_id).await? {
                tracing::info!(correlation_id, polls, "Query answered");
                return Ok(answer);
            }

            if start.elapsed() > self.config.timeout {
                tracing::warn!(
                    correlation_id,
                    polls,
                    "Query timed out after {:?}",
                    self.config.timeout
                );
                return Err(ToolError::QueryTimeout {
                    correlation_id: correlation_id.to_string(),
                    timeout: self.config.timeout,
                });
            }

            tracing::debug!(correlation_id, "Result not ready, waiting...");
            ctx.sleep(self.config.poll_interval).await?;
        }
    }

    /// 提交问题并等待答案
    pub async fn ask(&self, question: &str, ctx: &ToolContext) -> Result<String, ToolError> {
        tracing::debug!(question, "Submitting question");
        let correlation_id = self.submit(question).await?;
        tracing::debug!(correlation_id = %correlation_id, "Submitted question");
        self.wait_for_answer(&correlation_id, ctx).await
    }
}

/// 工具参数
#[derive(Deserialize, JsonSchema)]
struct CustomerQueryArgs {
    /// 顾客的问题原文，如 "Do you have vegetarian dishes?"
    query: String,
}

/// 向餐厅管理方提问的工具
pub struct CustomerQueryTool {
    correlator: QueryCorrelator,
}

impl CustomerQueryTool {
    pub const NAME: &'static str = "CustomerQueryTool";

    pub fn new(correlator: QueryCorrelator) -> Self {
        Self { correlator }
    }
}

/// 接受 {"query": "..."} 或直接一个字符串
fn question_from_args(args: Value) -> Result<String, ToolError> {
    let question = match args {
        Value::String(s) => s,
        other => {
            serde_json::from_value::<CustomerQueryArgs>(other)
                .map_err(|e| ToolError::InvalidArgs(e.to_string()))?
                .query
        }
    };
    if question.trim().is_empty() {
        return Err(ToolError::InvalidArgs("query must not be empty".to_string()));
    }
    Ok(question)
}

#[async_trait]
impl Tool for CustomerQueryTool {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "A tool to query restaurant management. Provide a question as input, and it will return the answer of restaurant management."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::to_value(schema_for!(CustomerQueryArgs)).unwrap_or_default()
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let question = question_from_args(args)?;
        self.correlator.ask(&question, ctx).await
    }
}
