//! 直接对记录库执行 SQL 的工具（默认不注册）

use std::sync::Arc;

use async_trait::async_trait;
use schemars::{schema_for, JsonSchema};
use serde::Deserialize;
use serde_json::Value;

use crate::core::ToolError;
use crate::store::RecordStore;
use crate::tools::{Tool, ToolContext};

#[derive(Deserialize, JsonSchema)]
struct SqlQueryArgs {
    /// 要执行的 SQL 语句
    query: String,
}

pub struct SqlQueryTool {
    store: Arc<dyn RecordStore>,
}

impl SqlQueryTool {
    pub const NAME: &'static str = "SQLQueryTool";

    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for SqlQueryTool {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "A tool to execute SQL queries against the restaurant database. Provide a SQL query as input, and it will return the result rows."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::to_value(schema_for!(SqlQueryArgs)).unwrap_or_default()
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let sql = match args {
            Value::String(s) => s,
            other => {
                serde_json::from_value::<SqlQueryArgs>(other)
                    .map_err(|e| ToolError::InvalidArgs(e.to_string()))?
                    .query
            }
        };
        ctx.check()?;
        // 执行失败以文本形式回给模型
        match self.store.run_sql(&sql).await {
            Ok(raw) => Ok(raw.render()),
            Err(e) => {
                tracing::warn!(error = %e, "SQL query failed");
                Ok(format!("Error executing query: {}", e))
            }
        }
    }
}
