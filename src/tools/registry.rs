//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / parameters_schema / 执行），由 ToolRegistry 按名注册与查找。
//! 工具声明自己的执行方式：同步工具实现 run，异步工具实现 execute；
//! 用另一种方式调用会立即失败（SyncUnsupported / AsyncUnsupported），不会悄悄换一种方式执行。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::ToolError;
use crate::llm::ToolDescriptor;
use crate::tools::ToolContext;

/// 工具支持的执行方式
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionMode {
    Sync,
    Async,
}

/// 工具 trait
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（模型 tool call 中的 name）
    fn name(&self) -> &str;

    /// 工具描述（供模型选择工具）
    fn description(&self) -> &str;

    /// 参数 JSON Schema
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Async
    }

    /// 同步执行
    fn run(&self, _args: Value) -> Result<String, ToolError> {
        Err(ToolError::SyncUnsupported(self.name().to_string()))
    }

    /// 异步执行
    async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<String, ToolError> {
        Err(ToolError::AsyncUnsupported(self.name().to_string()))
    }
}

/// 工具注册表：按名称存储 Arc<dyn Tool>，保留注册顺序
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    /// 同名工具后注册者覆盖先注册者
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_none() {
            self.order.push(name);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// 按名精确匹配并按工具声明的方式执行；未注册返回 None
    pub async fn invoke(
        &self,
        name: &str,
        args: Value,
        ctx: &ToolContext,
    ) -> Option<Result<String, ToolError>> {
        let tool = self.tools.get(name)?;
        Some(Self::run_tool(tool.as_ref(), args, ctx).await)
    }

    /// 按工具声明的执行方式调用
    pub async fn run_tool(
        tool: &dyn Tool,
        args: Value,
        ctx: &ToolContext,
    ) -> Result<String, ToolError> {
        match tool.mode() {
            ExecutionMode::Sync => tool.run(args),
            ExecutionMode::Async => tool.execute(args, ctx).await,
        }
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// 工具描述列表（注册顺序），随每次模型调用发送
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| ToolDescriptor {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters_schema(),
            })
            .collect()
    }
}
