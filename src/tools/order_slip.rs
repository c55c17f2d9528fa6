//! 点单工具：设置当前点单
//!
//! 每个工具实例只保留一份「当前」点单，后写覆盖先写，不保留历史。
//! 同步工具：异步入口直接返回 AsyncUnsupported。

use std::sync::{Arc, RwLock};

use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::core::ToolError;
use crate::tools::{ExecutionMode, Tool};

/// 点单中的一行
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct OrderLine {
    /// 菜品 ID（菜单中的编号）
    #[serde(deserialize_with = "id_from_string_or_number")]
    pub id: String,
    /// 菜品名称
    pub name: String,
    /// 数量
    pub quantity: u32,
}

/// 点单
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct OrderSlip {
    pub items: Vec<OrderLine>,
}

fn id_from_string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {}",
            other
        ))),
    }
}

/// 下游点单接收方（如厨房打印、POS）
pub trait OrderSlipSink: Send + Sync {
    fn accept(&self, slip: &OrderSlip);
}

/// 设置点单工具；Clone 共享同一份当前点单
#[derive(Clone, Default)]
pub struct SetOrderSlipTool {
    current: Arc<RwLock<Option<OrderSlip>>>,
    sink: Option<Arc<dyn OrderSlipSink>>,
}

impl SetOrderSlipTool {
    pub const NAME: &'static str = "SetOrderSlipTool";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn OrderSlipSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// 当前点单（尚未设置时为 None）
    pub fn current(&self) -> Option<OrderSlip> {
        self.current.read().ok().and_then(|slip| slip.clone())
    }

    fn set(&self, slip: OrderSlip) -> Result<(), ToolError> {
        let mut current = self
            .current
            .write()
            .map_err(|_| ToolError::InvalidArgs("order slip state poisoned".to_string()))?;
        *current = Some(slip);
        Ok(())
    }
}

/// 接受 {"items": [...]} 或直接一个数组
fn slip_from_args(args: Value) -> Result<OrderSlip, ToolError> {
    let parsed = match args {
        Value::Array(_) => serde_json::from_value::<Vec<OrderLine>>(args)
            .map(|items| OrderSlip { items }),
        other => serde_json::from_value::<OrderSlip>(other),
    };
    parsed.map_err(|e| ToolError::InvalidArgs(e.to_string()))
}

impl Tool for SetOrderSlipTool {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "A tool to set order slips in a restaurant management system. Provide the complete list of ordered items; it replaces the current order slip."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::to_value(schema_for!(OrderSlip)).unwrap_or_default()
    }

    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Sync
    }

    fn run(&self, args: Value) -> Result<String, ToolError> {
        let slip = slip_from_args(args)?;
        let total: u32 = slip.items.iter().map(|i| i.quantity).sum();
        tracing::info!(lines = slip.items.len(), total, "Order slip set");
        if let Some(sink) = &self.sink {
            sink.accept(&slip);
        }
        let summary = serde_json::to_string(&slip).unwrap_or_default();
        self.set(slip)?;
        Ok(format!("Order slip updated: {}", summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolContext;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CollectingSink {
        received: Mutex<Vec<OrderSlip>>,
    }

    impl OrderSlipSink for CollectingSink {
        fn accept(&self, slip: &OrderSlip) {
            self.received.lock().unwrap().push(slip.clone());
        }
    }

    #[test]
    fn test_last_write_wins() {
        let tool = SetOrderSlipTool::new();
        assert_eq!(tool.current(), None);

        tool.run(serde_json::json!({"items": [{"id": 1, "name": "Margherita", "quantity": 2}]}))
            .unwrap();
        let first = tool.current().unwrap();
        assert_eq!(first.items.len(), 1);
        assert_eq!(first.items[0].id, "1");

        tool.run(serde_json::json!([
            {"id": "7", "name": "Tiramisu", "quantity": 1},
            {"id": "3", "name": "Espresso", "quantity": 2}
        ]))
        .unwrap();
        let second = tool.current().unwrap();
        assert_eq!(second.items.len(), 2);
        assert_eq!(second.items[0].name, "Tiramisu");
    }

    #[test]
    fn test_clones_share_current_slip() {
        let tool = SetOrderSlipTool::new();
        let handle = tool.clone();
        tool.run(serde_json::json!({"items": []})).unwrap();
        assert_eq!(handle.current(), Some(OrderSlip::default()));
    }

    #[test]
    fn test_invalid_payload_keeps_previous_slip() {
        let tool = SetOrderSlipTool::new();
        tool.run(serde_json::json!({"items": [{"id": 1, "name": "Soup", "quantity": 1}]}))
            .unwrap();
        let err = tool
            .run(serde_json::json!({"items": [{"id": 2, "name": "Bread"}]}))
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArgs(_)));
        assert_eq!(tool.current().unwrap().items[0].name, "Soup");
    }

    #[test]
    fn test_sink_receives_slip() {
        let sink = Arc::new(CollectingSink::default());
        let tool = SetOrderSlipTool::new().with_sink(sink.clone());
        tool.run(serde_json::json!({"items": [{"id": 4, "name": "Salad", "quantity": 1}]}))
            .unwrap();
        assert_eq!(sink.received.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_async_entry_fails_fast() {
        let tool = SetOrderSlipTool::new();
        let err = tool
            .execute(serde_json::json!({"items": []}), &ToolContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::AsyncUnsupported(name) if name == SetOrderSlipTool::NAME));
        assert_eq!(tool.current(), None);
    }
}
