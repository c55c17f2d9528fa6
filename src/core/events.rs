//! 交换输出项
//!
//! 一次交换按时间顺序产出 ai 消息与工具结果；模型请求了未注册工具时产出 UnknownTool，
//! 调用方可以据此提示或记录，而不是静默丢弃。

use serde::Serialize;

use crate::memory::Message;
use crate::tools::ToolResult;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExchangeItem {
    /// 模型回复（可能带 tool calls）
    Ai { message: Message },
    /// 已注册工具的执行结果（失败时 is_error = true）
    ToolResult { result: ToolResult },
    /// 未注册的工具名，未执行、不回传给模型
    UnknownTool { call_id: String, name: String },
}

impl ExchangeItem {
    pub fn as_ai(&self) -> Option<&Message> {
        match self {
            ExchangeItem::Ai { message } => Some(message),
            _ => None,
        }
    }

    pub fn as_tool_result(&self) -> Option<&ToolResult> {
        match self {
            ExchangeItem::ToolResult { result } => Some(result),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialized_tag() {
        let item = ExchangeItem::UnknownTool {
            call_id: "call_9".into(),
            name: "DanceTool".into(),
        };
        let v = serde_json::to_value(&item).unwrap();
        assert_eq!(v["type"], "unknown_tool");
        assert_eq!(v["name"], "DanceTool");
        assert!(item.as_ai().is_none());
    }
}
