//! 记录库原始结果与标量提取
//!
//! 记录库返回的结果可能是结构化行、单个标量，或一段文本形式的行结果（如 `[(42,)]`、`[[42]]`）。
//! coerce_scalar 是唯一的提取入口，按顺序尝试：结构化行 -> 标量 -> 文本解析 -> 原文。

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

/// 记录库返回的原始结果
#[derive(Clone, Debug, PartialEq)]
pub enum RawResult {
    /// 有序行，每行有序列；None 表示 NULL
    Rows(Vec<Vec<Option<String>>>),
    Scalar(Option<String>),
    /// 文本形式的结果，需要解析
    Text(String),
}

impl RawResult {
    /// 渲染为 JSON 数组文本（用于把行结果交给模型）
    pub fn render(&self) -> String {
        match self {
            RawResult::Rows(rows) => serde_json::to_string(rows).unwrap_or_else(|_| "[]".to_string()),
            RawResult::Scalar(Some(v)) => v.clone(),
            RawResult::Scalar(None) => String::new(),
            RawResult::Text(t) => t.clone(),
        }
    }
}

/// 标量是经由哪条规则得到的
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CoercePath {
    Row,
    Scalar,
    ParsedText,
    /// 无法解析，原文作为值
    Literal,
}

/// 提取结果：value 为 None 表示「不存在」（无行或 NULL 列）
#[derive(Clone, Debug, PartialEq)]
pub struct Coerced {
    pub value: Option<String>,
    pub path: CoercePath,
}

impl Coerced {
    fn new(value: Option<String>, path: CoercePath) -> Self {
        Self {
            value: value.map(|v| v.trim().to_string()),
            path,
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.path == CoercePath::Literal
    }
}

/// 取第一行第一列；空行集或 NULL 视为不存在
pub fn coerce_scalar(raw: &RawResult) -> Coerced {
    match raw {
        RawResult::Rows(rows) => {
            let first = rows.first().and_then(|row| row.first()).cloned().flatten();
            Coerced::new(first, CoercePath::Row)
        }
        RawResult::Scalar(v) => Coerced::new(v.clone(), CoercePath::Scalar),
        RawResult::Text(text) => coerce_text(text),
    }
}

fn coerce_text(text: &str) -> Coerced {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Coerced::new(None, CoercePath::ParsedText);
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Coerced::new(first_json_cell(&value), CoercePath::ParsedText);
    }

    if let Some(first) = tuple_literal_first(trimmed) {
        return Coerced::new(first, CoercePath::ParsedText);
    }

    tracing::warn!(raw = %trimmed, "Unparseable store result, using raw text verbatim");
    Coerced::new(Some(trimmed.to_string()), CoercePath::Literal)
}

/// `[[1, "a"]]` / `[1]` / `1` -> 第一个单元格
fn first_json_cell(value: &Value) -> Option<String> {
    match value {
        Value::Array(items) => items.first().and_then(first_json_cell),
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn tuple_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^\[\s*\(\s*('(?:[^'\\]|\\.)*'|"(?:[^"\\]|\\.)*"|[^,)]*?)\s*(?:,|\))"#)
            .expect("static regex")
    })
}

/// 解析 `[(42,)]`、`[('Yes',)]`、`[(None,)]` 形式的行文本，返回第一个单元格
///
/// 外层 None 表示文本不是这种形式；内层 None 表示单元格为 None。
fn tuple_literal_first(text: &str) -> Option<Option<String>> {
    if text == "[]" {
        return Some(None);
    }
    let caps = tuple_regex().captures(text)?;
    let cell = caps.get(1)?.as_str().trim();
    if cell.is_empty() || cell == "None" {
        return Some(None);
    }
    let quoted = (cell.starts_with('\'') && cell.ends_with('\''))
        || (cell.starts_with('"') && cell.ends_with('"'));
    if quoted && cell.len() >= 2 {
        let inner = &cell[1..cell.len() - 1];
        return Some(Some(inner.replace("\\'", "'").replace("\\\"", "\"")));
    }
    Some(Some(cell.to_string()))
}
