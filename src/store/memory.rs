//! 内存记录库（测试 / 本地演示）

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::store::{RawResult, RecordStore, StoreError};

/// 单条问答记录
#[derive(Clone, Debug)]
pub struct QueryRecord {
    pub id: u64,
    pub question_text: String,
    pub answer_text: Option<String>,
}

/// 内存问答表：ID 自增；answer 模拟外部应答方写入答案
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    records: RwLock<Vec<QueryRecord>>,
    next_id: AtomicU64,
    select_calls: AtomicU64,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 外部应答：为指定 ID 写入答案，ID 不存在时返回 false
    pub async fn answer(&self, id: u64, text: impl Into<String>) -> bool {
        let mut records = self.records.write().await;
        match records.iter_mut().find(|r| r.id == id) {
            Some(record) => {
                record.answer_text = Some(text.into());
                true
            }
            None => false,
        }
    }

    pub async fn records(&self) -> Vec<QueryRecord> {
        self.records.read().await.clone()
    }

    /// select_answer 被调用的次数（轮询次数）
    pub fn select_calls(&self) -> u64 {
        self.select_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn insert_question(&self, question: &str) -> Result<RawResult, StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.records.write().await.push(QueryRecord {
            id,
            question_text: question.to_string(),
            answer_text: None,
        });
        Ok(RawResult::Rows(vec![vec![Some(id.to_string())]]))
    }

    async fn select_answer(&self, id: &str) -> Result<RawResult, StoreError> {
        self.select_calls.fetch_add(1, Ordering::Relaxed);
        let id: u64 = id
            .trim()
            .parse()
            .map_err(|_| StoreError::InvalidId(id.to_string()))?;
        let records = self.records.read().await;
        let rows = records
            .iter()
            .filter(|r| r.id == id)
            .map(|r| vec![r.answer_text.clone()])
            .collect();
        Ok(RawResult::Rows(rows))
    }

    async fn run_sql(&self, _sql: &str) -> Result<RawResult, StoreError> {
        Err(StoreError::Other("in-memory store does not execute SQL".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ids_are_monotonic() {
        let store = InMemoryRecordStore::new();
        let a = store.insert_question("a").await.unwrap();
        let b = store.insert_question("b").await.unwrap();
        assert_eq!(a, RawResult::Rows(vec![vec![Some("1".into())]]));
        assert_eq!(b, RawResult::Rows(vec![vec![Some("2".into())]]));
    }

    #[tokio::test]
    async fn test_unanswered_then_answered() {
        let store = InMemoryRecordStore::new();
        store.insert_question("menu?").await.unwrap();
        assert_eq!(
            store.select_answer("1").await.unwrap(),
            RawResult::Rows(vec![vec![None]])
        );
        assert!(store.answer(1, "pizza").await);
        assert_eq!(
            store.select_answer("1").await.unwrap(),
            RawResult::Rows(vec![vec![Some("pizza".into())]])
        );
        assert!(!store.answer(9, "x").await);
    }
}
