//! 记录库适配层
//!
//! 外部问答表的读写契约：写入问题并返回分配的 ID，按 ID 读取答案列。
//! 答案由系统外的人或进程写入；本层只负责执行语句并返回原始结果。

pub mod memory;
pub mod raw;
pub mod sql;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::InMemoryRecordStore;
pub use raw::{coerce_scalar, CoercePath, Coerced, RawResult};
pub use sql::{SqlRecordStore, DEFAULT_TABLE};

/// 记录库错误
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid table name: {0}")]
    InvalidTable(String),

    #[error("Invalid record id: {0}")]
    InvalidId(String),

    #[error("Unsupported database url: {0}")]
    UnsupportedUrl(String),

    #[error("Store error: {0}")]
    Other(String),
}

/// 记录库接口
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// 写入一条待答问题（答案为空），返回包含新 ID 的原始结果
    async fn insert_question(&self, question: &str) -> Result<RawResult, StoreError>;

    /// 按 ID 读取答案列
    async fn select_answer(&self, id: &str) -> Result<RawResult, StoreError>;

    /// 执行任意 SQL 并返回行
    async fn run_sql(&self, sql: &str) -> Result<RawResult, StoreError>;

    /// 关闭连接池
    async fn close(&self) {}
}
