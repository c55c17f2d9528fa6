//! OpenWaiterAI - 点餐对话助手
//!
//! 模块划分：
//! - **agent**: 运行时装配（模型、记录库、工具、编排器）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、交换输出项、编排器、优雅关闭
//! - **llm**: 模型端点抽象与实现（OpenAI 兼容 / Mock）
//! - **memory**: 消息模型与会话存储
//! - **observability**: 日志初始化
//! - **prompt**: 系统提示加载
//! - **store**: 外部问答表（记录库）抽象、结果提取、SQL / 内存实现
//! - **tools**: 工具注册与分发、顾客问题（查询关联器）、点单、SQL 查询

pub mod agent;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod prompt;
pub mod store;
pub mod tools;

pub use agent::{create_runtime, create_runtime_with, AgentRuntime};
pub use core::{AgentError, ExchangeInput, ExchangeItem, Orchestrator, ToolError};
