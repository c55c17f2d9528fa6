//! LLM 层：模型端点抽象与实现（OpenAI 兼容 / Mock）

pub mod mock;
pub mod openai;
pub mod traits;

pub use mock::{MockLlmClient, RecordedCall};
pub use openai::{OpenAiClient, OpenAiSettings};
pub use traits::{LlmClient, LlmError, RetryConfig, RetryingLlmClient, ToolDescriptor};
