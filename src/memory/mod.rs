//! 记忆层：消息模型与会话存储

pub mod message;
pub mod session;

pub use message::{Message, Role, ToolCallRequest};
pub use session::{Session, SessionId, SessionManager};
