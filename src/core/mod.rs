//! 核心编排层：错误类型、交换输出项、编排器、优雅关闭

pub mod error;
pub mod events;
pub mod orchestrator;
pub mod shutdown;

pub use error::{AgentError, ToolError};
pub use events::ExchangeItem;
pub use orchestrator::{ExchangeInput, Orchestrator, OrchestratorConfig};
pub use shutdown::{
    run_with_graceful_shutdown, RecordStoreCleanup, SessionTableCleanup, ShutdownCleanup,
    ShutdownCoordinator, ShutdownManager, ShutdownReason,
};
