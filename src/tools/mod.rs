pub mod context;
pub mod customer_query;
pub mod executor;
pub mod order_slip;
pub mod registry;
pub mod sql_query;

pub use context::ToolContext;
pub use customer_query::{CorrelatorConfig, CustomerQueryTool, QueryCorrelator};
pub use executor::{Dispatch, ToolExecutor, ToolResult};
pub use order_slip::{OrderLine, OrderSlip, OrderSlipSink, SetOrderSlipTool};
pub use registry::{ExecutionMode, Tool, ToolRegistry};
pub use sql_query::SqlQueryTool;
