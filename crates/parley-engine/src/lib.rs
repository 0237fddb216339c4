//! Context budgeting and the agentic tool loop.

pub mod context;
pub mod error;
pub mod executor;
pub mod registry;
pub mod truncate;

pub use context::{ContextBudget, ContextConfig, ContextManager, ContextReport, TruncatedContext};
pub use error::EngineError;
pub use executor::{ExecutionOutcome, ExecutorOptions, ToolExecutor, ToolUseCallback};
pub use registry::ToolSet;
