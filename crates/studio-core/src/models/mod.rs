pub mod error;
pub mod provider;
pub mod task;

pub use error::{CoreError, CoreErrorKind, CoreResult};
pub use provider::{ApiFormat, AuthScheme, ProviderCategory, ProviderConfig, ProviderHealth};
pub use task::{
    ApiCallSpec, CustomRoutine, ExecutionId, PluginSpec, RoutineFuture, TaskConfig, TaskExecution,
    TaskId, TaskRecord, TaskStatus, TaskType, WorkflowSpec, routine,
};
