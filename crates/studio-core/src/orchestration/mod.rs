pub mod execution_queue;
pub mod scheduler;

pub use execution_queue::{
    ExecutionFuture, ExecutionOperation, ExecutionOutput, ExecutionQueue, ProgressHandle,
};
pub use scheduler::{PluginHost, TaskScheduler, WorkflowRunner};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{ExecutionId, TaskId};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CancellationMode {
    #[default]
    Immediate,
    /// Marks the execution cancelled and flips the token; the body runs on until
    /// it checks the token and its outcome is discarded.
    Cooperative,
}

#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug)]
pub struct ExecutionContext {
    pub execution_id: ExecutionId,
    pub task_id: TaskId,
    pub input: Value,
    pub cancellation: CancellationToken,
    pub progress: ProgressHandle,
}
