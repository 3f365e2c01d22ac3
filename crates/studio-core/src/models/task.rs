use std::collections::BTreeMap;
use std::fmt::{Debug, Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde_json::Value;

use crate::models::{CoreResult, ProviderCategory};
use crate::orchestration::ExecutionContext;
use crate::polling::RetryOptions;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl Display for TaskId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct ExecutionId(pub u64);

impl Display for ExecutionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "exec-{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum TaskType {
    ApiCall,
    Workflow,
    Plugin,
    Custom,
}

impl TaskType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ApiCall => "API_CALL",
            Self::Workflow => "WORKFLOW",
            Self::Plugin => "PLUGIN",
            Self::Custom => "CUSTOM",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ApiCallSpec {
    pub model: String,
    pub category: ProviderCategory,
    pub provider_id: Option<String>,
    pub input: Value,
    pub retry: Option<RetryOptions>,
}

impl ApiCallSpec {
    pub fn new(model: impl Into<String>, category: ProviderCategory) -> Self {
        Self {
            model: model.into(),
            category,
            provider_id: None,
            input: Value::Null,
            retry: None,
        }
    }

    pub fn input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }

    pub fn provider(mut self, provider_id: impl Into<String>) -> Self {
        self.provider_id = Some(provider_id.into());
        self
    }

    pub fn retry(mut self, retry: RetryOptions) -> Self {
        self.retry = Some(retry);
        self
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WorkflowSpec {
    pub workflow_id: String,
    pub params: Value,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PluginSpec {
    pub plugin_id: String,
    pub action: String,
    pub params: Value,
}

pub type RoutineFuture = Pin<Box<dyn Future<Output = CoreResult<Value>> + Send>>;

pub type CustomRoutine = Arc<dyn Fn(ExecutionContext) -> RoutineFuture + Send + Sync>;

pub fn routine<F, Fut>(f: F) -> CustomRoutine
where
    F: Fn(ExecutionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CoreResult<Value>> + Send + 'static,
{
    Arc::new(move |context| Box::pin(f(context)) as RoutineFuture)
}

/// Immutable description of work. Only the payload matching `task_type` is
/// consulted; the scheduler rejects configs whose matching payload is missing.
#[derive(Clone)]
pub struct TaskConfig {
    pub task_type: TaskType,
    pub name: String,
    pub description: Option<String>,
    pub api_call: Option<ApiCallSpec>,
    pub workflow: Option<WorkflowSpec>,
    pub plugin: Option<PluginSpec>,
    pub routine: Option<CustomRoutine>,
    pub metadata: BTreeMap<String, Value>,
}

impl TaskConfig {
    pub fn new(task_type: TaskType, name: impl Into<String>) -> Self {
        Self {
            task_type,
            name: name.into(),
            description: None,
            api_call: None,
            workflow: None,
            plugin: None,
            routine: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn api_call(name: impl Into<String>, spec: ApiCallSpec) -> Self {
        Self::new(TaskType::ApiCall, name).with_api_call(spec)
    }

    pub fn custom(name: impl Into<String>, routine: CustomRoutine) -> Self {
        Self::new(TaskType::Custom, name).with_routine(routine)
    }

    pub fn workflow(
        name: impl Into<String>,
        workflow_id: impl Into<String>,
        params: Value,
    ) -> Self {
        let mut config = Self::new(TaskType::Workflow, name);
        config.workflow = Some(WorkflowSpec {
            workflow_id: workflow_id.into(),
            params,
        });
        config
    }

    pub fn plugin(
        name: impl Into<String>,
        plugin_id: impl Into<String>,
        action: impl Into<String>,
        params: Value,
    ) -> Self {
        let mut config = Self::new(TaskType::Plugin, name);
        config.plugin = Some(PluginSpec {
            plugin_id: plugin_id.into(),
            action: action.into(),
            params,
        });
        config
    }

    pub fn with_api_call(mut self, spec: ApiCallSpec) -> Self {
        self.api_call = Some(spec);
        self
    }

    pub fn with_routine(mut self, routine: CustomRoutine) -> Self {
        self.routine = Some(routine);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

impl Debug for TaskConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskConfig")
            .field("task_type", &self.task_type)
            .field("name", &self.name)
            .field("description", &self.description)
            .field("api_call", &self.api_call)
            .field("workflow", &self.workflow)
            .field("plugin", &self.plugin)
            .field("routine", &self.routine.as_ref().map(|_| "<routine>"))
            .field("metadata", &self.metadata)
            .finish()
    }
}

#[derive(Clone, Debug)]
pub struct TaskRecord {
    pub id: TaskId,
    pub config: Arc<TaskConfig>,
    pub status: TaskStatus,
    pub created_at: SystemTime,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TaskExecution {
    pub id: ExecutionId,
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub progress: u8,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub duration: Option<Duration>,
    pub created_at: SystemTime,
    pub started_at: Option<SystemTime>,
    pub finished_at: Option<SystemTime>,
}
