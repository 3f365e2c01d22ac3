use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant, SystemTime};

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use crate::adapters::AdapterInput;
use crate::model_router::{ModelCall, ModelRouter};
use crate::models::{
    ApiCallSpec, CoreError, CoreErrorKind, CoreResult, CustomRoutine, ExecutionId, PluginSpec,
    TaskConfig, TaskExecution, TaskId, TaskRecord, TaskStatus, TaskType, WorkflowSpec,
};
use crate::orchestration::{
    CancellationMode, ExecutionContext, ExecutionFuture, ExecutionOperation, ExecutionOutput,
    ExecutionQueue,
};
use crate::polling::execute_with_retry;

const SERVICE: &str = "task_scheduler";

#[async_trait]
pub trait WorkflowRunner: Send + Sync {
    async fn run_workflow(
        &self,
        workflow: &WorkflowSpec,
        context: &ExecutionContext,
    ) -> CoreResult<Value>;
}

#[async_trait]
pub trait PluginHost: Send + Sync {
    async fn execute_action(
        &self,
        plugin: &PluginSpec,
        context: &ExecutionContext,
    ) -> CoreResult<Value>;
}

#[derive(Default)]
struct TaskCatalog {
    next_task_id: u64,
    tasks: BTreeMap<TaskId, TaskRecord>,
}

#[derive(Clone)]
pub struct TaskScheduler {
    catalog: Arc<Mutex<TaskCatalog>>,
    queue: ExecutionQueue,
    model_router: ModelRouter,
    workflow_runner: Option<Arc<dyn WorkflowRunner>>,
    plugin_host: Option<Arc<dyn PluginHost>>,
    cancellation_mode: CancellationMode,
}

impl TaskScheduler {
    pub fn new(model_router: ModelRouter) -> Self {
        Self {
            catalog: Arc::new(Mutex::new(TaskCatalog::default())),
            queue: ExecutionQueue::new(),
            model_router,
            workflow_runner: None,
            plugin_host: None,
            cancellation_mode: CancellationMode::default(),
        }
    }

    pub fn with_workflow_runner(mut self, runner: Arc<dyn WorkflowRunner>) -> Self {
        self.workflow_runner = Some(runner);
        self
    }

    pub fn with_plugin_host(mut self, host: Arc<dyn PluginHost>) -> Self {
        self.plugin_host = Some(host);
        self
    }

    pub fn with_cancellation_mode(mut self, mode: CancellationMode) -> Self {
        self.cancellation_mode = mode;
        self
    }

    pub fn create_task(&self, config: TaskConfig) -> CoreResult<TaskId> {
        validate_task_config(&config)?;

        let mut catalog = self.catalog()?;
        let task_id = TaskId(catalog.next_task_id);
        catalog.next_task_id = catalog.next_task_id.saturating_add(1);

        info!(
            component = SERVICE,
            task_id = task_id.0,
            task_type = config.task_type.as_str(),
            name = %config.name,
            "task created"
        );
        catalog.tasks.insert(
            task_id,
            TaskRecord {
                id: task_id,
                config: Arc::new(config),
                status: TaskStatus::Pending,
                created_at: SystemTime::now(),
            },
        );
        Ok(task_id)
    }

    /// Schedules one run of `task_id` and returns its id without waiting for it.
    pub fn execute_task(&self, task_id: TaskId, input: Option<Value>) -> CoreResult<ExecutionId> {
        let config = self.get_task(task_id)?.config;
        let base_input = match config.task_type {
            TaskType::ApiCall => config.api_call.as_ref().map(|spec| spec.input.clone()),
            TaskType::Workflow => config.workflow.as_ref().map(|spec| spec.params.clone()),
            TaskType::Plugin => config.plugin.as_ref().map(|spec| spec.params.clone()),
            TaskType::Custom => None,
        }
        .unwrap_or(Value::Null);
        let input = overlay_input(base_input, input);

        let operation = self.operation_for(&config)?;
        let execution_id = self.queue.spawn(task_id, input, operation)?;
        info!(
            component = SERVICE,
            task_id = task_id.0,
            execution_id = execution_id.0,
            task_type = config.task_type.as_str(),
            "execution scheduled"
        );
        Ok(execution_id)
    }

    pub fn cancel_execution(&self, execution_id: ExecutionId) -> CoreResult<()> {
        self.queue.cancel(execution_id, self.cancellation_mode)
    }

    pub fn get_task_status(&self, execution_id: ExecutionId) -> CoreResult<TaskStatus> {
        self.queue.status(execution_id)
    }

    pub fn get_execution(&self, execution_id: ExecutionId) -> CoreResult<TaskExecution> {
        self.queue.snapshot(execution_id)
    }

    pub fn get_task_results(&self, execution_id: ExecutionId) -> CoreResult<Value> {
        let execution = self.queue.snapshot(execution_id)?;
        if execution.status != TaskStatus::Completed {
            return Err(CoreError::new(CoreErrorKind::TaskExecution, "execution not completed")
                .in_service(SERVICE, "get_task_results")
                .with_context("execution_id", execution_id)
                .with_context("status", format!("{:?}", execution.status)));
        }
        Ok(execution.result.unwrap_or_default())
    }

    pub fn list_tasks(&self) -> CoreResult<Vec<TaskRecord>> {
        Ok(self.catalog()?.tasks.values().cloned().collect())
    }

    pub fn get_task(&self, task_id: TaskId) -> CoreResult<TaskRecord> {
        self.catalog()?.tasks.get(&task_id).cloned().ok_or_else(|| {
            CoreError::new(CoreErrorKind::TaskNotFound, format!("unknown task id '{task_id}'"))
                .in_service(SERVICE, "get_task")
                .with_context("task_id", task_id)
        })
    }

    pub fn list_executions(&self, task_id: TaskId) -> CoreResult<Vec<TaskExecution>> {
        self.get_task(task_id)?;
        self.queue.list_for_task(task_id)
    }

    pub async fn wait_for_terminal(
        &self,
        execution_id: ExecutionId,
        timeout: Option<Duration>,
    ) -> CoreResult<TaskExecution> {
        self.queue.wait_for_terminal(execution_id, timeout).await
    }

    pub fn cleanup(&self) -> CoreResult<usize> {
        let cancelled = self.queue.cancel_all(self.cancellation_mode)?;
        self.queue.clear()?;
        let mut catalog = self.catalog()?;
        let forgotten = catalog.tasks.len();
        catalog.tasks.clear();
        info!(component = SERVICE, cancelled, forgotten, "scheduler cleaned up");
        Ok(cancelled)
    }

    fn operation_for(&self, config: &TaskConfig) -> CoreResult<ExecutionOperation> {
        let missing = || {
            CoreError::new(
                CoreErrorKind::TaskExecution,
                format!("task '{}' has no {} payload", config.name, config.task_type.as_str()),
            )
            .in_service(SERVICE, "execute_task")
        };

        let operation: ExecutionOperation = match config.task_type {
            TaskType::ApiCall => {
                let spec = config.api_call.clone().ok_or_else(missing)?;
                let router = self.model_router.clone();
                Box::new(move |context: ExecutionContext| -> ExecutionFuture {
                    Box::pin(run_api_call(router, spec, context))
                })
            }
            TaskType::Workflow => {
                let spec = config.workflow.clone().ok_or_else(missing)?;
                let runner = self.workflow_runner.clone();
                Box::new(move |context: ExecutionContext| -> ExecutionFuture {
                    Box::pin(timed(async move {
                        let runner = runner.ok_or_else(|| {
                            collaborator_missing("workflow runner", &spec.workflow_id)
                        })?;
                        runner.run_workflow(&spec, &context).await
                    }))
                })
            }
            TaskType::Plugin => {
                let spec = config.plugin.clone().ok_or_else(missing)?;
                let host = self.plugin_host.clone();
                Box::new(move |context: ExecutionContext| -> ExecutionFuture {
                    Box::pin(timed(async move {
                        let host = host.ok_or_else(|| {
                            let target = format!("{}:{}", spec.plugin_id, spec.action);
                            collaborator_missing("plugin host", &target)
                        })?;
                        host.execute_action(&spec, &context).await
                    }))
                })
            }
            TaskType::Custom => {
                let routine: CustomRoutine = config.routine.clone().ok_or_else(missing)?;
                Box::new(move |context: ExecutionContext| -> ExecutionFuture {
                    Box::pin(timed(routine(context)))
                })
            }
        };
        Ok(operation)
    }

    fn catalog(&self) -> CoreResult<MutexGuard<'_, TaskCatalog>> {
        self.catalog
            .lock()
            .map_err(|_| CoreError::poisoned("task catalog").in_service(SERVICE, "lock"))
    }
}

async fn run_api_call(
    router: ModelRouter,
    spec: ApiCallSpec,
    context: ExecutionContext,
) -> CoreResult<ExecutionOutput> {
    let input = AdapterInput::from_value(&context.input)?;
    let mut call = ModelCall::new(spec.model.clone(), spec.category, input);
    if let Some(provider_id) = &spec.provider_id {
        call = call.on_provider(provider_id.clone());
    }

    let router = &router;
    let call = &call;
    let attempt = move || async move { router.call_model(call.clone()).await?.into_result() };
    let response = match &spec.retry {
        Some(retry) => execute_with_retry(attempt, retry).await?,
        None => attempt().await?,
    };

    Ok(ExecutionOutput {
        value: response.data.unwrap_or_default(),
        duration: response.duration,
    })
}

async fn timed(body: impl Future<Output = CoreResult<Value>>) -> CoreResult<ExecutionOutput> {
    let started = Instant::now();
    let value = body.await?;
    Ok(ExecutionOutput {
        value,
        duration: Some(started.elapsed()),
    })
}

fn collaborator_missing(collaborator: &str, target: &str) -> CoreError {
    CoreError::new(
        CoreErrorKind::TaskExecution,
        format!("no {collaborator} is installed; cannot run '{target}'"),
    )
    .in_service(SERVICE, "execute_task")
}

/// Execute-time keys override the task's own input when both are objects;
/// otherwise a supplied execute-time input replaces it.
pub fn overlay_input(base: Value, input: Option<Value>) -> Value {
    match (base, input) {
        (Value::Object(mut base), Some(Value::Object(overlay))) => {
            base.extend(overlay);
            Value::Object(base)
        }
        (_, Some(input)) => input,
        (base, None) => base,
    }
}

fn validate_task_config(config: &TaskConfig) -> CoreResult<()> {
    let invalid = |message: &str| -> CoreResult<()> {
        Err(CoreError::new(CoreErrorKind::TaskCreate, message.to_string())
            .in_service(SERVICE, "create_task")
            .with_context("task_type", config.task_type.as_str()))
    };

    if config.name.trim().is_empty() {
        return invalid("task name is required");
    }
    match config.task_type {
        TaskType::ApiCall => match &config.api_call {
            Some(spec) if !spec.model.trim().is_empty() => Ok(()),
            _ => invalid("API_CALL tasks require a model reference"),
        },
        TaskType::Workflow => match &config.workflow {
            Some(spec) if !spec.workflow_id.trim().is_empty() => Ok(()),
            _ => invalid("WORKFLOW tasks require a workflow id"),
        },
        TaskType::Plugin => match &config.plugin {
            Some(spec) if !spec.plugin_id.trim().is_empty() && !spec.action.trim().is_empty() => {
                Ok(())
            }
            _ => invalid("PLUGIN tasks require a plugin id and an action"),
        },
        TaskType::Custom => match &config.routine {
            Some(_) => Ok(()),
            None => invalid("CUSTOM tasks require a routine"),
        },
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{overlay_input, validate_task_config};
    use crate::models::{ApiCallSpec, ProviderCategory, TaskConfig, TaskType};

    #[test]
    fn execute_time_keys_overlay_task_input() {
        let merged = overlay_input(
            json!({"prompt": "base", "aspectRatio": "16:9"}),
            Some(json!({"prompt": "override"})),
        );
        assert_eq!(merged, json!({"prompt": "override", "aspectRatio": "16:9"}));
    }

    #[test]
    fn non_object_input_replaces_or_defers() {
        assert_eq!(overlay_input(json!({"a": 1}), Some(json!("text"))), json!("text"));
        assert_eq!(overlay_input(json!({"a": 1}), None), json!({"a": 1}));
        assert_eq!(overlay_input(json!(null), Some(json!({"b": 2}))), json!({"b": 2}));
    }

    #[test]
    fn missing_payloads_fail_validation() {
        let cases = [
            TaskConfig::new(TaskType::ApiCall, "no payload"),
            TaskConfig::api_call("blank model", ApiCallSpec::new(" ", ProviderCategory::Llm)),
            TaskConfig::new(TaskType::Custom, "no routine"),
            TaskConfig::workflow("blank workflow", "", json!({})),
            TaskConfig::plugin("no action", "exporter", "", json!({})),
        ];
        for config in cases {
            let error = validate_task_config(&config).unwrap_err();
            assert_eq!(error.code(), "TASK_CREATE_ERROR", "{}", config.name);
        }
        let valid = TaskConfig::api_call("ok", ApiCallSpec::new("gpt-4o", ProviderCategory::Llm));
        assert!(validate_task_config(&valid).is_ok());
    }
}
