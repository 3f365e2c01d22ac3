use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use studio_core::adapters::{AdapterCallRequest, AdapterCallResponse, AdapterSet, ApiAdapter};
use studio_core::config_store::InMemoryProviderStore;
use studio_core::model_router::ModelRouter;
use studio_core::models::{
    ApiCallSpec, ApiFormat, CoreError, CoreErrorKind, CoreResult, PluginSpec, ProviderCategory,
    ProviderConfig, TaskConfig, TaskId, TaskStatus, TaskType, WorkflowSpec, routine,
};
use studio_core::orchestration::{
    CancellationMode, ExecutionContext, PluginHost, TaskScheduler, WorkflowRunner,
};
use studio_core::polling::RetryOptions;

const WAIT: Option<Duration> = Some(Duration::from_secs(2));

fn bare_scheduler() -> TaskScheduler {
    TaskScheduler::new(ModelRouter::new(
        Arc::new(InMemoryProviderStore::default()),
        AdapterSet::default(),
    ))
}

fn sleeping_task(name: &str, sleep: Duration) -> TaskConfig {
    TaskConfig::custom(
        name,
        routine(move |_context| async move {
            tokio::time::sleep(sleep).await;
            Ok(json!({"slept": true}))
        }),
    )
}

#[tokio::test]
async fn custom_task_runs_to_completion() {
    let scheduler = bare_scheduler();
    let task_id = scheduler
        .create_task(
            TaskConfig::custom(
                "echo",
                routine(|context: ExecutionContext| async move {
                    Ok(json!({"echo": context.input}))
                }),
            )
            .with_description("echoes its input"),
        )
        .unwrap();

    let execution_id = scheduler.execute_task(task_id, Some(json!("hello"))).unwrap();
    assert!(!scheduler.get_task_status(execution_id).unwrap().is_terminal());

    let execution = scheduler.wait_for_terminal(execution_id, WAIT).await.unwrap();
    assert_eq!(execution.status, TaskStatus::Completed);
    assert_eq!(execution.task_id, task_id);
    assert_eq!(execution.progress, 100);
    assert_eq!(execution.result, Some(json!({"echo": "hello"})));
    assert!(execution.error.is_none());
    assert!(execution.started_at.is_some() && execution.finished_at.is_some());
    assert!(execution.duration.is_some());
    assert_eq!(
        scheduler.get_task_results(execution_id).unwrap(),
        json!({"echo": "hello"})
    );
}

#[tokio::test]
async fn unknown_ids_report_task_not_found() {
    let scheduler = bare_scheduler();

    let error = scheduler.execute_task(TaskId(404), None).unwrap_err();
    assert_eq!(error.code(), "TASK_NOT_FOUND");

    let task_id = scheduler
        .create_task(sleeping_task("short", Duration::from_millis(1)))
        .unwrap();
    let execution_id = scheduler.execute_task(task_id, None).unwrap();
    let bogus = studio_core::models::ExecutionId(execution_id.0 + 100);
    assert_eq!(scheduler.get_execution(bogus).unwrap_err().kind, CoreErrorKind::TaskNotFound);
    assert_eq!(scheduler.cancel_execution(bogus).unwrap_err().kind, CoreErrorKind::TaskNotFound);
}

#[tokio::test]
async fn invalid_configs_are_rejected_at_creation() {
    let scheduler = bare_scheduler();

    let error = scheduler
        .create_task(TaskConfig::new(TaskType::Custom, "no routine"))
        .unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::TaskCreate);

    let error = scheduler
        .create_task(TaskConfig::new(TaskType::ApiCall, "no model"))
        .unwrap_err();
    assert_eq!(error.code(), "TASK_CREATE_ERROR");
    assert!(scheduler.list_tasks().unwrap().is_empty());
}

#[tokio::test]
async fn failing_routine_records_the_error_message() {
    let scheduler = bare_scheduler();
    let task_id = scheduler
        .create_task(TaskConfig::custom(
            "broken",
            routine(|_context| async {
                let error = CoreError::new(CoreErrorKind::OperationFailed, "render farm offline");
                Err::<Value, _>(error)
            }),
        ))
        .unwrap();

    let execution_id = scheduler.execute_task(task_id, None).unwrap();
    let execution = scheduler.wait_for_terminal(execution_id, WAIT).await.unwrap();

    assert_eq!(execution.status, TaskStatus::Failed);
    assert_eq!(execution.error.as_deref(), Some("render farm offline"));
    assert!(execution.result.is_none());

    let error = scheduler.get_task_results(execution_id).unwrap_err();
    assert_eq!(error.message, "execution not completed");
}

#[tokio::test]
async fn panicking_routine_fails_only_its_execution() {
    let scheduler = bare_scheduler();
    let task_id = scheduler
        .create_task(TaskConfig::custom(
            "panics",
            routine(|_context| async {
                if true {
                    panic!("boom");
                }
                Ok(Value::Null)
            }),
        ))
        .unwrap();

    let execution_id = scheduler.execute_task(task_id, None).unwrap();
    let execution = scheduler.wait_for_terminal(execution_id, WAIT).await.unwrap();
    assert_eq!(execution.status, TaskStatus::Failed);
    assert_eq!(execution.error.as_deref(), Some("execution body panicked"));

    let healthy = scheduler
        .create_task(sleeping_task("after panic", Duration::from_millis(1)))
        .unwrap();
    let next = scheduler.execute_task(healthy, None).unwrap();
    assert_eq!(
        scheduler.wait_for_terminal(next, WAIT).await.unwrap().status,
        TaskStatus::Completed
    );
}

#[tokio::test]
async fn cancellation_happens_exactly_once() {
    let scheduler = bare_scheduler();
    let task_id = scheduler
        .create_task(sleeping_task("long render", Duration::from_secs(5)))
        .unwrap();
    let execution_id = scheduler.execute_task(task_id, None).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(scheduler.get_task_status(execution_id).unwrap(), TaskStatus::Running);

    scheduler.cancel_execution(execution_id).unwrap();
    assert_eq!(scheduler.get_task_status(execution_id).unwrap(), TaskStatus::Cancelled);

    let second = scheduler.cancel_execution(execution_id).unwrap_err();
    assert_eq!(second.code(), "TASK_CANCEL_ERROR");

    let execution = scheduler.wait_for_terminal(execution_id, WAIT).await.unwrap();
    assert_eq!(execution.status, TaskStatus::Cancelled);
    assert!(execution.result.is_none() && execution.error.is_none());

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(scheduler.get_task_status(execution_id).unwrap(), TaskStatus::Cancelled);
}

#[tokio::test]
async fn pending_execution_can_be_cancelled_before_it_starts() {
    let scheduler = bare_scheduler();
    let started = Arc::new(AtomicBool::new(false));
    let task_id = scheduler
        .create_task(TaskConfig::custom(
            "never starts",
            routine({
                let started = started.clone();
                move |_context| {
                    let started = started.clone();
                    async move {
                        started.store(true, Ordering::SeqCst);
                        Ok(Value::Null)
                    }
                }
            }),
        ))
        .unwrap();

    let execution_id = scheduler.execute_task(task_id, None).unwrap();
    assert_eq!(scheduler.get_task_status(execution_id).unwrap(), TaskStatus::Pending);
    scheduler.cancel_execution(execution_id).unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(scheduler.get_task_status(execution_id).unwrap(), TaskStatus::Cancelled);
    assert!(!started.load(Ordering::SeqCst));
}

#[tokio::test]
async fn completed_execution_cannot_be_cancelled() {
    let scheduler = bare_scheduler();
    let task_id = scheduler
        .create_task(sleeping_task("quick", Duration::from_millis(1)))
        .unwrap();
    let execution_id = scheduler.execute_task(task_id, None).unwrap();
    scheduler.wait_for_terminal(execution_id, WAIT).await.unwrap();

    let error = scheduler.cancel_execution(execution_id).unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::TaskCancel);
    assert_eq!(scheduler.get_task_status(execution_id).unwrap(), TaskStatus::Completed);
}

#[tokio::test]
async fn cooperative_cancellation_lets_the_body_observe_the_token() {
    let scheduler = bare_scheduler().with_cancellation_mode(CancellationMode::Cooperative);
    let observed = Arc::new(AtomicBool::new(false));
    let task_id = scheduler
        .create_task(TaskConfig::custom(
            "cooperative",
            routine({
                let observed = observed.clone();
                move |context: ExecutionContext| {
                    let observed = observed.clone();
                    async move {
                        while !context.cancellation.is_cancelled() {
                            tokio::time::sleep(Duration::from_millis(5)).await;
                        }
                        observed.store(true, Ordering::SeqCst);
                        Ok(json!("finished anyway"))
                    }
                }
            }),
        ))
        .unwrap();

    let execution_id = scheduler.execute_task(task_id, None).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    scheduler.cancel_execution(execution_id).unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(observed.load(Ordering::SeqCst));
    let execution = scheduler.get_execution(execution_id).unwrap();
    assert_eq!(execution.status, TaskStatus::Cancelled);
    assert!(execution.result.is_none());
}

#[tokio::test]
async fn progress_never_moves_backwards() {
    let scheduler = bare_scheduler();
    let task_id = scheduler
        .create_task(TaskConfig::custom(
            "progressive",
            routine(|context: ExecutionContext| async move {
                context.progress.report(30);
                context.progress.report(10);
                context.progress.report(60);
                tokio::time::sleep(Duration::from_millis(150)).await;
                Ok(Value::Null)
            }),
        ))
        .unwrap();

    let execution_id = scheduler.execute_task(task_id, None).unwrap();
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(scheduler.get_execution(execution_id).unwrap().progress, 60);

    let execution = scheduler.wait_for_terminal(execution_id, WAIT).await.unwrap();
    assert_eq!(execution.progress, 100);
}

struct RecordingRunner {
    inputs: Mutex<Vec<Value>>,
}

#[async_trait]
impl WorkflowRunner for RecordingRunner {
    async fn run_workflow(
        &self,
        workflow: &WorkflowSpec,
        context: &ExecutionContext,
    ) -> CoreResult<Value> {
        self.inputs.lock().unwrap().push(context.input.clone());
        Ok(json!({"workflow": workflow.workflow_id}))
    }
}

struct EchoPluginHost;

#[async_trait]
impl PluginHost for EchoPluginHost {
    async fn execute_action(
        &self,
        plugin: &PluginSpec,
        context: &ExecutionContext,
    ) -> CoreResult<Value> {
        Ok(json!({"plugin": plugin.plugin_id, "action": plugin.action, "input": context.input}))
    }
}

#[tokio::test]
async fn workflow_input_is_overlaid_by_execute_time_input() {
    let runner = Arc::new(RecordingRunner {
        inputs: Mutex::new(Vec::new()),
    });
    let scheduler = bare_scheduler().with_workflow_runner(runner.clone());
    let task_id = scheduler
        .create_task(TaskConfig::workflow(
            "storyboard",
            "storyboard-v2",
            json!({"style": "ink", "frames": 8}),
        ))
        .unwrap();

    let execution_id = scheduler
        .execute_task(task_id, Some(json!({"frames": 12})))
        .unwrap();
    let execution = scheduler.wait_for_terminal(execution_id, WAIT).await.unwrap();

    assert_eq!(execution.status, TaskStatus::Completed);
    assert_eq!(execution.result, Some(json!({"workflow": "storyboard-v2"})));
    assert_eq!(
        runner.inputs.lock().unwrap().as_slice(),
        [json!({"style": "ink", "frames": 12})]
    );
}

#[tokio::test]
async fn missing_collaborators_fail_with_a_description() {
    let scheduler = bare_scheduler();
    let workflow = scheduler
        .create_task(TaskConfig::workflow("wf", "upscale", Value::Null))
        .unwrap();
    let plugin = scheduler
        .create_task(TaskConfig::plugin("pl", "exporter", "export", Value::Null))
        .unwrap();

    let workflow_run = scheduler.execute_task(workflow, None).unwrap();
    let plugin_run = scheduler.execute_task(plugin, None).unwrap();

    let workflow_run = scheduler.wait_for_terminal(workflow_run, WAIT).await.unwrap();
    let plugin_run = scheduler.wait_for_terminal(plugin_run, WAIT).await.unwrap();
    assert_eq!(workflow_run.status, TaskStatus::Failed);
    assert!(workflow_run.error.unwrap().contains("no workflow runner"));
    assert_eq!(plugin_run.status, TaskStatus::Failed);
    assert!(plugin_run.error.unwrap().contains("exporter:export"));
}

#[tokio::test]
async fn plugin_tasks_delegate_to_the_host() {
    let scheduler = bare_scheduler().with_plugin_host(Arc::new(EchoPluginHost));
    let task_id = scheduler
        .create_task(TaskConfig::plugin("export", "exporter", "export", json!({"format": "mp4"})))
        .unwrap();

    let execution_id = scheduler.execute_task(task_id, None).unwrap();
    let execution = scheduler.wait_for_terminal(execution_id, WAIT).await.unwrap();
    assert_eq!(
        execution.result,
        Some(json!({"plugin": "exporter", "action": "export", "input": {"format": "mp4"}}))
    );
}

#[tokio::test]
async fn catalog_queries_and_cleanup() {
    let scheduler = bare_scheduler();
    let quick = scheduler
        .create_task(
            sleeping_task("quick", Duration::from_millis(1)).with_metadata("owner", json!("tests")),
        )
        .unwrap();
    let slow = scheduler
        .create_task(sleeping_task("slow", Duration::from_secs(5)))
        .unwrap();

    let first = scheduler.execute_task(quick, None).unwrap();
    let second = scheduler.execute_task(quick, None).unwrap();
    let running = scheduler.execute_task(slow, None).unwrap();
    scheduler.wait_for_terminal(first, WAIT).await.unwrap();
    scheduler.wait_for_terminal(second, WAIT).await.unwrap();

    let tasks = scheduler.list_tasks().unwrap();
    assert_eq!(tasks.len(), 2);
    assert_eq!(scheduler.get_task(quick).unwrap().config.metadata["owner"], "tests");

    let runs: Vec<_> = scheduler
        .list_executions(quick)
        .unwrap()
        .into_iter()
        .map(|execution| execution.id)
        .collect();
    assert_eq!(runs, [first, second]);

    assert_eq!(scheduler.get_task_status(running).unwrap(), TaskStatus::Running);
    assert_eq!(scheduler.cleanup().unwrap(), 1);
    assert!(scheduler.list_tasks().unwrap().is_empty());
    assert_eq!(scheduler.get_execution(running).unwrap_err().kind, CoreErrorKind::TaskNotFound);
}

struct FlakyAdapter {
    calls: AtomicUsize,
    failures_before_success: usize,
}

#[async_trait]
impl ApiAdapter for FlakyAdapter {
    fn supported_format(&self) -> ApiFormat {
        ApiFormat::OpenaiCompatible
    }

    async fn call_api(
        &self,
        provider: &ProviderConfig,
        request: &AdapterCallRequest,
    ) -> AdapterCallResponse {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures_before_success {
            return AdapterCallResponse::failure("HTTP 503: busy", Duration::from_millis(1));
        }
        let prompt = request.input.prompt.clone().unwrap_or_default();
        AdapterCallResponse::ok(
            json!({"content": format!("{prompt} via {}", provider.id)}),
            Duration::from_millis(7),
        )
    }
}

fn api_scheduler(failures_before_success: usize) -> (TaskScheduler, Arc<FlakyAdapter>) {
    let mut provider = ProviderConfig::new(
        "openai",
        ProviderCategory::Llm,
        "https://api.openai.test",
        ApiFormat::OpenaiCompatible,
    );
    provider.selected_models = vec!["gpt-4o".to_string()];
    let adapter = Arc::new(FlakyAdapter {
        calls: AtomicUsize::new(0),
        failures_before_success,
    });
    let adapters = AdapterSet::new([adapter.clone() as Arc<dyn ApiAdapter>]).unwrap();
    let router = ModelRouter::new(Arc::new(InMemoryProviderStore::new([provider])), adapters);
    (TaskScheduler::new(router), adapter)
}

#[tokio::test]
async fn api_call_records_adapter_duration() {
    let (scheduler, _adapter) = api_scheduler(0);
    let task_id = scheduler
        .create_task(TaskConfig::api_call(
            "chat",
            ApiCallSpec::new("gpt-4o", ProviderCategory::Llm).input(json!({"prompt": "hi"})),
        ))
        .unwrap();

    let execution_id = scheduler.execute_task(task_id, None).unwrap();
    let execution = scheduler.wait_for_terminal(execution_id, WAIT).await.unwrap();
    assert_eq!(execution.status, TaskStatus::Completed);
    assert_eq!(execution.result, Some(json!({"content": "hi via openai"})));
    assert_eq!(execution.duration, Some(Duration::from_millis(7)));
}

#[tokio::test]
async fn api_call_retries_failed_responses_when_configured() {
    let (scheduler, adapter) = api_scheduler(2);
    let task_id = scheduler
        .create_task(TaskConfig::api_call(
            "chat with retry",
            ApiCallSpec::new("gpt-4o", ProviderCategory::Llm)
                .input(json!({"prompt": "again"}))
                .retry(RetryOptions::new(3, Duration::from_millis(5))),
        ))
        .unwrap();

    let execution_id = scheduler.execute_task(task_id, None).unwrap();
    let execution = scheduler.wait_for_terminal(execution_id, WAIT).await.unwrap();
    assert_eq!(execution.status, TaskStatus::Completed);
    assert_eq!(adapter.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn api_call_without_retry_fails_on_first_error() {
    let (scheduler, adapter) = api_scheduler(1);
    let task_id = scheduler
        .create_task(TaskConfig::api_call(
            "chat once",
            ApiCallSpec::new("gpt-4o", ProviderCategory::Llm).input(json!({"prompt": "once"})),
        ))
        .unwrap();

    let execution_id = scheduler.execute_task(task_id, None).unwrap();
    let execution = scheduler.wait_for_terminal(execution_id, WAIT).await.unwrap();
    assert_eq!(execution.status, TaskStatus::Failed);
    assert_eq!(execution.error.as_deref(), Some("HTTP 503: busy"));
    assert_eq!(adapter.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn api_call_for_unknown_model_fails_descriptively() {
    let (scheduler, adapter) = api_scheduler(0);
    let task_id = scheduler
        .create_task(TaskConfig::api_call(
            "unrouted",
            ApiCallSpec::new("claude-9", ProviderCategory::Llm),
        ))
        .unwrap();

    let execution_id = scheduler.execute_task(task_id, None).unwrap();
    let execution = scheduler.wait_for_terminal(execution_id, WAIT).await.unwrap();
    assert_eq!(execution.status, TaskStatus::Failed);
    assert!(execution.error.unwrap().contains("no provider for model 'claude-9'"));
    assert_eq!(adapter.calls.load(Ordering::SeqCst), 0);
}
