use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, SystemTime};

use futures::FutureExt;
use serde_json::Value;
use tokio::sync::Notify;
use tokio::task::AbortHandle;

use crate::models::{
    CoreError, CoreErrorKind, CoreResult, ExecutionId, TaskExecution, TaskId, TaskStatus,
};
use crate::orchestration::{CancellationMode, CancellationToken, ExecutionContext};

const SERVICE: &str = "execution_queue";

pub type ExecutionFuture = Pin<Box<dyn Future<Output = CoreResult<ExecutionOutput>> + Send>>;

pub type ExecutionOperation = Box<dyn FnOnce(ExecutionContext) -> ExecutionFuture + Send>;

#[derive(Clone, Debug, PartialEq)]
pub struct ExecutionOutput {
    pub value: Value,
    pub duration: Option<Duration>,
}

impl ExecutionOutput {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            duration: None,
        }
    }
}

#[derive(Clone, Default)]
pub struct ExecutionQueue {
    inner: Arc<Mutex<QueueState>>,
}

#[derive(Default)]
struct QueueState {
    next_execution_id: u64,
    executions: HashMap<ExecutionId, TaskExecution>,
    cancellation_tokens: HashMap<ExecutionId, CancellationToken>,
    abort_handles: HashMap<ExecutionId, AbortHandle>,
    completion_notifiers: HashMap<ExecutionId, Arc<Notify>>,
}

impl ExecutionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn(
        &self,
        task_id: TaskId,
        input: Value,
        operation: ExecutionOperation,
    ) -> CoreResult<ExecutionId> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|error| {
            CoreError::new(
                CoreErrorKind::Internal,
                format!("executions must be spawned inside a tokio runtime: {error}"),
            )
            .in_service(SERVICE, "spawn")
        })?;

        let (execution_id, token, notify) = {
            let mut state = lock_state(&self.inner)?;
            let execution_id = ExecutionId(state.next_execution_id);
            state.next_execution_id = state.next_execution_id.saturating_add(1);

            state.executions.insert(
                execution_id,
                TaskExecution {
                    id: execution_id,
                    task_id,
                    status: TaskStatus::Pending,
                    progress: 0,
                    result: None,
                    error: None,
                    duration: None,
                    created_at: SystemTime::now(),
                    started_at: None,
                    finished_at: None,
                },
            );

            let token = CancellationToken::new();
            let notify = Arc::new(Notify::new());
            state
                .cancellation_tokens
                .insert(execution_id, token.clone());
            state
                .completion_notifiers
                .insert(execution_id, notify.clone());
            (execution_id, token, notify)
        };

        let context = ExecutionContext {
            execution_id,
            task_id,
            input,
            cancellation: token.clone(),
            progress: ProgressHandle::attached(execution_id, &self.inner),
        };

        let inner = self.inner.clone();
        let join_handle = runtime.spawn(async move {
            if !set_running_if_possible(&inner, execution_id) {
                finalize_cleanup(&inner, execution_id, &notify);
                return;
            }

            if token.is_cancelled() {
                settle(&inner, execution_id, TaskStatus::Cancelled, None, None, None);
                finalize_cleanup(&inner, execution_id, &notify);
                return;
            }

            let outcome = AssertUnwindSafe(operation(context)).catch_unwind().await;
            match outcome {
                Ok(Ok(output)) if !token.is_cancelled() => {
                    settle(
                        &inner,
                        execution_id,
                        TaskStatus::Completed,
                        Some(output.value),
                        None,
                        output.duration,
                    );
                }
                Ok(Ok(_)) => {
                    settle(&inner, execution_id, TaskStatus::Cancelled, None, None, None);
                }
                Ok(Err(error)) => {
                    if token.is_cancelled() || error.kind == CoreErrorKind::Cancelled {
                        settle(&inner, execution_id, TaskStatus::Cancelled, None, None, None);
                    } else {
                        tracing::warn!(
                            component = SERVICE,
                            execution_id = execution_id.0,
                            task_id = task_id.0,
                            code = error.code(),
                            error = %error.message,
                            "execution failed"
                        );
                        settle(
                            &inner,
                            execution_id,
                            TaskStatus::Failed,
                            None,
                            Some(error.message),
                            None,
                        );
                    }
                }
                Err(_) => {
                    tracing::error!(
                        component = SERVICE,
                        execution_id = execution_id.0,
                        task_id = task_id.0,
                        "execution body panicked"
                    );
                    settle(
                        &inner,
                        execution_id,
                        TaskStatus::Failed,
                        None,
                        Some("execution body panicked".to_string()),
                        None,
                    );
                }
            }

            finalize_cleanup(&inner, execution_id, &notify);
        });

        let mut state = lock_state(&self.inner)?;
        let live = state
            .executions
            .get(&execution_id)
            .is_some_and(|execution| !execution.status.is_terminal());
        if live {
            state
                .abort_handles
                .insert(execution_id, join_handle.abort_handle());
        }

        Ok(execution_id)
    }

    pub fn snapshot(&self, execution_id: ExecutionId) -> CoreResult<TaskExecution> {
        let state = lock_state(&self.inner)?;
        state
            .executions
            .get(&execution_id)
            .cloned()
            .ok_or_else(|| execution_lookup_error(execution_id))
    }

    pub fn status(&self, execution_id: ExecutionId) -> CoreResult<TaskStatus> {
        Ok(self.snapshot(execution_id)?.status)
    }

    pub fn list_for_task(&self, task_id: TaskId) -> CoreResult<Vec<TaskExecution>> {
        let state = lock_state(&self.inner)?;
        let mut executions = state
            .executions
            .values()
            .filter(|execution| execution.task_id == task_id)
            .cloned()
            .collect::<Vec<_>>();
        executions.sort_by_key(|execution| execution.id);
        Ok(executions)
    }

    /// Moves a live execution to cancelled. A second cancel, or a cancel after any
    /// other terminal state, is rejected.
    pub fn cancel(&self, execution_id: ExecutionId, mode: CancellationMode) -> CoreResult<()> {
        let (abort_handle, notify) = {
            let mut state = lock_state(&self.inner)?;
            let execution = state
                .executions
                .get_mut(&execution_id)
                .ok_or_else(|| execution_lookup_error(execution_id))?;

            if execution.status.is_terminal() {
                return Err(CoreError::new(
                    CoreErrorKind::TaskCancel,
                    format!(
                        "execution '{execution_id}' is already {:?} and cannot be cancelled",
                        execution.status
                    ),
                )
                .in_service(SERVICE, "cancel")
                .with_context("execution_id", execution_id));
            }

            execution.status = TaskStatus::Cancelled;
            execution.finished_at = Some(SystemTime::now());

            if let Some(token) = state.cancellation_tokens.remove(&execution_id) {
                token.cancel();
            }
            let abort_handle = state.abort_handles.remove(&execution_id);
            let notify = state.completion_notifiers.get(&execution_id).cloned();
            (abort_handle, notify)
        };

        if mode == CancellationMode::Immediate
            && let Some(handle) = abort_handle
        {
            handle.abort();
        }

        if let Some(notify) = notify {
            notify.notify_waiters();
        }

        tracing::info!(
            component = SERVICE,
            execution_id = execution_id.0,
            mode = ?mode,
            "execution cancelled"
        );
        Ok(())
    }

    pub fn cancel_all(&self, mode: CancellationMode) -> CoreResult<usize> {
        let live = {
            let state = lock_state(&self.inner)?;
            state
                .executions
                .values()
                .filter(|execution| !execution.status.is_terminal())
                .map(|execution| execution.id)
                .collect::<Vec<_>>()
        };

        let mut cancelled = 0;
        for execution_id in live {
            // A body may settle between the scan and the cancel.
            if self.cancel(execution_id, mode).is_ok() {
                cancelled += 1;
            }
        }
        Ok(cancelled)
    }

    pub fn clear(&self) -> CoreResult<()> {
        let mut state = lock_state(&self.inner)?;
        for (_, handle) in state.abort_handles.drain() {
            handle.abort();
        }
        for (_, notify) in state.completion_notifiers.drain() {
            notify.notify_waiters();
        }
        state.cancellation_tokens.clear();
        state.executions.clear();
        Ok(())
    }

    pub async fn wait_for_terminal(
        &self,
        execution_id: ExecutionId,
        timeout_duration: Option<Duration>,
    ) -> CoreResult<TaskExecution> {
        match timeout_duration {
            Some(duration) => tokio::time::timeout(duration, self.wait_until_terminal(execution_id))
                .await
                .map_err(|_| {
                    CoreError::new(
                        CoreErrorKind::Timeout,
                        format!(
                            "timed out after {}ms waiting for execution '{execution_id}'",
                            duration.as_millis()
                        ),
                    )
                    .in_service(SERVICE, "wait_for_terminal")
                })?,
            None => self.wait_until_terminal(execution_id).await,
        }
    }

    async fn wait_until_terminal(&self, execution_id: ExecutionId) -> CoreResult<TaskExecution> {
        loop {
            let notify = {
                let state = lock_state(&self.inner)?;
                let execution = state
                    .executions
                    .get(&execution_id)
                    .ok_or_else(|| execution_lookup_error(execution_id))?;
                if execution.status.is_terminal() {
                    return Ok(execution.clone());
                }
                state
                    .completion_notifiers
                    .get(&execution_id)
                    .cloned()
                    .ok_or_else(|| execution_lookup_error(execution_id))?
            };

            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.status(execution_id)?.is_terminal() {
                continue;
            }
            notified.await;
        }
    }
}

/// Best-effort progress reporting for one execution. Values are clamped to
/// 0-100, never move backwards, and only land while the execution is running.
#[derive(Clone)]
pub struct ProgressHandle {
    execution_id: Option<ExecutionId>,
    state: Weak<Mutex<QueueState>>,
}

impl ProgressHandle {
    fn attached(execution_id: ExecutionId, state: &Arc<Mutex<QueueState>>) -> Self {
        Self {
            execution_id: Some(execution_id),
            state: Arc::downgrade(state),
        }
    }

    pub fn detached() -> Self {
        Self {
            execution_id: None,
            state: Weak::new(),
        }
    }

    pub fn report(&self, progress: u8) {
        let (Some(execution_id), Some(state)) = (self.execution_id, self.state.upgrade()) else {
            return;
        };
        let Ok(mut state) = state.lock() else {
            return;
        };
        if let Some(execution) = state.executions.get_mut(&execution_id)
            && execution.status == TaskStatus::Running
        {
            execution.progress = execution.progress.max(progress.min(100));
        }
    }
}

impl Debug for ProgressHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressHandle")
            .field("execution_id", &self.execution_id)
            .finish()
    }
}

fn set_running_if_possible(inner: &Arc<Mutex<QueueState>>, execution_id: ExecutionId) -> bool {
    let Ok(mut state) = inner.lock() else {
        return false;
    };
    let Some(execution) = state.executions.get_mut(&execution_id) else {
        return false;
    };
    if execution.status != TaskStatus::Pending {
        return false;
    }
    execution.status = TaskStatus::Running;
    execution.started_at = Some(SystemTime::now());
    true
}

fn settle(
    inner: &Arc<Mutex<QueueState>>,
    execution_id: ExecutionId,
    status: TaskStatus,
    result: Option<Value>,
    error: Option<String>,
    duration: Option<Duration>,
) {
    let Ok(mut state) = inner.lock() else {
        return;
    };
    let Some(execution) = state.executions.get_mut(&execution_id) else {
        return;
    };
    if execution.status.is_terminal() {
        return;
    }
    execution.status = status;
    execution.finished_at = Some(SystemTime::now());
    execution.duration = duration;
    if status == TaskStatus::Completed {
        execution.progress = 100;
        execution.result = result;
    }
    execution.error = error;
}

fn finalize_cleanup(
    inner: &Arc<Mutex<QueueState>>,
    execution_id: ExecutionId,
    notify: &Arc<Notify>,
) {
    if let Ok(mut state) = inner.lock() {
        state.abort_handles.remove(&execution_id);
        state.cancellation_tokens.remove(&execution_id);
    }
    notify.notify_waiters();
}

fn lock_state(inner: &Arc<Mutex<QueueState>>) -> CoreResult<MutexGuard<'_, QueueState>> {
    inner
        .lock()
        .map_err(|_| CoreError::poisoned("execution queue").in_service(SERVICE, "lock"))
}

fn execution_lookup_error(execution_id: ExecutionId) -> CoreError {
    CoreError::new(
        CoreErrorKind::TaskNotFound,
        format!("unknown execution id '{execution_id}'"),
    )
    .in_service(SERVICE, "lookup")
    .with_context("execution_id", execution_id)
}
