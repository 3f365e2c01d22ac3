use std::future::Future;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::models::{CoreError, CoreErrorKind, CoreResult};
use crate::orchestration::{CancellationToken, ProgressHandle};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10_000);
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(600_000);
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1_000);

const SERVICE: &str = "polling";

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum JobStatus {
    Queued,
    Processing,
    Succeed,
    Failed,
}

// Checked in order against the upper-cased backend label. Negated forms come first.
const STATUS_MARKERS: &[(&str, JobStatus)] = &[
    ("UNSUCC", JobStatus::Failed),
    ("INCOMPLETE", JobStatus::Queued),
    ("FAIL", JobStatus::Failed),
    ("ERROR", JobStatus::Failed),
    ("SUCCEED", JobStatus::Succeed),
    ("SUCCESS", JobStatus::Succeed),
    ("COMPLETED", JobStatus::Succeed),
    ("PROCESSING", JobStatus::Processing),
    ("RUNNING", JobStatus::Processing),
    ("PROGRESS", JobStatus::Processing),
];

impl JobStatus {
    pub fn from_backend_label(label: &str) -> Self {
        let upper = label.trim().to_ascii_uppercase();
        STATUS_MARKERS
            .iter()
            .find(|(marker, _)| upper.contains(marker))
            .map(|(_, status)| *status)
            .unwrap_or(JobStatus::Queued)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeed | Self::Failed)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SubmitOutcome<T> {
    pub job_id: Option<String>,
    pub result: Option<T>,
}

impl<T> SubmitOutcome<T> {
    pub fn job(job_id: impl Into<String>) -> Self {
        Self {
            job_id: Some(job_id.into()),
            result: None,
        }
    }

    pub fn completed(result: T) -> Self {
        Self {
            job_id: None,
            result: Some(result),
        }
    }

    pub fn empty() -> Self {
        Self {
            job_id: None,
            result: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct StatusReport<T> {
    pub status: JobStatus,
    pub result: Option<T>,
    pub error: Option<String>,
    pub progress: Option<u8>,
}

impl<T> StatusReport<T> {
    pub fn new(status: JobStatus) -> Self {
        Self {
            status,
            result: None,
            error: None,
            progress: None,
        }
    }

    pub fn queued() -> Self {
        Self::new(JobStatus::Queued)
    }

    pub fn processing() -> Self {
        Self::new(JobStatus::Processing)
    }

    pub fn succeeded(result: T) -> Self {
        Self {
            result: Some(result),
            ..Self::new(JobStatus::Succeed)
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(JobStatus::Failed)
        }
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress.min(100));
        self
    }
}

#[derive(Clone, Debug)]
pub struct PollOptions {
    pub poll_interval: Duration,
    pub timeout: Duration,
    pub max_polls: Option<u32>,
    pub cancellation: Option<CancellationToken>,
    pub progress: Option<ProgressHandle>,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL, DEFAULT_POLL_TIMEOUT)
    }
}

impl PollOptions {
    pub fn new(poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            poll_interval,
            timeout,
            max_polls: None,
            cancellation: None,
            progress: None,
        }
    }

    pub fn with_max_polls(mut self, max_polls: u32) -> Self {
        self.max_polls = Some(max_polls.max(1));
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn with_progress(mut self, progress: ProgressHandle) -> Self {
        self.progress = Some(progress);
        self
    }

    fn ensure_not_cancelled(&self, job_id: &str) -> CoreResult<()> {
        match &self.cancellation {
            Some(token) if token.is_cancelled() => Err(CoreError::new(
                CoreErrorKind::Cancelled,
                format!("polling of job '{job_id}' was cancelled"),
            )
            .in_service(SERVICE, "execute_with_polling")),
            _ => Ok(()),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryOptions {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub use_exponential_backoff: bool,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            use_exponential_backoff: true,
        }
    }
}

impl RetryOptions {
    pub fn new(max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            max_retries,
            retry_delay,
            use_exponential_backoff: true,
        }
    }

    pub fn flat(mut self) -> Self {
        self.use_exponential_backoff = false;
        self
    }

    /// Delay slept after the zero-based `attempt` failed.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if !self.use_exponential_backoff {
            return self.retry_delay;
        }
        let factor = 1u32 << attempt.min(20);
        self.retry_delay.saturating_mul(factor)
    }
}

pub async fn execute_with_polling<T, S, SFut, C, CFut>(
    submit: S,
    mut check_status: C,
    options: &PollOptions,
) -> CoreResult<T>
where
    S: FnOnce() -> SFut,
    SFut: Future<Output = CoreResult<SubmitOutcome<T>>>,
    C: FnMut(String) -> CFut,
    CFut: Future<Output = CoreResult<StatusReport<T>>>,
{
    let submitted = submit().await?;
    let job_id = match (submitted.result, submitted.job_id) {
        (Some(result), job_id) => {
            debug!(job_id = ?job_id, "submission completed synchronously");
            return Ok(result);
        }
        (None, Some(job_id)) => job_id,
        (None, None) => {
            return Err(CoreError::new(
                CoreErrorKind::OperationFailed,
                "submission returned neither a job id nor a result",
            )
            .in_service(SERVICE, "execute_with_polling")
            .with_context("violation", "backend"));
        }
    };

    debug!(
        job_id = %job_id,
        poll_interval_ms = options.poll_interval.as_millis() as u64,
        timeout_ms = options.timeout.as_millis() as u64,
        "job submitted; polling for completion"
    );

    let started = Instant::now();
    let mut polls: u32 = 0;
    loop {
        let out_of_polls = options.max_polls.is_some_and(|max| polls >= max);
        if out_of_polls || started.elapsed() >= options.timeout {
            return Err(timeout_error(&job_id, options.timeout, polls));
        }
        options.ensure_not_cancelled(&job_id)?;
        tokio::time::sleep(options.poll_interval).await;
        options.ensure_not_cancelled(&job_id)?;

        polls += 1;
        let report = check_status(job_id.clone()).await?;
        if let (Some(handle), Some(progress)) = (&options.progress, report.progress) {
            handle.report(progress);
        }
        match report.status {
            JobStatus::Succeed => {
                debug!(job_id = %job_id, polls, "job succeeded");
                return report.result.ok_or_else(|| {
                    CoreError::new(
                        CoreErrorKind::OperationFailed,
                        format!("job '{job_id}' reported success without a result"),
                    )
                    .in_service(SERVICE, "execute_with_polling")
                    .with_context("job_id", &job_id)
                    .with_context("violation", "backend")
                });
            }
            JobStatus::Failed => {
                let reason = report
                    .error
                    .unwrap_or_else(|| "backend reported failure without a message".to_string());
                return Err(CoreError::new(
                    CoreErrorKind::OperationFailed,
                    format!("job '{job_id}' failed: {reason}"),
                )
                .in_service(SERVICE, "execute_with_polling")
                .with_context("job_id", &job_id));
            }
            JobStatus::Queued | JobStatus::Processing => {}
        }
    }
}

pub async fn execute_with_retry<T, F, Fut>(
    mut operation: F,
    options: &RetryOptions,
) -> CoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = CoreResult<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if attempt >= options.max_retries || !error.is_retryable() {
                    return Err(error);
                }
                let delay = options.delay_for_attempt(attempt);
                warn!(
                    attempt = attempt + 1,
                    max_attempts = options.max_retries + 1,
                    delay_ms = delay.as_millis() as u64,
                    timeout = error.is_timeout(),
                    error = %error,
                    "operation failed; retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Each attempt submits again; a poll session that timed out is never resumed.
pub async fn execute_with_polling_and_retry<T, S, SFut, C, CFut>(
    submit: S,
    check_status: C,
    poll_options: &PollOptions,
    retry_options: &RetryOptions,
) -> CoreResult<T>
where
    S: Fn() -> SFut,
    SFut: Future<Output = CoreResult<SubmitOutcome<T>>>,
    C: Fn(String) -> CFut,
    CFut: Future<Output = CoreResult<StatusReport<T>>>,
{
    let submit = &submit;
    let check_status = &check_status;
    execute_with_retry(
        move || {
            execute_with_polling(
                move || submit(),
                move |job_id| check_status(job_id),
                poll_options,
            )
        },
        retry_options,
    )
    .await
}

fn timeout_error(job_id: &str, timeout: Duration, polls: u32) -> CoreError {
    let timeout_ms = timeout.as_millis() as u64;
    CoreError::new(
        CoreErrorKind::Timeout,
        format!("job '{job_id}' did not finish within {timeout_ms}ms after {polls} status checks"),
    )
    .in_service(SERVICE, "execute_with_polling")
    .with_context("job_id", job_id)
    .with_context("timeout_ms", timeout_ms)
    .with_context("polls", polls)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{JobStatus, RetryOptions};

    #[test]
    fn backend_labels_map_case_insensitively() {
        assert_eq!(JobStatus::from_backend_label("succeed"), JobStatus::Succeed);
        assert_eq!(JobStatus::from_backend_label("Completed"), JobStatus::Succeed);
        assert_eq!(JobStatus::from_backend_label("task_failed"), JobStatus::Failed);
        assert_eq!(JobStatus::from_backend_label("ERROR"), JobStatus::Failed);
        assert_eq!(JobStatus::from_backend_label("running"), JobStatus::Processing);
        assert_eq!(JobStatus::from_backend_label("processing"), JobStatus::Processing);
        assert_eq!(JobStatus::from_backend_label("succeeded"), JobStatus::Succeed);
        assert_eq!(JobStatus::from_backend_label("SUCCESS"), JobStatus::Succeed);
        assert_eq!(JobStatus::from_backend_label("submitted"), JobStatus::Queued);
        assert_eq!(JobStatus::from_backend_label(""), JobStatus::Queued);
    }

    #[test]
    fn negated_labels_are_not_success() {
        assert_eq!(JobStatus::from_backend_label("incomplete"), JobStatus::Queued);
        assert_eq!(JobStatus::from_backend_label("INCOMPLETE"), JobStatus::Queued);
        assert_eq!(JobStatus::from_backend_label("unsuccessful"), JobStatus::Failed);
        assert_eq!(JobStatus::from_backend_label("Unsucceeded"), JobStatus::Failed);
    }

    #[test]
    fn exponential_delays_double_per_attempt() {
        let options = RetryOptions::new(3, Duration::from_millis(50));
        assert_eq!(options.delay_for_attempt(0), Duration::from_millis(50));
        assert_eq!(options.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(options.delay_for_attempt(2), Duration::from_millis(200));
    }

    #[test]
    fn flat_delays_stay_constant() {
        let options = RetryOptions::new(3, Duration::from_millis(50)).flat();
        assert_eq!(options.delay_for_attempt(0), Duration::from_millis(50));
        assert_eq!(options.delay_for_attempt(2), Duration::from_millis(50));
    }
}
