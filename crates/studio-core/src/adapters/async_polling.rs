use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::adapters::contract::{AdapterCallRequest, AdapterCallResponse, ApiAdapter};
use crate::adapters::http::{
    HttpTransport, api_root, auth_headers, failure_response, first_string, join_url, lookup,
};
use crate::models::{ApiFormat, CoreResult, ProviderCategory, ProviderConfig};
use crate::polling::{JobStatus, PollOptions, StatusReport, SubmitOutcome, execute_with_polling};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5_000);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 60;

const SERVICE: &str = "async-polling adapter";

// Candidate response paths, tried in order. New backends only need new entries.
pub const JOB_ID_FIELDS: &[&str] = &[
    "task_id",
    "taskId",
    "id",
    "job_id",
    "request_id",
    "data.task_id",
    "data.id",
    "output.task_id",
];
pub const STATUS_FIELDS: &[&str] = &[
    "status",
    "state",
    "task_status",
    "data.status",
    "data.task_status",
    "output.task_status",
];
// Input fields such as `image_url` are left out; backends echo them back.
pub const RESULT_URL_FIELDS: &[&str] = &[
    "video_url",
    "url",
    "data.video_url",
    "data.url",
    "data.task_result.videos.0.url",
    "data.task_result.images.0.url",
    "output.video_url",
    "output.url",
    "output.0",
    "result.url",
];
pub const ERROR_FIELDS: &[&str] = &[
    "error.message",
    "error",
    "fail_reason",
    "data.task_status_msg",
    "data.error",
    "message",
];
pub const PROGRESS_FIELDS: &[&str] = &["progress", "data.progress", "output.progress"];

// Public alias to provider-internal id. A provider's own `model_aliases` take precedence.
const MODEL_ALIASES: &[(&str, &str)] = &[
    ("kling", "kling-v1-6"),
    ("kling-v1.6", "kling-v1-6"),
    ("sora", "sora-2"),
    ("veo3", "veo-3.0-generate-preview"),
    ("hailuo", "MiniMax-Hailuo-02"),
];

#[derive(Clone, Debug, PartialEq)]
pub struct AsyncJobResult {
    pub job_id: Option<String>,
    pub url: String,
    pub raw: Value,
}

impl AsyncJobResult {
    fn into_data(self) -> Value {
        json!({
            "url": self.url,
            "jobId": self.job_id,
            "raw": self.raw,
        })
    }
}

pub struct AsyncPollingAdapter {
    http: HttpTransport,
    poll_interval: Duration,
    max_attempts: u32,
}

impl AsyncPollingAdapter {
    pub fn new(http: HttpTransport) -> Self {
        Self {
            http,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_timing(mut self, poll_interval: Duration, max_attempts: u32) -> Self {
        self.poll_interval = poll_interval;
        self.max_attempts = max_attempts.max(1);
        self
    }

    fn poll_options(&self) -> PollOptions {
        let ceiling = self.poll_interval.saturating_mul(self.max_attempts);
        PollOptions::new(self.poll_interval, ceiling).with_max_polls(self.max_attempts)
    }

    async fn run_job(
        &self,
        provider: &ProviderConfig,
        request: &AdapterCallRequest,
        resource: &'static str,
    ) -> CoreResult<AsyncJobResult> {
        let collection = join_url(&api_root(&provider.base_url), resource);
        let body = submission_body(provider, request);
        let (collection, body) = (&collection, &body);

        let submit = move || async move {
            let response = self
                .http
                .post_json(collection, auth_headers(provider), body)
                .await
                .map_err(|error| error.into_core_error(SERVICE, "submit"))?;
            Ok(parse_submission(&response))
        };

        let check_status = move |job_id: String| {
            let url = join_url(collection, &job_id);
            async move {
                let response = self
                    .http
                    .get_json(&url, auth_headers(provider))
                    .await
                    .map_err(|error| error.into_core_error(SERVICE, "check_status"))?;
                Ok(parse_status(&job_id, &response))
            }
        };

        execute_with_polling(submit, check_status, &self.poll_options()).await
    }
}

#[async_trait]
impl ApiAdapter for AsyncPollingAdapter {
    fn supported_format(&self) -> ApiFormat {
        ApiFormat::AsyncPolling
    }

    async fn call_api(
        &self,
        provider: &ProviderConfig,
        request: &AdapterCallRequest,
    ) -> AdapterCallResponse {
        let started = Instant::now();
        let resource = match request.category {
            ProviderCategory::VideoGeneration => "videos/generations",
            ProviderCategory::ImageGeneration => "images/generations",
            other => {
                let message = format!("category '{other}' is not supported");
                return failure_response(SERVICE, message, started);
            }
        };
        if request.input.prompt_text().is_none() && request.input.image_url.is_none() {
            return failure_response(SERVICE, "a prompt or an image url is required", started);
        }

        tracing::debug!(
            component = "adapter",
            format = %self.supported_format(),
            provider_id = %provider.id,
            model = %request.model,
            "submitting job"
        );
        match self.run_job(provider, request, resource).await {
            Ok(result) => {
                let job_id = result.job_id.clone();
                AdapterCallResponse::ok(result.into_data(), started.elapsed()).with_task_id(job_id)
            }
            Err(error) => failure_response(SERVICE, error, started),
        }
    }
}

/// Provider-specific aliases win over the built-in table; unknown names pass through.
pub fn resolve_model_alias(provider: &ProviderConfig, model: &str) -> String {
    if let Some(alias) = provider.model_aliases.get(model) {
        return alias.clone();
    }
    MODEL_ALIASES
        .iter()
        .find(|(public, _)| public.eq_ignore_ascii_case(model))
        .map(|(_, internal)| (*internal).to_string())
        .unwrap_or_else(|| model.to_string())
}

fn submission_body(provider: &ProviderConfig, request: &AdapterCallRequest) -> Value {
    let input = &request.input;
    let mut body = serde_json::Map::new();
    body.insert("model".to_string(), json!(resolve_model_alias(provider, &request.model)));
    if let Some(prompt) = input.prompt_text() {
        body.insert("prompt".to_string(), json!(prompt));
    }
    if let Some(image_url) = &input.image_url {
        body.insert("image_url".to_string(), json!(image_url));
    }
    if let Some(aspect_ratio) = &input.aspect_ratio {
        body.insert("aspect_ratio".to_string(), json!(aspect_ratio));
    }
    if let Some(duration) = input.duration {
        body.insert("duration".to_string(), json!(duration));
    }
    if let Some(negative_prompt) = &input.negative_prompt {
        body.insert("negative_prompt".to_string(), json!(negative_prompt));
    }
    for (key, value) in &input.extra {
        body.entry(key.clone()).or_insert_with(|| value.clone());
    }
    Value::Object(body)
}

fn parse_submission(response: &Value) -> SubmitOutcome<AsyncJobResult> {
    let job_id = first_string(response, JOB_ID_FIELDS);
    let status =
        first_string(response, STATUS_FIELDS).map(|label| JobStatus::from_backend_label(&label));
    let url = first_string(response, RESULT_URL_FIELDS);

    // A bare URL only counts as a synchronous answer when there is no job to poll.
    let finished = match status {
        Some(status) => status == JobStatus::Succeed,
        None => job_id.is_none(),
    };
    match url {
        Some(url) if finished => SubmitOutcome::completed(AsyncJobResult {
            job_id,
            url,
            raw: response.clone(),
        }),
        _ => match job_id {
            Some(job_id) => SubmitOutcome::job(job_id),
            None => SubmitOutcome::empty(),
        },
    }
}

fn parse_status(job_id: &str, response: &Value) -> StatusReport<AsyncJobResult> {
    let url = first_string(response, RESULT_URL_FIELDS);
    let status = first_string(response, STATUS_FIELDS)
        .map(|label| JobStatus::from_backend_label(&label))
        .unwrap_or(JobStatus::Queued);

    let mut report = match status {
        JobStatus::Succeed => match url {
            Some(url) => StatusReport::succeeded(AsyncJobResult {
                job_id: Some(job_id.to_string()),
                url,
                raw: response.clone(),
            }),
            None => StatusReport::new(JobStatus::Succeed),
        },
        JobStatus::Failed => StatusReport::failed(
            first_string(response, ERROR_FIELDS).unwrap_or_else(|| "job failed".to_string()),
        ),
        other => StatusReport::new(other),
    };
    if let Some(progress) = progress_of(response) {
        report = report.with_progress(progress);
    }
    report
}

fn progress_of(response: &Value) -> Option<u8> {
    PROGRESS_FIELDS.iter().find_map(|path| {
        let value = lookup(response, path)?;
        let percent = match value {
            // Some backends report a 0..1 fraction.
            Value::Number(number) if number.is_f64() => {
                let raw = number.as_f64()?;
                if raw <= 1.0 { raw * 100.0 } else { raw }
            }
            Value::Number(number) => number.as_f64()?,
            Value::String(text) => text.trim().trim_end_matches('%').parse::<f64>().ok()?,
            _ => return None,
        };
        Some(percent.clamp(0.0, 100.0).round() as u8)
    })
}
