use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Url;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::adapters::contract::{AdapterCallRequest, AdapterCallResponse, AdapterInput, ApiAdapter};
use crate::adapters::http::{HttpTransport, auth_headers, failure_response, first_string, join_url};
use crate::models::{ApiFormat, CoreError, CoreErrorKind, CoreResult, ProviderConfig};
use crate::polling::{JobStatus, PollOptions, StatusReport, SubmitOutcome, execute_with_polling};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1_000);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 120;

const SERVICE: &str = "workflow-graph adapter";
const OUTPUT_KINDS: &[(&str, &str)] =
    &[("images", "image"), ("videos", "video"), ("gifs", "video")];
const PLACEHOLDERS: &[&str] = &["prompt", "negative_prompt", "image_url"];

#[derive(Clone, Debug, PartialEq)]
pub struct GraphOutput {
    pub node_id: String,
    pub kind: &'static str,
    pub files: Vec<Value>,
}

pub struct WorkflowGraphAdapter {
    http: HttpTransport,
    poll_interval: Duration,
    max_attempts: u32,
}

impl WorkflowGraphAdapter {
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

    async fn run_graph(&self, provider: &ProviderConfig, graph: Value) -> CoreResult<GraphOutput> {
        let base = provider.base_url.trim_end_matches('/').to_string();
        let submit_url = join_url(&base, "prompt");
        let body = json!({
            "prompt": graph,
            "client_id": Uuid::new_v4().to_string(),
        });
        let (base, submit_url, body) = (&base, &submit_url, &body);

        let submit = move || async move {
            let response = self
                .http
                .post_json(submit_url, auth_headers(provider), body)
                .await
                .map_err(|error| error.into_core_error(SERVICE, "submit"))?;
            if let Some(errors) = response.get("node_errors").filter(|errors| has_entries(errors)) {
                return Err(CoreError::new(
                    CoreErrorKind::ApiCall,
                    format!("workflow rejected: {errors}"),
                )
                .in_service(SERVICE, "submit"));
            }
            Ok(match first_string(&response, &["prompt_id", "id"]) {
                Some(prompt_id) => SubmitOutcome::job(prompt_id),
                None => SubmitOutcome::empty(),
            })
        };

        let check_status = move |prompt_id: String| {
            let url = join_url(base, &format!("history/{prompt_id}"));
            async move {
                let history = self
                    .http
                    .get_json(&url, auth_headers(provider))
                    .await
                    .map_err(|error| error.into_core_error(SERVICE, "check_status"))?;
                Ok(history_status(base, &prompt_id, &history))
            }
        };

        let ceiling = self.poll_interval.saturating_mul(self.max_attempts);
        let options =
            PollOptions::new(self.poll_interval, ceiling).with_max_polls(self.max_attempts);
        execute_with_polling(submit, check_status, &options).await
    }
}

#[async_trait]
impl ApiAdapter for WorkflowGraphAdapter {
    fn supported_format(&self) -> ApiFormat {
        ApiFormat::WorkflowGraph
    }

    async fn call_api(
        &self,
        provider: &ProviderConfig,
        request: &AdapterCallRequest,
    ) -> AdapterCallResponse {
        let started = Instant::now();
        let Some(graph) = request.input.workflow.as_ref() else {
            return failure_response(SERVICE, "input.workflow must carry a node graph", started);
        };
        if !graph.is_object() {
            return failure_response(SERVICE, "input.workflow must be a JSON object", started);
        }
        let graph = substitute_placeholders(graph, &request.input);

        tracing::debug!(
            component = "adapter",
            format = %self.supported_format(),
            provider_id = %provider.id,
            model = %request.model,
            "queueing workflow graph"
        );
        match self.run_graph(provider, graph).await {
            Ok(output) => {
                let url = output
                    .files
                    .first()
                    .and_then(|file| file.get("url"))
                    .cloned()
                    .unwrap_or(Value::Null);
                AdapterCallResponse::ok(
                    json!({
                        "nodeId": output.node_id,
                        "type": output.kind,
                        "url": url,
                        "files": output.files,
                    }),
                    started.elapsed(),
                )
            }
            Err(error) => failure_response(SERVICE, error, started),
        }
    }
}

/// Replaces `{{prompt}}`-style markers in every string of the graph.
pub fn substitute_placeholders(graph: &Value, input: &AdapterInput) -> Value {
    let values: Vec<(String, String)> = PLACEHOLDERS
        .iter()
        .filter_map(|name| {
            let value = match *name {
                "prompt" => input.prompt_text().map(str::to_string),
                "negative_prompt" => input.negative_prompt.clone(),
                "image_url" => input.image_url.clone(),
                _ => None,
            }?;
            Some((format!("{{{{{name}}}}}"), value))
        })
        .collect();
    replace_in(graph, &values)
}

fn replace_in(value: &Value, values: &[(String, String)]) -> Value {
    match value {
        Value::String(text) => {
            let mut text = text.clone();
            for (marker, replacement) in values {
                if text.contains(marker.as_str()) {
                    text = text.replace(marker.as_str(), replacement);
                }
            }
            Value::String(text)
        }
        Value::Array(items) => {
            Value::Array(items.iter().map(|item| replace_in(item, values)).collect())
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| (key.clone(), replace_in(item, values)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn history_status(base: &str, prompt_id: &str, history: &Value) -> StatusReport<GraphOutput> {
    // The entry only appears once the graph has been picked up.
    let Some(entry) = history.get(prompt_id) else {
        return StatusReport::queued();
    };

    let status = entry.get("status");
    let label = status
        .and_then(|status| status.get("status_str"))
        .and_then(Value::as_str)
        .unwrap_or("");
    if JobStatus::from_backend_label(label) == JobStatus::Failed {
        let detail = status
            .and_then(|status| status.get("messages"))
            .map(Value::to_string)
            .unwrap_or_else(|| label.to_string());
        return StatusReport::failed(format!("workflow execution failed: {detail}"));
    }

    if let Some(output) = first_output(base, entry.get("outputs")) {
        return StatusReport::succeeded(output);
    }
    let completed = status
        .and_then(|status| status.get("completed"))
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if completed {
        StatusReport::failed("workflow finished without image or video outputs")
    } else {
        StatusReport::processing()
    }
}

fn first_output(base: &str, outputs: Option<&Value>) -> Option<GraphOutput> {
    let outputs = outputs?.as_object()?;
    outputs.iter().find_map(|(node_id, node)| {
        OUTPUT_KINDS.iter().find_map(|(field, kind)| {
            let files = node.get(*field)?.as_array()?;
            let files: Vec<Value> =
                files.iter().filter_map(|file| file_reference(base, file)).collect();
            (!files.is_empty()).then(|| GraphOutput {
                node_id: node_id.clone(),
                kind: *kind,
                files,
            })
        })
    })
}

fn file_reference(base: &str, file: &Value) -> Option<Value> {
    let filename = file.get("filename")?.as_str()?;
    let subfolder = file.get("subfolder").and_then(Value::as_str).unwrap_or("");
    let kind = file.get("type").and_then(Value::as_str).unwrap_or("output");
    let url = Url::parse_with_params(
        &join_url(base, "view"),
        &[("filename", filename), ("subfolder", subfolder), ("type", kind)],
    )
    .ok()?;
    Some(json!({
        "filename": filename,
        "subfolder": subfolder,
        "type": kind,
        "url": url.to_string(),
    }))
}

fn has_entries(value: &Value) -> bool {
    match value {
        Value::Object(map) => !map.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Null => false,
        _ => true,
    }
}
