use std::time::Instant;

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use crate::adapters::contract::{AdapterCallRequest, AdapterCallResponse, AdapterInput, ApiAdapter};
use crate::adapters::http::{
    HttpTransport, api_root, auth_headers, failure_response, first_string, join_url, lookup,
};
use crate::models::{ApiFormat, ProviderCategory, ProviderConfig};

const DEFAULT_IMAGE_SIZE: &str = "1024x1024";
const ASPECT_RATIO_SIZES: &[(&str, &str)] = &[
    ("1:1", "1024x1024"),
    ("16:9", "1792x1024"),
    ("9:16", "1024x1792"),
    ("4:3", "1152x864"),
    ("3:4", "864x1152"),
    ("3:2", "1536x1024"),
    ("2:3", "1024x1536"),
];

const IMAGE_URL_FIELDS: &[&str] = &["url", "image_url"];
const VIDEO_URL_FIELDS: &[&str] = &[
    "data.0.url",
    "video_url",
    "url",
    "data.video_url",
    "output.url",
];
const VIDEO_JOB_FIELDS: &[&str] = &["id", "task_id", "data.id", "data.task_id"];

pub struct OpenAiCompatibleAdapter {
    http: HttpTransport,
}

impl OpenAiCompatibleAdapter {
    pub fn new(http: HttpTransport) -> Self {
        Self { http }
    }

    async fn chat(
        &self,
        provider: &ProviderConfig,
        request: &AdapterCallRequest,
        started: Instant,
    ) -> AdapterCallResponse {
        let messages = chat_messages(&request.input);
        if messages.is_empty() {
            let message = "a prompt or messages are required";
            return failure_response("chat completion", message, started);
        }

        let mut body = json!({
            "model": request.model,
            "messages": messages,
        });
        if let Some(temperature) = request.input.temperature {
            body["temperature"] = json!(temperature);
        }

        let url = join_url(&api_root(&provider.base_url), "chat/completions");
        let response = match self.http.post_json(&url, auth_headers(provider), &body).await {
            Ok(response) => response,
            Err(error) => return failure_response("chat completion", error, started),
        };

        let Some(content) = lookup(&response, "choices.0.message.content").and_then(Value::as_str)
        else {
            return failure_response(
                "chat completion",
                "response is missing choices[0].message.content",
                started,
            );
        };

        let mut data = json!({ "content": content });
        if let Some(usage) = response.get("usage") {
            data["usage"] = usage.clone();
        }
        AdapterCallResponse::ok(data, started.elapsed())
    }

    async fn image(
        &self,
        provider: &ProviderConfig,
        request: &AdapterCallRequest,
        started: Instant,
    ) -> AdapterCallResponse {
        let Some(prompt) = request.input.prompt_text() else {
            return failure_response("image generation", "a prompt is required", started);
        };

        let mut body = json!({
            "model": request.model,
            "prompt": prompt,
            "n": 1,
            "size": size_for_aspect_ratio(request.input.aspect_ratio.as_deref()),
        });
        if let Some(image_url) = &request.input.image_url {
            body["image"] = json!(image_url);
        }

        let url = join_url(&api_root(&provider.base_url), "images/generations");
        let response = match self.http.post_json(&url, auth_headers(provider), &body).await {
            Ok(response) => response,
            Err(error) => return failure_response("image generation", error, started),
        };

        let images = response
            .get("data")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        first_string(item, IMAGE_URL_FIELDS)
                            .map(|url| json!({ "url": url }))
                            .or_else(|| {
                                first_string(item, &["b64_json"])
                                    .map(|b64| json!({ "b64Json": b64 }))
                            })
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        let Some(first) = images.first().cloned() else {
            return failure_response(
                "image generation",
                "response is missing data[].url or data[].b64_json",
                started,
            );
        };

        let mut data = match first {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        data.insert("images".to_string(), Value::Array(images));
        AdapterCallResponse::ok(Value::Object(data), started.elapsed())
    }

    async fn video(
        &self,
        provider: &ProviderConfig,
        request: &AdapterCallRequest,
        started: Instant,
    ) -> AdapterCallResponse {
        let Some(prompt) = request.input.prompt_text() else {
            return failure_response("video generation", "a prompt is required", started);
        };

        let mut body = json!({
            "model": request.model,
            "prompt": prompt,
        });
        if let Some(image_url) = &request.input.image_url {
            body["image_url"] = json!(image_url);
        }
        if let Some(aspect_ratio) = &request.input.aspect_ratio {
            body["aspect_ratio"] = json!(aspect_ratio);
        }
        if let Some(duration) = request.input.duration {
            body["duration"] = json!(duration);
        }

        let url = join_url(&api_root(&provider.base_url), "videos/generations");
        let response = match self.http.post_json(&url, auth_headers(provider), &body).await {
            Ok(response) => response,
            Err(error) => return failure_response("video generation", error, started),
        };

        let job_id = first_string(&response, VIDEO_JOB_FIELDS);
        if let Some(url) = first_string(&response, VIDEO_URL_FIELDS) {
            return AdapterCallResponse::ok(json!({ "url": url }), started.elapsed())
                .with_task_id(job_id);
        }

        // Some backends accept the job and hand back only an id to track.
        let status = first_string(&response, &["status"]).unwrap_or_else(|| "queued".to_string());
        match job_id {
            Some(job_id) => AdapterCallResponse::ok(
                json!({
                    "taskId": job_id,
                    "status": status,
                }),
                started.elapsed(),
            )
            .with_task_id(Some(job_id)),
            None => failure_response(
                "video generation",
                "response carries neither a video url nor a job id",
                started,
            ),
        }
    }
}

#[async_trait]
impl ApiAdapter for OpenAiCompatibleAdapter {
    fn supported_format(&self) -> ApiFormat {
        ApiFormat::OpenaiCompatible
    }

    async fn call_api(
        &self,
        provider: &ProviderConfig,
        request: &AdapterCallRequest,
    ) -> AdapterCallResponse {
        let started = Instant::now();
        tracing::debug!(
            component = "adapter",
            format = %self.supported_format(),
            provider_id = %provider.id,
            model = %request.model,
            category = %request.category,
            "calling provider"
        );
        match request.category {
            ProviderCategory::Llm => self.chat(provider, request, started).await,
            ProviderCategory::ImageGeneration => self.image(provider, request, started).await,
            ProviderCategory::VideoGeneration => self.video(provider, request, started).await,
            other => failure_response(
                "openai-compatible adapter",
                format!("category '{other}' is not supported"),
                started,
            ),
        }
    }
}

fn chat_messages(input: &AdapterInput) -> Vec<Value> {
    if !input.messages.is_empty() {
        return input
            .messages
            .iter()
            .map(|message| {
                let role = match message.role.to_ascii_lowercase().as_str() {
                    "system" => "system",
                    "assistant" => "assistant",
                    _ => "user",
                };
                json!({ "role": role, "content": message.content })
            })
            .collect();
    }
    input
        .prompt_text()
        .map(|prompt| vec![json!({ "role": "user", "content": prompt })])
        .unwrap_or_default()
}

pub fn size_for_aspect_ratio(aspect_ratio: Option<&str>) -> &'static str {
    aspect_ratio
        .map(str::trim)
        .and_then(|ratio| {
            ASPECT_RATIO_SIZES
                .iter()
                .find(|(candidate, _)| *candidate == ratio)
                .map(|(_, size)| *size)
        })
        .unwrap_or(DEFAULT_IMAGE_SIZE)
}

#[cfg(test)]
mod tests {
    use super::{chat_messages, size_for_aspect_ratio};
    use crate::adapters::contract::{AdapterInput, ChatMessage};

    #[test]
    fn aspect_ratios_map_to_pixel_sizes() {
        assert_eq!(size_for_aspect_ratio(Some("16:9")), "1792x1024");
        assert_eq!(size_for_aspect_ratio(Some("9:16")), "1024x1792");
        assert_eq!(size_for_aspect_ratio(Some(" 1:1 ")), "1024x1024");
        assert_eq!(size_for_aspect_ratio(Some("21:9")), "1024x1024");
        assert_eq!(size_for_aspect_ratio(None), "1024x1024");
    }

    #[test]
    fn unknown_roles_are_sent_as_user() {
        let input = AdapterInput {
            messages: vec![ChatMessage {
                role: "Narrator".to_string(),
                content: "hi".to_string(),
            }],
            ..AdapterInput::default()
        };
        let messages = chat_messages(&input);
        assert_eq!(messages[0]["role"], "user");
    }

    #[test]
    fn prompt_becomes_single_user_message() {
        let messages = chat_messages(&AdapterInput::from_prompt("hello"));
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["content"], "hello");
    }
}
