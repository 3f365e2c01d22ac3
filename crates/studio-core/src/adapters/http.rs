use std::time::{Duration, Instant};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64_ENGINE;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use serde_json::Value;
use thiserror::Error;

use crate::adapters::contract::AdapterCallResponse;
use crate::models::{AuthScheme, CoreError, CoreErrorKind, ProviderConfig};

const BODY_PREVIEW_LIMIT: usize = 512;
const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Error)]
pub enum HttpCallError {
    #[error("request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed response body: {0}")]
    Decode(String),
}

impl HttpCallError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn into_core_error(self, service: &'static str, operation: &'static str) -> CoreError {
        let kind = match self {
            Self::Timeout(_) => CoreErrorKind::Timeout,
            _ => CoreErrorKind::ApiCall,
        };
        let status = self.status();
        let mut error = CoreError::new(kind, self.to_string()).in_service(service, operation);
        if let Some(status) = status {
            error = error.with_context("http_status", status);
        }
        error
    }
}

#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: Client,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn post_json(
        &self,
        url: &str,
        headers: HeaderMap,
        body: &Value,
    ) -> Result<Value, HttpCallError> {
        self.send(Method::POST, url, headers, Some(body)).await
    }

    pub async fn get_json(&self, url: &str, headers: HeaderMap) -> Result<Value, HttpCallError> {
        self.send(Method::GET, url, headers, None).await
    }

    /// Any HTTP answer at all counts as reachable.
    pub async fn probe(&self, url: &str, headers: HeaderMap) -> Result<u16, HttpCallError> {
        let request = self.client.get(url).headers(headers);
        match tokio::time::timeout(self.timeout, request.send()).await {
            Ok(Ok(response)) => Ok(response.status().as_u16()),
            Ok(Err(error)) => Err(HttpCallError::Transport(error.to_string())),
            Err(_) => Err(HttpCallError::Timeout(self.timeout)),
        }
    }

    /// Dropping the in-flight future when the ceiling elapses aborts the request.
    async fn send(
        &self,
        method: Method,
        url: &str,
        headers: HeaderMap,
        body: Option<&Value>,
    ) -> Result<Value, HttpCallError> {
        let mut request = self.client.request(method, url).headers(headers);
        if let Some(body) = body {
            request = request.json(body);
        }

        let exchange = async move {
            let response = request
                .send()
                .await
                .map_err(|error| HttpCallError::Transport(error.to_string()))?;
            let status = response.status();
            let text = response
                .text()
                .await
                .map_err(|error| HttpCallError::Transport(error.to_string()))?;

            if !status.is_success() {
                return Err(HttpCallError::Status {
                    status: status.as_u16(),
                    body: preview_body(&text),
                });
            }
            if text.trim().is_empty() {
                return Ok(Value::Null);
            }
            serde_json::from_str::<Value>(&text).map_err(|error| {
                HttpCallError::Decode(format!("{error} | body={}", preview_body(&text)))
            })
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(outcome) => outcome,
            Err(_) => Err(HttpCallError::Timeout(self.timeout)),
        }
    }
}

pub fn auth_headers(provider: &ProviderConfig) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let Some(credential) = provider
        .api_key
        .as_deref()
        .map(str::trim)
        .filter(|key| !key.is_empty())
    else {
        if provider.auth_type != AuthScheme::None {
            tracing::debug!(
                component = "adapter",
                provider_id = %provider.id,
                "provider has no credential configured; sending unauthenticated request"
            );
        }
        return headers;
    };

    let (name, value) = match provider.auth_type {
        AuthScheme::Bearer => (AUTHORIZATION, format!("Bearer {credential}")),
        AuthScheme::ApiKey => (HeaderName::from_static(API_KEY_HEADER), credential.to_string()),
        AuthScheme::Basic => (
            AUTHORIZATION,
            format!("Basic {}", B64_ENGINE.encode(credential.as_bytes())),
        ),
        AuthScheme::None => return headers,
    };

    match HeaderValue::from_str(&value) {
        Ok(mut value) => {
            value.set_sensitive(true);
            headers.insert(name, value);
        }
        Err(_) => tracing::warn!(
            component = "adapter",
            provider_id = %provider.id,
            "provider credential is not a valid header value; omitting auth header"
        ),
    }
    headers
}

pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

pub fn api_root(base: &str) -> String {
    let trimmed = base.trim_end_matches('/');
    if trimmed.ends_with("/v1") {
        trimmed.to_string()
    } else {
        format!("{trimmed}/v1")
    }
}

/// Resolves a dotted path such as `data.0.url`; numeric segments index arrays.
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

pub fn first_string(value: &Value, candidates: &[&str]) -> Option<String> {
    candidates
        .iter()
        .filter_map(|path| lookup(value, path))
        .find_map(|found| match found {
            Value::String(text) if !text.trim().is_empty() => Some(text.clone()),
            Value::Number(number) => Some(number.to_string()),
            _ => None,
        })
}

pub fn failure_response(
    context: &str,
    error: impl std::fmt::Display,
    started: Instant,
) -> AdapterCallResponse {
    AdapterCallResponse::failure(format!("{context}: {error}"), started.elapsed())
}

pub(crate) fn preview_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "<empty body>".to_string();
    }
    let mut preview = trimmed.chars().take(BODY_PREVIEW_LIMIT).collect::<String>();
    if trimmed.chars().count() > BODY_PREVIEW_LIMIT {
        preview.push_str("...");
    }
    preview
}

#[cfg(test)]
mod tests {
    use reqwest::header::AUTHORIZATION;
    use serde_json::json;

    use super::{api_root, auth_headers, first_string, lookup, preview_body, BODY_PREVIEW_LIMIT};
    use crate::models::{ApiFormat, AuthScheme, ProviderCategory, ProviderConfig};

    fn provider(auth_type: AuthScheme, key: Option<&str>) -> ProviderConfig {
        let mut config = ProviderConfig::new(
            "p",
            ProviderCategory::Llm,
            "https://api.example.com",
            ApiFormat::OpenaiCompatible,
        );
        config.auth_type = auth_type;
        config.api_key = key.map(str::to_string);
        config
    }

    #[test]
    fn bearer_and_api_key_headers() {
        let bearer = auth_headers(&provider(AuthScheme::Bearer, Some("sk-1")));
        assert_eq!(bearer.get(AUTHORIZATION).unwrap(), "Bearer sk-1");

        let api_key = auth_headers(&provider(AuthScheme::ApiKey, Some("k")));
        assert_eq!(api_key.get("x-api-key").unwrap(), "k");
    }

    #[test]
    fn basic_auth_is_base64_encoded() {
        let headers = auth_headers(&provider(AuthScheme::Basic, Some("user:pass")));
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Basic dXNlcjpwYXNz");
    }

    #[test]
    fn none_scheme_and_missing_key_send_no_headers() {
        assert!(auth_headers(&provider(AuthScheme::None, Some("k"))).is_empty());
        assert!(auth_headers(&provider(AuthScheme::Bearer, None)).is_empty());
        assert!(auth_headers(&provider(AuthScheme::Bearer, Some("  "))).is_empty());
    }

    #[test]
    fn api_root_appends_single_version_segment() {
        assert_eq!(api_root("https://x.test"), "https://x.test/v1");
        assert_eq!(api_root("https://x.test/v1/"), "https://x.test/v1");
    }

    #[test]
    fn lookup_walks_objects_and_arrays() {
        let body = json!({"data": [{"url": "https://cdn/1.png"}], "task_id": 991});
        assert_eq!(lookup(&body, "data.0.url"), Some(&json!("https://cdn/1.png")));
        assert_eq!(lookup(&body, "data.1.url"), None);
        assert_eq!(
            first_string(&body, &["id", "task_id"]).as_deref(),
            Some("991")
        );
    }

    #[test]
    fn first_string_skips_empty_candidates() {
        let body = json!({"id": "", "taskId": "abc"});
        assert_eq!(first_string(&body, &["id", "taskId"]).as_deref(), Some("abc"));
    }

    #[test]
    fn preview_truncates_long_bodies() {
        let body = "a".repeat(BODY_PREVIEW_LIMIT + 10);
        assert!(preview_body(&body).ends_with("..."));
        assert_eq!(preview_body("  "), "<empty body>");
    }
}
