use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::{
    ApiFormat, CoreError, CoreErrorKind, CoreResult, ProviderCategory, ProviderConfig,
};

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Normalised generation input. Unknown keys are kept in `extra` and forwarded
/// to backends that understand them.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterInput {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub aspect_ratio: Option<String>,
    #[serde(default)]
    pub duration: Option<u32>,
    #[serde(default)]
    pub negative_prompt: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub workflow: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AdapterInput {
    pub fn from_prompt(prompt: impl Into<String>) -> Self {
        Self {
            prompt: Some(prompt.into()),
            ..Self::default()
        }
    }

    pub fn from_value(value: &Value) -> CoreResult<Self> {
        match value {
            Value::Null => Ok(Self::default()),
            Value::Object(_) => serde_json::from_value(value.clone()).map_err(|error| {
                CoreError::new(
                    CoreErrorKind::InvalidInput,
                    format!("adapter input is malformed: {error}"),
                )
            }),
            Value::String(prompt) => Ok(Self::from_prompt(prompt.clone())),
            other => Err(CoreError::new(
                CoreErrorKind::InvalidInput,
                format!("adapter input must be an object or a prompt string, got {other}"),
            )),
        }
    }

    pub fn prompt_text(&self) -> Option<&str> {
        self.prompt
            .as_deref()
            .filter(|prompt| !prompt.trim().is_empty())
            .or_else(|| {
                self.messages
                    .iter()
                    .rev()
                    .find(|message| message.role == "user")
                    .map(|message| message.content.as_str())
            })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AdapterCallRequest {
    pub model: String,
    pub category: ProviderCategory,
    pub input: AdapterInput,
}

impl AdapterCallRequest {
    pub fn new(model: impl Into<String>, category: ProviderCategory, input: AdapterInput) -> Self {
        Self {
            model: model.into(),
            category,
            input,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterCallResponse {
    pub success: bool,
    pub data: Option<Value>,
    pub error: Option<String>,
    pub task_id: Option<String>,
    pub duration: Option<Duration>,
}

impl AdapterCallResponse {
    pub fn ok(data: Value, duration: Duration) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            task_id: None,
            duration: Some(duration),
        }
    }

    pub fn failure(error: impl Into<String>, duration: Duration) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            task_id: None,
            duration: Some(duration),
        }
    }

    pub fn with_task_id(mut self, task_id: Option<String>) -> Self {
        self.task_id = task_id;
        self
    }

    pub fn into_result(self) -> CoreResult<Self> {
        if self.success {
            return Ok(self);
        }
        let message = self
            .error
            .clone()
            .unwrap_or_else(|| "adapter call failed without an error message".to_string());
        Err(CoreError::new(CoreErrorKind::ApiCall, message).in_service("adapter", "call_api"))
    }
}

/// One backend wire protocol behind the uniform call contract. `call_api`
/// reports every failure through the response, never as an error.
#[async_trait]
pub trait ApiAdapter: Send + Sync {
    fn supported_format(&self) -> ApiFormat;

    async fn call_api(
        &self,
        provider: &ProviderConfig,
        request: &AdapterCallRequest,
    ) -> AdapterCallResponse;
}

#[derive(Clone, Default)]
pub struct AdapterSet {
    adapters: HashMap<ApiFormat, Arc<dyn ApiAdapter>>,
}

impl AdapterSet {
    pub fn new(adapters: impl IntoIterator<Item = Arc<dyn ApiAdapter>>) -> CoreResult<Self> {
        let mut mapped = HashMap::new();
        for adapter in adapters {
            let format = adapter.supported_format();
            if mapped.insert(format, adapter).is_some() {
                return Err(CoreError::new(
                    CoreErrorKind::InvalidInput,
                    format!("duplicate adapter registration for format '{format}'"),
                )
                .in_service("adapter_set", "new"));
            }
        }
        Ok(Self { adapters: mapped })
    }

    pub fn get(&self, format: ApiFormat) -> CoreResult<Arc<dyn ApiAdapter>> {
        self.adapters.get(&format).cloned().ok_or_else(|| {
            CoreError::new(
                CoreErrorKind::UnsupportedFormat,
                format!("no adapter is registered for api format '{format}'"),
            )
            .in_service("adapter_set", "get")
        })
    }

    pub fn contains(&self, format: ApiFormat) -> bool {
        self.adapters.contains_key(&format)
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}
