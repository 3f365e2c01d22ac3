use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderCategory {
    ImageGeneration,
    VideoGeneration,
    Llm,
    Workflow,
    Tts,
    Stt,
}

impl ProviderCategory {
    pub const ALL: [ProviderCategory; 6] = [
        Self::ImageGeneration,
        Self::VideoGeneration,
        Self::Llm,
        Self::Workflow,
        Self::Tts,
        Self::Stt,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ImageGeneration => "image-generation",
            Self::VideoGeneration => "video-generation",
            Self::Llm => "llm",
            Self::Workflow => "workflow",
            Self::Tts => "tts",
            Self::Stt => "stt",
        }
    }
}

impl Display for ProviderCategory {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderCategory {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|category| category.as_str() == value)
            .ok_or(())
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthScheme {
    #[default]
    Bearer,
    ApiKey,
    Basic,
    None,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApiFormat {
    OpenaiCompatible,
    AsyncPolling,
    WorkflowGraph,
}

impl ApiFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenaiCompatible => "openai-compatible",
            Self::AsyncPolling => "async-polling",
            Self::WorkflowGraph => "workflow-graph",
        }
    }
}

impl Display for ApiFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderHealth {
    #[default]
    Unknown,
    Online,
    Offline,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    pub id: String,
    pub name: String,
    pub category: ProviderCategory,
    pub base_url: String,
    #[serde(default)]
    pub auth_type: AuthScheme,
    #[serde(default)]
    pub api_key: Option<String>,
    pub api_format: ApiFormat,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default)]
    pub template_recommended: bool,
    #[serde(default)]
    pub selected_models: Vec<String>,
    #[serde(default)]
    pub model_aliases: BTreeMap<String, String>,
    #[serde(default)]
    pub status: ProviderHealth,
    #[serde(default)]
    pub latency_ms: Option<u64>,
}

fn default_enabled() -> bool {
    true
}

impl ProviderConfig {
    pub fn new(
        id: impl Into<String>,
        category: ProviderCategory,
        base_url: impl Into<String>,
        api_format: ApiFormat,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            category,
            base_url: base_url.into(),
            auth_type: AuthScheme::Bearer,
            api_key: None,
            api_format,
            enabled: true,
            priority: None,
            template_recommended: false,
            selected_models: Vec::new(),
            model_aliases: BTreeMap::new(),
            status: ProviderHealth::Unknown,
            latency_ms: None,
        }
    }

    pub fn offers_model(&self, model: &str) -> bool {
        self.selected_models.iter().any(|selected| selected == model)
    }
}

#[cfg(test)]
mod tests {
    use super::{ApiFormat, ProviderCategory, ProviderConfig};

    #[test]
    fn categories_roundtrip_through_their_tags() {
        for category in ProviderCategory::ALL {
            assert_eq!(category.as_str().parse::<ProviderCategory>(), Ok(category));
        }
    }

    #[test]
    fn deserializes_camel_case_config_with_defaults() {
        let config: ProviderConfig = serde_json::from_str(
            r#"{
                "id": "kling",
                "name": "Kling",
                "category": "video-generation",
                "baseUrl": "https://api.example.com",
                "apiFormat": "async-polling",
                "selectedModels": ["kling-v1"]
            }"#,
        )
        .unwrap();

        assert!(config.enabled);
        assert!(!config.template_recommended);
        assert_eq!(config.priority, None);
        assert_eq!(config.api_format, ApiFormat::AsyncPolling);
        assert!(config.offers_model("kling-v1"));
    }
}
