mod adapter_provider;
mod polled;

use std::fmt::{Display, Formatter};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use adapter_provider::AdapterProvider;
pub use polled::{JobSource, PolledProvider};

use crate::adapters::AdapterInput;
use crate::models::{CoreError, CoreErrorKind, CoreResult, ProviderCategory};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    TextGeneration,
    ImageGeneration,
    VideoGeneration,
    Workflow,
    TextToSpeech,
    SpeechToText,
}

impl OperationType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TextGeneration => "text_generation",
            Self::ImageGeneration => "image_generation",
            Self::VideoGeneration => "video_generation",
            Self::Workflow => "workflow",
            Self::TextToSpeech => "text_to_speech",
            Self::SpeechToText => "speech_to_text",
        }
    }

    pub fn for_category(category: ProviderCategory) -> Self {
        match category {
            ProviderCategory::Llm => Self::TextGeneration,
            ProviderCategory::ImageGeneration => Self::ImageGeneration,
            ProviderCategory::VideoGeneration => Self::VideoGeneration,
            ProviderCategory::Workflow => Self::Workflow,
            ProviderCategory::Tts => Self::TextToSpeech,
            ProviderCategory::Stt => Self::SpeechToText,
        }
    }

    pub fn category(self) -> ProviderCategory {
        match self {
            Self::TextGeneration => ProviderCategory::Llm,
            Self::ImageGeneration => ProviderCategory::ImageGeneration,
            Self::VideoGeneration => ProviderCategory::VideoGeneration,
            Self::Workflow => ProviderCategory::Workflow,
            Self::TextToSpeech => ProviderCategory::Tts,
            Self::SpeechToText => ProviderCategory::Stt,
        }
    }
}

impl Display for OperationType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProviderDescriptor {
    pub id: String,
    pub display_name: String,
    pub operations: Vec<OperationType>,
}

impl ProviderDescriptor {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        operations: impl IntoIterator<Item = OperationType>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            operations: operations.into_iter().collect(),
        }
    }

    pub fn supports(&self, operation: OperationType) -> bool {
        self.operations.contains(&operation)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct GenerationParams {
    pub model: String,
    pub input: AdapterInput,
}

impl GenerationParams {
    pub fn new(model: impl Into<String>, input: AdapterInput) -> Self {
        Self {
            model: model.into(),
            input,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum OperationRequest {
    GenerateText(GenerationParams),
    GenerateImage(GenerationParams),
    GenerateVideo(GenerationParams),
    RunWorkflow(GenerationParams),
    SynthesizeSpeech(GenerationParams),
    TranscribeSpeech(GenerationParams),
}

impl OperationRequest {
    pub fn new(operation: OperationType, params: GenerationParams) -> Self {
        match operation {
            OperationType::TextGeneration => Self::GenerateText(params),
            OperationType::ImageGeneration => Self::GenerateImage(params),
            OperationType::VideoGeneration => Self::GenerateVideo(params),
            OperationType::Workflow => Self::RunWorkflow(params),
            OperationType::TextToSpeech => Self::SynthesizeSpeech(params),
            OperationType::SpeechToText => Self::TranscribeSpeech(params),
        }
    }

    pub fn operation(&self) -> OperationType {
        match self {
            Self::GenerateText(_) => OperationType::TextGeneration,
            Self::GenerateImage(_) => OperationType::ImageGeneration,
            Self::GenerateVideo(_) => OperationType::VideoGeneration,
            Self::RunWorkflow(_) => OperationType::Workflow,
            Self::SynthesizeSpeech(_) => OperationType::TextToSpeech,
            Self::TranscribeSpeech(_) => OperationType::SpeechToText,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct OperationOutput {
    pub provider_id: String,
    pub data: Value,
    pub task_id: Option<String>,
    pub duration: Option<Duration>,
}

#[async_trait]
pub trait Provider: Send + Sync {
    fn descriptor(&self) -> &ProviderDescriptor;

    /// Liveness probe. Callers treat an error the same as `Ok(false)`.
    async fn check_availability(&self) -> CoreResult<bool>;

    async fn generate_text(&self, _params: GenerationParams) -> CoreResult<OperationOutput> {
        Err(unsupported_operation(self.descriptor(), OperationType::TextGeneration))
    }

    async fn generate_image(&self, _params: GenerationParams) -> CoreResult<OperationOutput> {
        Err(unsupported_operation(self.descriptor(), OperationType::ImageGeneration))
    }

    async fn generate_video(&self, _params: GenerationParams) -> CoreResult<OperationOutput> {
        Err(unsupported_operation(self.descriptor(), OperationType::VideoGeneration))
    }

    async fn run_workflow(&self, _params: GenerationParams) -> CoreResult<OperationOutput> {
        Err(unsupported_operation(self.descriptor(), OperationType::Workflow))
    }

    async fn synthesize_speech(&self, _params: GenerationParams) -> CoreResult<OperationOutput> {
        Err(unsupported_operation(self.descriptor(), OperationType::TextToSpeech))
    }

    async fn transcribe_speech(&self, _params: GenerationParams) -> CoreResult<OperationOutput> {
        Err(unsupported_operation(self.descriptor(), OperationType::SpeechToText))
    }
}

pub fn unsupported_operation(
    descriptor: &ProviderDescriptor,
    operation: OperationType,
) -> CoreError {
    CoreError::new(
        CoreErrorKind::UnsupportedOperation,
        format!("provider '{}' does not support {operation}", descriptor.id),
    )
    .in_service("provider", "execute")
    .with_context("provider_id", &descriptor.id)
}

pub fn ensure_operation_supported(
    descriptor: &ProviderDescriptor,
    operation: OperationType,
) -> CoreResult<()> {
    if descriptor.supports(operation) {
        Ok(())
    } else {
        Err(unsupported_operation(descriptor, operation))
    }
}

pub async fn execute_with_capability_check(
    provider: &dyn Provider,
    request: OperationRequest,
) -> CoreResult<OperationOutput> {
    ensure_operation_supported(provider.descriptor(), request.operation())?;
    match request {
        OperationRequest::GenerateText(params) => provider.generate_text(params).await,
        OperationRequest::GenerateImage(params) => provider.generate_image(params).await,
        OperationRequest::GenerateVideo(params) => provider.generate_video(params).await,
        OperationRequest::RunWorkflow(params) => provider.run_workflow(params).await,
        OperationRequest::SynthesizeSpeech(params) => provider.synthesize_speech(params).await,
        OperationRequest::TranscribeSpeech(params) => provider.transcribe_speech(params).await,
    }
}
