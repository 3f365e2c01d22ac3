use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;

use crate::models::CoreResult;
use crate::polling::{
    PollOptions, RetryOptions, StatusReport, SubmitOutcome, execute_with_polling_and_retry,
};
use crate::providers::{
    GenerationParams, OperationOutput, OperationType, Provider, ProviderDescriptor,
    ensure_operation_supported,
};

#[async_trait]
pub trait JobSource: Send + Sync {
    fn descriptor(&self) -> &ProviderDescriptor;

    async fn check_availability(&self) -> CoreResult<bool>;

    async fn submit(
        &self,
        operation: OperationType,
        params: &GenerationParams,
    ) -> CoreResult<SubmitOutcome<Value>>;

    async fn check_status(&self, job_id: &str) -> CoreResult<StatusReport<Value>>;
}

pub struct PolledProvider<S: JobSource> {
    source: S,
    poll_options: PollOptions,
    retry_options: RetryOptions,
}

impl<S: JobSource> PolledProvider<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            poll_options: PollOptions::default(),
            retry_options: RetryOptions::default(),
        }
    }

    pub fn with_poll_options(mut self, poll_options: PollOptions) -> Self {
        self.poll_options = poll_options;
        self
    }

    pub fn with_retry_options(mut self, retry_options: RetryOptions) -> Self {
        self.retry_options = retry_options;
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    async fn run(
        &self,
        operation: OperationType,
        params: GenerationParams,
    ) -> CoreResult<OperationOutput> {
        ensure_operation_supported(self.source.descriptor(), operation)?;
        let started = Instant::now();
        let source = &self.source;
        let params = &params;

        let data = execute_with_polling_and_retry(
            move || source.submit(operation, params),
            move |job_id: String| async move { source.check_status(&job_id).await },
            &self.poll_options,
            &self.retry_options,
        )
        .await?;

        Ok(OperationOutput {
            provider_id: source.descriptor().id.clone(),
            data,
            task_id: None,
            duration: Some(started.elapsed()),
        })
    }
}

#[async_trait]
impl<S: JobSource> Provider for PolledProvider<S> {
    fn descriptor(&self) -> &ProviderDescriptor {
        self.source.descriptor()
    }

    async fn check_availability(&self) -> CoreResult<bool> {
        self.source.check_availability().await
    }

    async fn generate_text(&self, params: GenerationParams) -> CoreResult<OperationOutput> {
        self.run(OperationType::TextGeneration, params).await
    }

    async fn generate_image(&self, params: GenerationParams) -> CoreResult<OperationOutput> {
        self.run(OperationType::ImageGeneration, params).await
    }

    async fn generate_video(&self, params: GenerationParams) -> CoreResult<OperationOutput> {
        self.run(OperationType::VideoGeneration, params).await
    }

    async fn run_workflow(&self, params: GenerationParams) -> CoreResult<OperationOutput> {
        self.run(OperationType::Workflow, params).await
    }

    async fn synthesize_speech(&self, params: GenerationParams) -> CoreResult<OperationOutput> {
        self.run(OperationType::TextToSpeech, params).await
    }

    async fn transcribe_speech(&self, params: GenerationParams) -> CoreResult<OperationOutput> {
        self.run(OperationType::SpeechToText, params).await
    }
}
