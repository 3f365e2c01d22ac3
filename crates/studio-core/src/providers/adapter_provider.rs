use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::adapters::{AdapterCallRequest, ApiAdapter, HttpTransport, auth_headers};
use crate::models::{CoreResult, ProviderConfig};
use crate::providers::{
    GenerationParams, OperationOutput, OperationType, Provider, ProviderDescriptor,
};

const SERVICE: &str = "adapter_provider";

pub struct AdapterProvider {
    descriptor: ProviderDescriptor,
    config: ProviderConfig,
    adapter: Arc<dyn ApiAdapter>,
    http: HttpTransport,
}

impl AdapterProvider {
    pub fn new(config: ProviderConfig, adapter: Arc<dyn ApiAdapter>, http: HttpTransport) -> Self {
        let descriptor = ProviderDescriptor::new(
            config.id.clone(),
            config.name.clone(),
            [OperationType::for_category(config.category)],
        );
        Self {
            descriptor,
            config,
            adapter,
            http,
        }
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    async fn call(&self, params: GenerationParams) -> CoreResult<OperationOutput> {
        let request = AdapterCallRequest::new(params.model, self.config.category, params.input);
        let response = self
            .adapter
            .call_api(&self.config, &request)
            .await
            .into_result()
            .map_err(|error| {
                error
                    .attribute(SERVICE, "call")
                    .with_context("provider_id", &self.config.id)
            })?;
        Ok(OperationOutput {
            provider_id: self.config.id.clone(),
            data: response.data.unwrap_or_default(),
            task_id: response.task_id,
            duration: response.duration,
        })
    }
}

#[async_trait]
impl Provider for AdapterProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn check_availability(&self) -> CoreResult<bool> {
        let status = self
            .http
            .probe(&self.config.base_url, auth_headers(&self.config))
            .await
            .map_err(|error| error.into_core_error(SERVICE, "check_availability"))?;
        debug!(
            component = "provider",
            provider_id = %self.config.id,
            status,
            "provider answered liveness probe"
        );
        Ok(true)
    }

    async fn generate_text(&self, params: GenerationParams) -> CoreResult<OperationOutput> {
        self.call(params).await
    }

    async fn generate_image(&self, params: GenerationParams) -> CoreResult<OperationOutput> {
        self.call(params).await
    }

    async fn generate_video(&self, params: GenerationParams) -> CoreResult<OperationOutput> {
        self.call(params).await
    }

    async fn run_workflow(&self, params: GenerationParams) -> CoreResult<OperationOutput> {
        self.call(params).await
    }

    async fn synthesize_speech(&self, params: GenerationParams) -> CoreResult<OperationOutput> {
        self.call(params).await
    }

    async fn transcribe_speech(&self, params: GenerationParams) -> CoreResult<OperationOutput> {
        self.call(params).await
    }
}
