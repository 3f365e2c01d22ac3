use std::sync::Arc;

use tracing::{debug, info};

use crate::adapters::{
    AdapterCallRequest, AdapterCallResponse, AdapterInput, AdapterSet, ApiAdapter,
};
use crate::config_store::{ProviderConfigStore, ProviderFilter};
use crate::models::{CoreError, CoreErrorKind, CoreResult, ProviderCategory, ProviderConfig};

const SERVICE: &str = "model_router";

#[derive(Clone, Debug, PartialEq)]
pub struct ModelCall {
    pub model: String,
    pub category: ProviderCategory,
    pub provider_id: Option<String>,
    pub input: AdapterInput,
}

impl ModelCall {
    pub fn new(model: impl Into<String>, category: ProviderCategory, input: AdapterInput) -> Self {
        Self {
            model: model.into(),
            category,
            provider_id: None,
            input,
        }
    }

    pub fn on_provider(mut self, provider_id: impl Into<String>) -> Self {
        self.provider_id = Some(provider_id.into());
        self
    }
}

#[derive(Clone)]
pub struct ModelRouter {
    store: Arc<dyn ProviderConfigStore>,
    adapters: AdapterSet,
}

impl ModelRouter {
    pub fn new(store: Arc<dyn ProviderConfigStore>, adapters: AdapterSet) -> Self {
        Self { store, adapters }
    }

    pub fn adapters(&self) -> &AdapterSet {
        &self.adapters
    }

    pub fn resolve(&self, call: &ModelCall) -> CoreResult<(ProviderConfig, Arc<dyn ApiAdapter>)> {
        let provider = match call.provider_id.as_deref() {
            Some(provider_id) => self.explicit_provider(provider_id)?,
            None => self.select_provider(&call.model, call.category)?,
        };
        let adapter = self.adapters.get(provider.api_format).map_err(|error| {
            error
                .in_service(SERVICE, "resolve")
                .with_context("provider_id", &provider.id)
        })?;
        debug!(
            component = "model_router",
            provider_id = %provider.id,
            model = %call.model,
            format = %provider.api_format,
            "model call resolved"
        );
        Ok((provider, adapter))
    }

    /// Configuration problems surface as errors; a backend failure comes back as an
    /// unsuccessful response.
    pub async fn call_model(&self, call: ModelCall) -> CoreResult<AdapterCallResponse> {
        let (provider, adapter) = self.resolve(&call)?;
        let request = AdapterCallRequest::new(call.model, call.category, call.input);
        let response = adapter.call_api(&provider, &request).await;
        info!(
            component = "model_router",
            provider_id = %provider.id,
            model = %request.model,
            success = response.success,
            duration_ms = response.duration.map(|duration| duration.as_millis() as u64),
            "model call finished"
        );
        Ok(response)
    }

    fn explicit_provider(&self, provider_id: &str) -> CoreResult<ProviderConfig> {
        match self.store.get_provider(provider_id)? {
            Some(provider) if provider.enabled => Ok(provider),
            Some(_) => Err(CoreError::new(
                CoreErrorKind::NoProvider,
                format!("provider '{provider_id}' is disabled"),
            )
            .in_service(SERVICE, "resolve")
            .with_context("provider_id", provider_id)),
            None => Err(CoreError::new(
                CoreErrorKind::NoProvider,
                format!("provider '{provider_id}' is not configured"),
            )
            .in_service(SERVICE, "resolve")
            .with_context("provider_id", provider_id)),
        }
    }

    fn select_provider(
        &self,
        model: &str,
        category: ProviderCategory,
    ) -> CoreResult<ProviderConfig> {
        let candidates: Vec<ProviderConfig> = self
            .store
            .list_providers(&ProviderFilter::enabled().category(category))?
            .into_iter()
            .filter(|provider| provider.offers_model(model))
            .collect();

        rank_candidates(candidates).into_iter().next().ok_or_else(|| {
            CoreError::new(
                CoreErrorKind::NoProvider,
                format!("no provider for model '{model}' in category '{category}'"),
            )
            .in_service(SERVICE, "resolve")
            .with_context("model", model)
            .with_context("category", category)
        })
    }
}

/// Recommended providers first, then higher priority. The sort is stable, so
/// configuration order breaks the remaining ties.
pub fn rank_candidates(mut candidates: Vec<ProviderConfig>) -> Vec<ProviderConfig> {
    candidates.sort_by(|left, right| {
        right
            .template_recommended
            .cmp(&left.template_recommended)
            .then_with(|| right.priority.unwrap_or(0).cmp(&left.priority.unwrap_or(0)))
    });
    candidates
}
