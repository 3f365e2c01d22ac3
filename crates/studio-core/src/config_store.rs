use std::sync::RwLock;

use crate::models::{
    ApiFormat, CoreError, CoreErrorKind, CoreResult, ProviderCategory, ProviderConfig,
    ProviderHealth,
};

const SERVICE: &str = "provider_config_store";

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ProviderFilter {
    pub category: Option<ProviderCategory>,
    pub enabled: Option<bool>,
    pub api_format: Option<ApiFormat>,
}

impl ProviderFilter {
    pub fn enabled() -> Self {
        Self {
            enabled: Some(true),
            ..Self::default()
        }
    }

    pub fn category(mut self, category: ProviderCategory) -> Self {
        self.category = Some(category);
        self
    }

    pub fn api_format(mut self, api_format: ApiFormat) -> Self {
        self.api_format = Some(api_format);
        self
    }

    pub fn matches(&self, provider: &ProviderConfig) -> bool {
        self.category.is_none_or(|category| provider.category == category)
            && self.enabled.is_none_or(|enabled| provider.enabled == enabled)
            && self.api_format.is_none_or(|format| provider.api_format == format)
    }
}

/// Results keep configuration order; routing tie-breaks depend on it.
pub trait ProviderConfigStore: Send + Sync {
    fn list_providers(&self, filter: &ProviderFilter) -> CoreResult<Vec<ProviderConfig>>;

    fn get_provider(&self, provider_id: &str) -> CoreResult<Option<ProviderConfig>>;

    fn enabled_provider_ids(&self) -> CoreResult<Vec<String>> {
        Ok(self
            .list_providers(&ProviderFilter::enabled())?
            .into_iter()
            .map(|provider| provider.id)
            .collect())
    }

    /// Caches the last probe outcome. Stores that keep no health return `Ok(false)`.
    fn record_health(
        &self,
        _provider_id: &str,
        _status: ProviderHealth,
        _latency_ms: Option<u64>,
    ) -> CoreResult<bool> {
        Ok(false)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryProviderStore {
    providers: RwLock<Vec<ProviderConfig>>,
}

impl InMemoryProviderStore {
    pub fn new(providers: impl IntoIterator<Item = ProviderConfig>) -> Self {
        let store = Self::default();
        if let Ok(mut slots) = store.providers.write() {
            for provider in providers {
                upsert_into(&mut slots, provider);
            }
        }
        store
    }

    pub fn from_json_str(raw: &str) -> CoreResult<Self> {
        let providers: Vec<ProviderConfig> = serde_json::from_str(raw).map_err(|error| {
            CoreError::new(
                CoreErrorKind::InvalidInput,
                format!("invalid provider configuration: {error}"),
            )
            .in_service(SERVICE, "from_json_str")
        })?;
        Ok(Self::new(providers))
    }

    pub fn upsert(&self, provider: ProviderConfig) -> CoreResult<()> {
        let mut providers = self
            .providers
            .write()
            .map_err(|_| CoreError::poisoned("provider store"))?;
        upsert_into(&mut providers, provider);
        Ok(())
    }

    pub fn remove(&self, provider_id: &str) -> CoreResult<Option<ProviderConfig>> {
        let mut providers = self
            .providers
            .write()
            .map_err(|_| CoreError::poisoned("provider store"))?;
        Ok(providers
            .iter()
            .position(|provider| provider.id == provider_id)
            .map(|index| providers.remove(index)))
    }
}

fn upsert_into(providers: &mut Vec<ProviderConfig>, provider: ProviderConfig) {
    match providers.iter_mut().find(|existing| existing.id == provider.id) {
        Some(existing) => *existing = provider,
        None => providers.push(provider),
    }
}

impl ProviderConfigStore for InMemoryProviderStore {
    fn list_providers(&self, filter: &ProviderFilter) -> CoreResult<Vec<ProviderConfig>> {
        let providers = self
            .providers
            .read()
            .map_err(|_| CoreError::poisoned("provider store"))?;
        Ok(providers
            .iter()
            .filter(|provider| filter.matches(provider))
            .cloned()
            .collect())
    }

    fn get_provider(&self, provider_id: &str) -> CoreResult<Option<ProviderConfig>> {
        let providers = self
            .providers
            .read()
            .map_err(|_| CoreError::poisoned("provider store"))?;
        Ok(providers.iter().find(|provider| provider.id == provider_id).cloned())
    }

    fn record_health(
        &self,
        provider_id: &str,
        status: ProviderHealth,
        latency_ms: Option<u64>,
    ) -> CoreResult<bool> {
        let mut providers = self
            .providers
            .write()
            .map_err(|_| CoreError::poisoned("provider store"))?;
        let Some(provider) = providers.iter_mut().find(|provider| provider.id == provider_id) else {
            return Ok(false);
        };
        provider.status = status;
        provider.latency_ms = latency_ms;
        Ok(true)
    }
}
