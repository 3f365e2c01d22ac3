use std::sync::Arc;

use tracing::debug;

use crate::config_store::ProviderConfigStore;
use crate::models::CoreResult;
use crate::providers::{OperationType, Provider};
use crate::registry::ProviderRegistry;

#[derive(Clone)]
pub struct ProviderRouter {
    registry: Arc<ProviderRegistry>,
    store: Arc<dyn ProviderConfigStore>,
}

impl ProviderRouter {
    pub fn new(registry: Arc<ProviderRegistry>, store: Arc<dyn ProviderConfigStore>) -> Self {
        Self { registry, store }
    }

    /// `Ok(None)` means no enabled provider serves `operation`; that is a
    /// configuration gap for the caller to report, not a failure here.
    pub fn route(&self, operation: OperationType) -> CoreResult<Option<Arc<dyn Provider>>> {
        let enabled = self.store.enabled_provider_ids()?;
        let chosen = self
            .registry
            .list_providers_by_operation(operation)?
            .into_iter()
            .find(|provider| enabled.iter().any(|id| *id == provider.descriptor().id));

        debug!(
            component = "provider_router",
            operation = %operation,
            provider_id = chosen.as_ref().map(|provider| provider.descriptor().id.as_str()),
            "route resolved"
        );
        Ok(chosen)
    }

    pub fn route_to(&self, provider_id: &str) -> CoreResult<Option<Arc<dyn Provider>>> {
        let enabled = self
            .store
            .get_provider(provider_id)?
            .is_some_and(|config| config.enabled);
        if !enabled {
            return Ok(None);
        }
        self.registry.get(provider_id)
    }
}
