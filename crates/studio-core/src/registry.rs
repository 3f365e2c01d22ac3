use std::sync::{Arc, RwLock};

use tracing::{debug, info, warn};

use crate::models::{CoreError, CoreResult};
use crate::providers::{OperationType, Provider, ProviderDescriptor};

#[derive(Default)]
pub struct ProviderRegistry {
    providers: RwLock<Vec<Arc<dyn Provider>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-registering an id replaces the earlier instance in its original slot.
    pub fn register(&self, provider: Arc<dyn Provider>) -> CoreResult<()> {
        let mut providers = self.write()?;
        let provider_id = provider.descriptor().id.clone();
        match providers
            .iter_mut()
            .find(|existing| existing.descriptor().id == provider_id)
        {
            Some(existing) => {
                warn!(
                    component = "provider_registry",
                    provider_id = %provider_id,
                    "provider already registered; replacing it"
                );
                *existing = provider;
            }
            None => {
                info!(
                    component = "provider_registry",
                    provider_id = %provider_id,
                    operations = ?provider.descriptor().operations,
                    "provider registered"
                );
                providers.push(provider);
            }
        }
        Ok(())
    }

    pub fn register_batch(
        &self,
        providers: impl IntoIterator<Item = Arc<dyn Provider>>,
    ) -> CoreResult<usize> {
        let mut registered = 0;
        for provider in providers {
            self.register(provider)?;
            registered += 1;
        }
        Ok(registered)
    }

    pub fn unregister(&self, provider_id: &str) -> CoreResult<Option<Arc<dyn Provider>>> {
        let mut providers = self.write()?;
        let removed = providers
            .iter()
            .position(|provider| provider.descriptor().id == provider_id)
            .map(|index| providers.remove(index));
        if removed.is_some() {
            info!(component = "provider_registry", provider_id, "provider unregistered");
        }
        Ok(removed)
    }

    pub fn get(&self, provider_id: &str) -> CoreResult<Option<Arc<dyn Provider>>> {
        Ok(self
            .read()?
            .iter()
            .find(|provider| provider.descriptor().id == provider_id)
            .cloned())
    }

    pub fn contains(&self, provider_id: &str) -> CoreResult<bool> {
        Ok(self.get(provider_id)?.is_some())
    }

    pub fn list(&self) -> CoreResult<Vec<ProviderDescriptor>> {
        Ok(self
            .read()?
            .iter()
            .map(|provider| provider.descriptor().clone())
            .collect())
    }

    pub fn list_providers_by_operation(
        &self,
        operation: OperationType,
    ) -> CoreResult<Vec<Arc<dyn Provider>>> {
        Ok(self
            .read()?
            .iter()
            .filter(|provider| provider.descriptor().supports(operation))
            .cloned()
            .collect())
    }

    pub fn len(&self) -> CoreResult<usize> {
        Ok(self.read()?.len())
    }

    pub fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.read()?.is_empty())
    }

    /// Never fails: unknown ids, probe errors and poisoned state all read as `false`.
    pub async fn check_provider_availability(&self, provider_id: &str) -> bool {
        let provider = match self.get(provider_id) {
            Ok(Some(provider)) => provider,
            Ok(None) => {
                debug!(
                    component = "provider_registry",
                    provider_id,
                    "availability check for unknown provider"
                );
                return false;
            }
            Err(error) => {
                warn!(
                    component = "provider_registry",
                    provider_id,
                    error = %error,
                    "registry unavailable"
                );
                return false;
            }
        };
        match provider.check_availability().await {
            Ok(available) => available,
            Err(error) => {
                warn!(
                    component = "provider_registry",
                    provider_id,
                    error = %error,
                    "provider liveness probe failed"
                );
                false
            }
        }
    }

    fn read(&self) -> CoreResult<std::sync::RwLockReadGuard<'_, Vec<Arc<dyn Provider>>>> {
        self.providers
            .read()
            .map_err(|_| CoreError::poisoned("provider registry"))
    }

    fn write(&self) -> CoreResult<std::sync::RwLockWriteGuard<'_, Vec<Arc<dyn Provider>>>> {
        self.providers
            .write()
            .map_err(|_| CoreError::poisoned("provider registry"))
    }
}
