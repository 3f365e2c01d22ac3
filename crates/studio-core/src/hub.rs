use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tracing::{info, warn};

use crate::config_store::ProviderConfigStore;
use crate::models::{CoreError, CoreErrorKind, CoreResult, ProviderHealth};
use crate::providers::{
    GenerationParams, OperationOutput, OperationRequest, OperationType, Provider,
    ProviderDescriptor, execute_with_capability_check,
};
use crate::registry::ProviderRegistry;
use crate::router::ProviderRouter;

const SERVICE: &str = "provider_hub";

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HealthReport {
    pub provider_id: String,
    pub available: bool,
    pub latency: Duration,
}

#[derive(Clone)]
pub struct ProviderHub {
    registry: Arc<ProviderRegistry>,
    router: ProviderRouter,
    store: Arc<dyn ProviderConfigStore>,
}

impl ProviderHub {
    pub fn new(registry: Arc<ProviderRegistry>, store: Arc<dyn ProviderConfigStore>) -> Self {
        let router = ProviderRouter::new(Arc::clone(&registry), Arc::clone(&store));
        Self {
            registry,
            router,
            store,
        }
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn router(&self) -> &ProviderRouter {
        &self.router
    }

    pub async fn execute(
        &self,
        operation: OperationType,
        params: GenerationParams,
    ) -> CoreResult<OperationOutput> {
        let provider = self.router.route(operation)?.ok_or_else(|| {
            CoreError::new(
                CoreErrorKind::NoProvider,
                format!("no enabled provider supports {operation}"),
            )
            .in_service(SERVICE, "execute")
            .with_context("operation", operation)
        })?;
        self.dispatch(provider, OperationRequest::new(operation, params)).await
    }

    pub async fn execute_on(
        &self,
        provider_id: &str,
        request: OperationRequest,
    ) -> CoreResult<OperationOutput> {
        let provider = self.router.route_to(provider_id)?.ok_or_else(|| {
            CoreError::new(
                CoreErrorKind::NoProvider,
                format!("provider '{provider_id}' is not registered or not enabled"),
            )
            .in_service(SERVICE, "execute_on")
            .with_context("provider_id", provider_id)
        })?;
        self.dispatch(provider, request).await
    }

    async fn dispatch(
        &self,
        provider: Arc<dyn Provider>,
        request: OperationRequest,
    ) -> CoreResult<OperationOutput> {
        let operation = request.operation();
        let provider_id = provider.descriptor().id.clone();
        info!(
            component = "provider_hub",
            provider_id = %provider_id,
            operation = %operation,
            "dispatching operation"
        );
        execute_with_capability_check(provider.as_ref(), request)
            .await
            .map_err(|error| {
                warn!(
                    component = "provider_hub",
                    provider_id = %provider_id,
                    operation = %operation,
                    error = %error,
                    "operation failed"
                );
                error
                    .attribute(SERVICE, "execute")
                    .with_context("provider_id", &provider_id)
            })
    }

    pub async fn health_check(&self, provider_id: &str) -> HealthReport {
        let started = Instant::now();
        let available = self.registry.check_provider_availability(provider_id).await;
        let latency = started.elapsed();

        let status = if available {
            ProviderHealth::Online
        } else {
            ProviderHealth::Offline
        };
        let latency_ms = available.then(|| latency.as_millis() as u64);
        if let Err(error) = self.store.record_health(provider_id, status, latency_ms) {
            warn!(
                component = "provider_hub",
                provider_id,
                error = %error,
                "could not cache health"
            );
        }

        HealthReport {
            provider_id: provider_id.to_string(),
            available,
            latency,
        }
    }

    /// Probes every registered provider concurrently, in registration order.
    pub async fn batch_health_check(&self) -> CoreResult<Vec<HealthReport>> {
        let ids: Vec<String> = self
            .registry
            .list()?
            .into_iter()
            .map(|descriptor| descriptor.id)
            .collect();
        Ok(join_all(ids.iter().map(|id| self.health_check(id))).await)
    }

    pub fn register(&self, provider: Arc<dyn Provider>) -> CoreResult<()> {
        self.registry.register(provider)
    }

    pub fn register_batch(
        &self,
        providers: impl IntoIterator<Item = Arc<dyn Provider>>,
    ) -> CoreResult<usize> {
        self.registry.register_batch(providers)
    }

    pub fn unregister(&self, provider_id: &str) -> CoreResult<Option<Arc<dyn Provider>>> {
        self.registry.unregister(provider_id)
    }

    pub fn list_providers(&self) -> CoreResult<Vec<ProviderDescriptor>> {
        self.registry.list()
    }

    pub fn list_providers_by_operation(
        &self,
        operation: OperationType,
    ) -> CoreResult<Vec<ProviderDescriptor>> {
        Ok(self
            .registry
            .list_providers_by_operation(operation)?
            .iter()
            .map(|provider| provider.descriptor().clone())
            .collect())
    }
}
