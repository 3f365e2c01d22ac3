use std::sync::Arc;

use reqwest::Client;
use tracing::info;

use crate::adapters::{AdapterSet, HttpTransport};
use crate::config::CoreConfig;
use crate::config_store::{ProviderConfigStore, ProviderFilter};
use crate::hub::ProviderHub;
use crate::model_router::ModelRouter;
use crate::models::{CoreError, CoreErrorKind, CoreResult};
use crate::orchestration::{PluginHost, TaskScheduler, WorkflowRunner};
use crate::polling::{PollOptions, RetryOptions};
use crate::providers::{AdapterProvider, JobSource, PolledProvider, Provider};
use crate::registry::ProviderRegistry;

pub struct StudioContext {
    config: CoreConfig,
    store: Arc<dyn ProviderConfigStore>,
    http: HttpTransport,
    model_router: ModelRouter,
    registry: Arc<ProviderRegistry>,
    hub: ProviderHub,
    scheduler: TaskScheduler,
}

pub struct StudioContextBuilder {
    config: CoreConfig,
    store: Arc<dyn ProviderConfigStore>,
    client: Option<Client>,
    workflow_runner: Option<Arc<dyn WorkflowRunner>>,
    plugin_host: Option<Arc<dyn PluginHost>>,
}

impl StudioContext {
    pub fn builder(
        config: CoreConfig,
        store: Arc<dyn ProviderConfigStore>,
    ) -> StudioContextBuilder {
        StudioContextBuilder {
            config,
            store,
            client: None,
            workflow_runner: None,
            plugin_host: None,
        }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ProviderConfigStore> {
        &self.store
    }

    pub fn http(&self) -> &HttpTransport {
        &self.http
    }

    pub fn adapters(&self) -> &AdapterSet {
        self.model_router.adapters()
    }

    pub fn model_router(&self) -> &ModelRouter {
        &self.model_router
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn hub(&self) -> &ProviderHub {
        &self.hub
    }

    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    pub fn poll_options(&self) -> PollOptions {
        PollOptions::from(&self.config.polling)
    }

    pub fn retry_options(&self) -> RetryOptions {
        RetryOptions::from(&self.config.retry)
    }

    pub fn polled_provider<S: JobSource>(&self, source: S) -> PolledProvider<S> {
        PolledProvider::new(source)
            .with_poll_options(self.poll_options())
            .with_retry_options(self.retry_options())
    }

    // Safe to call again after the store changes; known ids are replaced.
    pub fn register_configured_providers(&self) -> CoreResult<usize> {
        let providers = self
            .store
            .list_providers(&ProviderFilter::enabled())?
            .into_iter()
            .map(|config| {
                let adapter = self.adapters().get(config.api_format)?;
                let provider = AdapterProvider::new(config, adapter, self.http.clone());
                Ok(Arc::new(provider) as Arc<dyn Provider>)
            })
            .collect::<CoreResult<Vec<_>>>()?;
        self.registry.register_batch(providers)
    }
}

impl StudioContextBuilder {
    pub fn http_client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    pub fn workflow_runner(mut self, runner: Arc<dyn WorkflowRunner>) -> Self {
        self.workflow_runner = Some(runner);
        self
    }

    pub fn plugin_host(mut self, host: Arc<dyn PluginHost>) -> Self {
        self.plugin_host = Some(host);
        self
    }

    pub fn build(self) -> CoreResult<StudioContext> {
        let client = match self.client {
            Some(client) => client,
            None => Client::builder()
                .user_agent(self.config.http.user_agent.clone())
                .build()
                .map_err(|error| {
                    CoreError::new(
                        CoreErrorKind::Internal,
                        format!("failed to build HTTP client: {error}"),
                    )
                    .in_service("studio_context", "build")
                })?,
        };
        let http = HttpTransport::new(client, self.config.http.timeout());
        let adapters = AdapterSet::standard(http.clone(), &self.config)?;
        let model_router = ModelRouter::new(Arc::clone(&self.store), adapters);

        let registry = Arc::new(ProviderRegistry::new());
        let hub = ProviderHub::new(Arc::clone(&registry), Arc::clone(&self.store));

        let mut scheduler = TaskScheduler::new(model_router.clone())
            .with_cancellation_mode(self.config.scheduler.cancellation);
        if let Some(runner) = self.workflow_runner {
            scheduler = scheduler.with_workflow_runner(runner);
        }
        if let Some(host) = self.plugin_host {
            scheduler = scheduler.with_plugin_host(host);
        }

        let context = StudioContext {
            config: self.config,
            store: self.store,
            http,
            model_router,
            registry,
            hub,
            scheduler,
        };
        let registered = context.register_configured_providers()?;
        info!(
            component = "studio_context",
            registered_providers = registered,
            adapters = context.adapters().len(),
            "studio context ready"
        );
        Ok(context)
    }
}
