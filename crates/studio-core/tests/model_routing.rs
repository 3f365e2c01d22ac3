use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use studio_core::adapters::{
    AdapterCallRequest, AdapterCallResponse, AdapterInput, AdapterSet, ApiAdapter,
};
use studio_core::config_store::InMemoryProviderStore;
use studio_core::model_router::{ModelCall, ModelRouter};
use studio_core::models::{ApiFormat, CoreErrorKind, ProviderCategory, ProviderConfig};

struct RecordingAdapter {
    format: ApiFormat,
    calls: Mutex<Vec<String>>,
    succeed: bool,
}

impl RecordingAdapter {
    fn new(format: ApiFormat) -> Arc<Self> {
        Arc::new(Self {
            format,
            calls: Mutex::new(Vec::new()),
            succeed: true,
        })
    }

    fn called(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ApiAdapter for RecordingAdapter {
    fn supported_format(&self) -> ApiFormat {
        self.format
    }

    async fn call_api(
        &self,
        provider: &ProviderConfig,
        request: &AdapterCallRequest,
    ) -> AdapterCallResponse {
        self.calls.lock().unwrap().push(provider.id.clone());
        if self.succeed {
            AdapterCallResponse::ok(json!({"model": request.model}), Duration::from_millis(1))
        } else {
            AdapterCallResponse::failure("HTTP 429: slow down", Duration::from_millis(1))
        }
    }
}

fn llm(id: &str, models: &[&str]) -> ProviderConfig {
    let mut provider = ProviderConfig::new(
        id,
        ProviderCategory::Llm,
        "https://x.test",
        ApiFormat::OpenaiCompatible,
    );
    provider.selected_models = models.iter().map(|model| model.to_string()).collect();
    provider
}

fn model_router(providers: Vec<ProviderConfig>, adapter: Arc<RecordingAdapter>) -> ModelRouter {
    let adapters = AdapterSet::new([adapter as Arc<dyn ApiAdapter>]).unwrap();
    ModelRouter::new(Arc::new(InMemoryProviderStore::new(providers)), adapters)
}

fn chat(model: &str) -> ModelCall {
    ModelCall::new(model, ProviderCategory::Llm, AdapterInput::from_prompt("hello"))
}

#[tokio::test]
async fn recommended_provider_wins_over_higher_priority() {
    let mut a = llm("a", &["gpt-4o"]);
    a.template_recommended = true;
    a.priority = Some(1);
    let mut b = llm("b", &["gpt-4o"]);
    b.priority = Some(100);

    let adapter = RecordingAdapter::new(ApiFormat::OpenaiCompatible);
    let router = model_router(vec![b, a], adapter.clone());

    let response = router.call_model(chat("gpt-4o")).await.unwrap();
    assert!(response.success);
    assert_eq!(adapter.called(), ["a"]);
}

#[tokio::test]
async fn priority_then_configuration_order_break_ties() {
    let mut low = llm("low", &["gpt-4o"]);
    low.priority = Some(1);
    let first = llm("first", &["gpt-4o"]);
    let mut high = llm("high", &["gpt-4o"]);
    high.priority = Some(5);

    let adapter = RecordingAdapter::new(ApiFormat::OpenaiCompatible);
    let router = model_router(vec![low.clone(), first.clone(), high.clone()], adapter.clone());
    let (chosen, _) = router.resolve(&chat("gpt-4o")).unwrap();
    assert_eq!(chosen.id, "high");

    high.enabled = false;
    let router = model_router(vec![first, low, high], adapter);
    let (chosen, _) = router.resolve(&chat("gpt-4o")).unwrap();
    assert_eq!(chosen.id, "low");
}

#[tokio::test]
async fn unknown_model_reports_no_provider() {
    let mut image = llm("image", &["flux"]);
    image.category = ProviderCategory::ImageGeneration;
    let adapter = RecordingAdapter::new(ApiFormat::OpenaiCompatible);
    let router = model_router(vec![llm("chat", &["gpt-4o"]), image], adapter.clone());

    let error = router.call_model(chat("flux")).await.unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::NoProvider);
    assert_eq!(error.message, "no provider for model 'flux' in category 'llm'");
    assert!(adapter.called().is_empty());
}

#[tokio::test]
async fn explicit_provider_must_exist_and_be_enabled() {
    let mut disabled = llm("disabled", &["gpt-4o"]);
    disabled.enabled = false;
    let adapter = RecordingAdapter::new(ApiFormat::OpenaiCompatible);
    let providers = vec![llm("chat", &["gpt-4o"]), disabled, llm("other", &[])];
    let router = model_router(providers, adapter.clone());

    let error = router
        .call_model(chat("gpt-4o").on_provider("disabled"))
        .await
        .unwrap_err();
    assert_eq!(error.code(), "NO_PROVIDER");
    assert!(error.message.contains("disabled"));

    let error = router
        .call_model(chat("gpt-4o").on_provider("missing"))
        .await
        .unwrap_err();
    assert!(error.message.contains("not configured"));

    router
        .call_model(chat("gpt-4o").on_provider("other"))
        .await
        .unwrap();
    assert_eq!(adapter.called(), ["other"]);
}

#[tokio::test]
async fn provider_without_matching_adapter_is_unsupported_format() {
    let mut graph = llm("graph", &["sdxl"]);
    graph.api_format = ApiFormat::WorkflowGraph;
    let adapter = RecordingAdapter::new(ApiFormat::OpenaiCompatible);
    let router = model_router(vec![graph], adapter.clone());

    let error = router.call_model(chat("sdxl")).await.unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::UnsupportedFormat);
    assert_eq!(error.context.get("provider_id").map(String::as_str), Some("graph"));
    assert!(adapter.called().is_empty());
}

#[tokio::test]
async fn backend_failures_come_back_as_responses() {
    let adapter = Arc::new(RecordingAdapter {
        format: ApiFormat::OpenaiCompatible,
        calls: Mutex::new(Vec::new()),
        succeed: false,
    });
    let router = model_router(vec![llm("chat", &["gpt-4o"])], adapter);

    let response = router.call_model(chat("gpt-4o")).await.unwrap();
    assert!(!response.success);
    assert_eq!(response.error.as_deref(), Some("HTTP 429: slow down"));
    assert_eq!(response.into_result().unwrap_err().kind, CoreErrorKind::ApiCall);
}

#[test]
fn duplicate_adapters_are_rejected() {
    let error = AdapterSet::new([
        RecordingAdapter::new(ApiFormat::AsyncPolling) as Arc<dyn ApiAdapter>,
        RecordingAdapter::new(ApiFormat::AsyncPolling) as Arc<dyn ApiAdapter>,
    ])
    .err()
    .unwrap();
    assert_eq!(error.kind, CoreErrorKind::InvalidInput);
}
