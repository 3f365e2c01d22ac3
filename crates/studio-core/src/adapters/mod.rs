pub mod async_polling;
pub mod contract;
pub mod http;
pub mod openai_compatible;
pub mod workflow_graph;

use std::sync::Arc;

pub use async_polling::{AsyncJobResult, AsyncPollingAdapter};
pub use contract::{
    AdapterCallRequest, AdapterCallResponse, AdapterInput, AdapterSet, ApiAdapter, ChatMessage,
};
pub use http::{HttpCallError, HttpTransport, auth_headers};
pub use openai_compatible::OpenAiCompatibleAdapter;
pub use workflow_graph::{GraphOutput, WorkflowGraphAdapter};

use crate::config::CoreConfig;
use crate::models::CoreResult;

impl AdapterSet {
    pub fn standard(http: HttpTransport, config: &CoreConfig) -> CoreResult<Self> {
        let async_adapter = &config.async_adapter;
        let workflow_adapter = &config.workflow_adapter;
        Self::new([
            Arc::new(OpenAiCompatibleAdapter::new(http.clone())) as Arc<dyn ApiAdapter>,
            Arc::new(
                AsyncPollingAdapter::new(http.clone())
                    .with_timing(async_adapter.poll_interval(), async_adapter.max_attempts),
            ),
            Arc::new(
                WorkflowGraphAdapter::new(http)
                    .with_timing(workflow_adapter.poll_interval(), workflow_adapter.max_attempts),
            ),
        ])
    }
}
