use std::collections::HashMap;
use std::sync::Arc;

use kairos_core::FabricConfig;
use kairos_tokens::TokenCounter;

use crate::manager::PerceptorManager;
use crate::queue::PriorityQueue;

/// Shared state for the balancer's axum handlers and dispatch loop.
///
/// `llm_urls` mirrors the source's `{model: {serving_type: [url, ...]}}`
/// shape; only the `"normal"` serving type participates in placement here
/// (other serving types, e.g. speculative decoding pools, are out of scope).
pub struct AppState {
    pub config: Arc<FabricConfig>,
    pub llm_urls: HashMap<String, HashMap<String, Vec<String>>>,
    pub agents_use_model: HashMap<String, String>,
    pub token_counter: Arc<TokenCounter>,
    pub perceptor_manager: Arc<PerceptorManager>,
    pub queue: Arc<PriorityQueue>,
    pub client: reqwest::Client,
}

impl AppState {
    pub fn normal_urls_for_agent(&self, agent_name: &str) -> Vec<String> {
        let Some(model) = self.agents_use_model.get(agent_name) else {
            return Vec::new();
        };
        self.llm_urls
            .get(model)
            .and_then(|serving_types| serving_types.get("normal"))
            .cloned()
            .unwrap_or_default()
    }
}
