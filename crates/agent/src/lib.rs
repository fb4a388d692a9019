//! Agent base & generate helper (spec §4.I).
//!
//! User agents implement [`Agent`]; the base provides [`generate`] as the
//! one way to call the balancer so every agent gets the same default
//! sampling parameters and non-200 handling.

pub mod error;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, instrument};

pub use error::AgentError;

/// Default sampling parameters for [`generate`], matching the source's
/// module-level constants.
pub const DEFAULT_TEMPERATURE: f64 = 0.0;
pub const DEFAULT_TOP_P: f64 = 1.0;
pub const DEFAULT_TOP_K: i64 = -1;
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Name used for `next_target` when a workflow message has nowhere further
/// to go.
pub const TERMINAL_SINK: &str = "__sink__";

/// A node in the agent graph. `run_impl` is the user's business logic;
/// `run` wraps it with the logging/error contract every agent shares.
///
/// Grounded on `stupid_eisenbahn::traits`'s async-trait-with-blanket-`Arc`
/// idiom, generalized from pub/sub publishing to agent execution.
#[async_trait]
pub trait Agent: Send + Sync {
    fn agent_name(&self) -> &str;

    /// Runs this agent's logic against `input_data`, routed through
    /// `balancer_url`. Returns the result payload and the name of the next
    /// target ([`TERMINAL_SINK`] if this is a terminal node).
    async fn run_impl(
        &self,
        input_data: Value,
        balancer_url: &str,
        metadata: Value,
    ) -> Result<(Value, String), AgentError>;

    /// Runs `run_impl`, logging entry/exit the way every agent in the fleet
    /// does. Errors are logged and propagated rather than the source's
    /// `exit(1)` — a caller (the dispatcher) owns deciding what a failed
    /// agent invocation means for the surrounding workflow.
    #[instrument(skip(self, input_data, metadata), fields(agent = %self.agent_name()))]
    async fn run(
        &self,
        input_data: Value,
        balancer_url: &str,
        metadata: Value,
    ) -> Result<(Value, String), AgentError> {
        info!(balancer_url, "starting run_impl");
        match self.run_impl(input_data, balancer_url, metadata).await {
            Ok((result, next_target)) => {
                info!(next_target = %next_target, "run completed successfully");
                Ok((result, next_target))
            }
            Err(err) => {
                error!(error = %err, "run_impl failed");
                Err(err)
            }
        }
    }
}

#[async_trait]
impl<T: Agent + ?Sized> Agent for Arc<T> {
    fn agent_name(&self) -> &str {
        (**self).agent_name()
    }

    async fn run_impl(
        &self,
        input_data: Value,
        balancer_url: &str,
        metadata: Value,
    ) -> Result<(Value, String), AgentError> {
        (**self).run_impl(input_data, balancer_url, metadata).await
    }
}

#[derive(Debug, Clone, Serialize)]
struct GenerateRequest<'a> {
    prompt: &'a str,
    stream: bool,
    temperature: f64,
    top_p: f64,
    top_k: i64,
    max_tokens: u32,
    metadata: Value,
}

/// Posts a completion request to the balancer and returns the first
/// generated text, or `None` on a non-200 response (logged, not an error —
/// matches the source's "generate degrades to None" behavior).
#[instrument(skip(prompt, metadata), fields(balancer_url))]
pub async fn generate(
    client: &reqwest::Client,
    prompt: &str,
    balancer_url: &str,
    metadata: Value,
) -> Option<String> {
    let body = GenerateRequest {
        prompt,
        stream: false,
        temperature: DEFAULT_TEMPERATURE,
        top_p: DEFAULT_TOP_P,
        top_k: DEFAULT_TOP_K,
        max_tokens: DEFAULT_MAX_TOKENS,
        metadata,
    };

    let response = match client.post(balancer_url).json(&body).send().await {
        Ok(response) => response,
        Err(err) => {
            error!(error = %err, "generate request failed");
            return None;
        }
    };

    if !response.status().is_success() {
        let status = response.status();
        let info = response.text().await.unwrap_or_default();
        error!(%status, %info, "generate returned non-200");
        return None;
    }

    let result: Value = match response.json().await {
        Ok(value) => value,
        Err(err) => {
            error!(error = %err, "failed to parse generate response");
            return None;
        }
    };

    result
        .get("text")
        .and_then(Value::as_array)
        .and_then(|texts| texts.first())
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoAgent;

    #[async_trait]
    impl Agent for EchoAgent {
        fn agent_name(&self) -> &str {
            "echo"
        }

        async fn run_impl(
            &self,
            input_data: Value,
            _balancer_url: &str,
            _metadata: Value,
        ) -> Result<(Value, String), AgentError> {
            Ok((input_data, TERMINAL_SINK.to_string()))
        }
    }

    struct FailingAgent;

    #[async_trait]
    impl Agent for FailingAgent {
        fn agent_name(&self) -> &str {
            "failing"
        }

        async fn run_impl(
            &self,
            _input_data: Value,
            _balancer_url: &str,
            _metadata: Value,
        ) -> Result<(Value, String), AgentError> {
            Err(AgentError::RunFailed("boom".to_string()))
        }
    }

    #[tokio::test]
    async fn run_returns_next_target_on_success() {
        let agent = EchoAgent;
        let (result, next) = agent
            .run(json!({"hello": "world"}), "http://balancer", json!({}))
            .await
            .unwrap();
        assert_eq!(result, json!({"hello": "world"}));
        assert_eq!(next, TERMINAL_SINK);
    }

    #[tokio::test]
    async fn run_propagates_run_impl_errors() {
        let agent = FailingAgent;
        let err = agent
            .run(json!({}), "http://balancer", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::RunFailed(_)));
    }

    #[tokio::test]
    async fn arc_agent_delegates_to_inner() {
        let agent: Arc<dyn Agent> = Arc::new(EchoAgent);
        assert_eq!(agent.agent_name(), "echo");
        let (_, next) = agent.run(json!(null), "http://balancer", json!({})).await.unwrap();
        assert_eq!(next, TERMINAL_SINK);
    }
}
