//! A generic reference `Agent` (spec §1 excludes real business logic —
//! `_run_impl` — from scope). Grounded on the teacher's
//! `crates/agent/src/bin/agent-worker.rs`, whose `AgentWorker::start`
//! stubs unwired execution with a `"not yet wired"` placeholder response;
//! `PassthroughAgent` takes that one step further and actually calls the
//! balancer, forwarding whatever text comes back to a fixed next target.
//! It's what the CLI binaries bind to real agent names when no
//! domain-specific implementation is plugged in.

use async_trait::async_trait;
use kairos_agent::{generate, Agent, AgentError};
use serde_json::{json, Value};

pub struct PassthroughAgent {
    name: String,
    next_target: String,
}

impl PassthroughAgent {
    pub fn new(name: impl Into<String>, next_target: impl Into<String>) -> Self {
        Self { name: name.into(), next_target: next_target.into() }
    }
}

#[async_trait]
impl Agent for PassthroughAgent {
    fn agent_name(&self) -> &str {
        &self.name
    }

    async fn run_impl(
        &self,
        input_data: Value,
        balancer_url: &str,
        metadata: Value,
    ) -> Result<(Value, String), AgentError> {
        let prompt = input_data.get("prompt").and_then(Value::as_str).unwrap_or_default().to_string();

        let client = reqwest::Client::new();
        let result = match generate(&client, &prompt, balancer_url, metadata).await {
            Some(text) => json!({ "prompt": prompt, "text": text }),
            None => json!({ "prompt": prompt, "error": "generation failed" }),
        };

        Ok((result, self.next_target.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_name_is_stable() {
        let agent = PassthroughAgent::new("writer", "__sink__");
        assert_eq!(agent.agent_name(), "writer");
    }
}
