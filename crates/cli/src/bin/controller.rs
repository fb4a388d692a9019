//! controller — single-process bring-up of the whole fabric: one dispatcher
//! task per configured agent plus the balancer server, sharing one shutdown
//! signal.
//!
//! Grounded on `original_source/framework/controller/controller_v2.py`'s
//! role as the one process that launches everything, and on the teacher's
//! `crates/llm/src/bin/llm-worker.rs`/`crates/agent/src/bin/agent-worker.rs`
//! for the `clap::Parser` + `tracing-subscriber` + config-load skeleton.

use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use kairos_agent::TERMINAL_SINK;
use kairos_cli::PassthroughAgent;
use kairos_controller::{AgentBinding, Controller};
use kairos_core::{load_dotenv, FabricConfig, WorkflowConfig};
use kairos_tokens::TokenCounter;

#[derive(Parser, Debug)]
#[command(name = "controller", version, about)]
struct Cli {
    /// Path to the workflow TOML (agents, services, backend URLs, routes).
    #[arg(long, env = "KAIROS_WORKFLOW", default_value = "config/workflow.toml")]
    workflow: String,

    /// Path to the token-usage CSV log.
    #[arg(long, env = "KAIROS_TOKEN_LOG", default_value = "data/token_usage.csv")]
    token_log: String,

    /// Balancer `/generate` URL dispatchers should call into.
    #[arg(long, env = "KAIROS_BALANCER_URL", default_value = "http://127.0.0.1:8080/generate")]
    balancer_url: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    kairos_core::init_tracing("info");

    load_dotenv();
    let cli = Cli::parse();

    let config = Arc::new(FabricConfig::from_env());
    config.log_summary();

    let workflow = match WorkflowConfig::from_file(&cli.workflow) {
        Ok(w) => {
            info!(path = %cli.workflow, agents = w.agents.len(), "loaded workflow config");
            w
        }
        Err(e) => {
            warn!(error = %e, path = %cli.workflow, "failed to load workflow config, starting with an empty workflow");
            WorkflowConfig::default()
        }
    };

    let token_counter = Arc::new(TokenCounter::new(workflow.agents_use_model.clone(), cli.token_log.clone()));

    let controller = Controller::new(
        config,
        workflow.llm_urls.clone(),
        workflow.agents_use_model.clone(),
        token_counter,
    );

    let mut handles = Vec::new();
    for agent_name in &workflow.agents {
        let routes_to = workflow
            .routes
            .get(agent_name)
            .cloned()
            .unwrap_or_else(|| vec![TERMINAL_SINK.to_string()]);
        let next_target = routes_to.first().cloned().unwrap_or_else(|| TERMINAL_SINK.to_string());
        let agent = Arc::new(PassthroughAgent::new(agent_name.clone(), next_target));
        let binding = AgentBinding { name: agent_name.clone(), agent, routes_to };
        handles.push(controller.spawn_dispatcher(binding, cli.balancer_url.clone()).await?);
    }

    handles.push(controller.spawn_balancer().await?);

    info!("controller started, awaiting shutdown signal");
    tokio::signal::ctrl_c().await?;

    controller.stop_all(handles).await;
    Ok(())
}
