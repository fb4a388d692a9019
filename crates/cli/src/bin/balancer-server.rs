//! balancer-server — standalone balancer process (spec §4.G), for
//! deployments that run the balancer on its own host separately from the
//! dispatcher fleet. Grounded on the teacher's `crates/llm/src/bin/llm-worker.rs`
//! config-load + `tracing-subscriber` skeleton; the balancer itself is
//! `kairos_controller::Controller::spawn_balancer`, reused rather than
//! duplicated.

use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use kairos_controller::Controller;
use kairos_core::{load_dotenv, FabricConfig, WorkflowConfig};
use kairos_tokens::TokenCounter;

#[derive(Parser, Debug)]
#[command(name = "balancer-server", version, about)]
struct Cli {
    /// Path to the workflow TOML (backend URLs, agent->model map).
    #[arg(long, env = "KAIROS_WORKFLOW", default_value = "config/workflow.toml")]
    workflow: String,

    /// Path to the token-usage CSV log.
    #[arg(long, env = "KAIROS_TOKEN_LOG", default_value = "data/token_usage.csv")]
    token_log: String,
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
            info!(path = %cli.workflow, "loaded workflow config");
            w
        }
        Err(e) => {
            warn!(error = %e, path = %cli.workflow, "failed to load workflow config, starting with an empty workflow");
            WorkflowConfig::default()
        }
    };

    let token_counter = Arc::new(TokenCounter::new(workflow.agents_use_model.clone(), cli.token_log.clone()));
    let controller = Controller::new(config, workflow.llm_urls, workflow.agents_use_model, token_counter);

    let handle = controller.spawn_balancer().await?;

    info!("balancer-server started, awaiting shutdown signal");
    tokio::signal::ctrl_c().await?;

    controller.stop_all(vec![handle]).await;
    Ok(())
}
