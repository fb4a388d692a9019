//! frontend-replay — replays a CSV arrival trace into the fabric's entry
//! agent and persists completed messages (spec §4.M). Grounded on
//! `original_source/framework/frontend/frontend.py::Frontend::start_generate`.

use std::collections::HashMap;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::Notify;
use tracing::info;

use kairos_core::{load_dotenv, FabricConfig, WorkflowConfig};
use kairos_frontend::{Frontend, RequestGenerator, StaticDatasetOracle};
use kairos_transport::{MessageHandler, Transport, ZmqPublisher, ZmqSubscriber};

#[derive(Parser, Debug)]
#[command(name = "frontend-replay", version, about)]
struct Cli {
    /// Path to the workflow TOML. Must define exactly one service.
    #[arg(long, env = "KAIROS_WORKFLOW", default_value = "config/workflow.toml")]
    workflow: String,

    /// Path to the arrival-interval trace CSV (must have a `TIMESTAMP` column).
    #[arg(long, env = "KAIROS_TRACE_CSV")]
    trace_csv: String,

    /// Sub-sampling stride over the trace rows.
    #[arg(long, env = "KAIROS_SAMPLE_INTERVAL", default_value_t = 1)]
    sample_interval: usize,

    /// How many times each sampled row is replicated.
    #[arg(long, env = "KAIROS_SCALE_FACTOR", default_value_t = 1)]
    scale_factor: usize,

    /// Where completed-message JSON records are persisted.
    #[arg(long, env = "KAIROS_OUTPUT", default_value = "data/msg_data.json")]
    output: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    kairos_core::init_tracing("info");

    load_dotenv();
    let cli = Cli::parse();

    let config = FabricConfig::from_env();
    let workflow = WorkflowConfig::from_file(&cli.workflow)?;
    let (service_name, service) = workflow.sole_service()?;
    let entry_agent_name = service.entry_agent_name.clone();
    let service_name = service_name.to_string();

    let (front_host, front_port) = config.transport.frontend_host_port();
    let (back_host, back_port) = config.transport.backend_host_port();
    let publisher = Arc::new(ZmqPublisher::connect(&Transport::tcp(front_host, front_port)).await?);
    let subscriber = Arc::new(ZmqSubscriber::connect(&Transport::tcp(back_host, back_port)).await?);
    let handler = Arc::new(MessageHandler::initialize(publisher, subscriber, "frontend").await?);

    let frontend = Frontend::new(handler.clone(), cli.output.clone());
    let shutdown = Arc::new(Notify::new());
    let recv_handle = frontend.spawn(shutdown.clone());

    info!(trace = %cli.trace_csv, entry_agent = %entry_agent_name, "initializing trace replay");
    let generator = RequestGenerator::from_csv_file(
        &cli.trace_csv,
        cli.sample_interval,
        cli.scale_factor,
        service_name,
        entry_agent_name,
    )?;
    info!(sampled_len = generator.len(), "trace sampled");

    let oracle = StaticDatasetOracle::new(vec![HashMap::new()]);
    generator.start_generate(&handler, &oracle).await?;
    info!("trace replay complete");

    tokio::signal::ctrl_c().await?;
    shutdown.notify_waiters();
    recv_handle.await??;

    Ok(())
}
