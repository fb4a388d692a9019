//! dispatcher-worker — standalone process running one agent's dispatcher
//! (spec §4.H, §5's "one process per dispatcher/agent pairing"). Connects
//! directly to the broker rather than going through `kairos-controller`,
//! the way `llm-worker`/`agent-worker` connect directly to the eisenbahn
//! broker without a supervising controller process.

use std::sync::Arc;

use clap::Parser;
use tokio::sync::Notify;
use tracing::info;

use kairos_agent::TERMINAL_SINK;
use kairos_cli::PassthroughAgent;
use kairos_core::{load_dotenv, FabricConfig};
use kairos_dispatcher::Dispatcher;
use kairos_transport::{MessageHandler, Transport, ZmqPublisher, ZmqSubscriber};

#[derive(Parser, Debug)]
#[command(name = "dispatcher-worker", version, about)]
struct Cli {
    /// This dispatcher's agent name (also its topic, by convention).
    #[arg(long, env = "KAIROS_AGENT_NAME")]
    agent_name: String,

    /// Comma-separated downstream targets this agent may route to
    /// (e.g. `reviewer,__sink__`).
    #[arg(long, env = "KAIROS_ROUTES_TO", value_delimiter = ',', default_value = "__sink__")]
    routes_to: Vec<String>,

    /// Balancer `/generate` URL.
    #[arg(long, env = "KAIROS_BALANCER_URL", default_value = "http://127.0.0.1:8080/generate")]
    balancer_url: String,

    /// Health ping interval in seconds.
    #[arg(long, env = "KAIROS_HEALTH_INTERVAL", default_value_t = 30)]
    health_interval: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    kairos_core::init_tracing("info");

    load_dotenv();
    let cli = Cli::parse();

    let config = FabricConfig::from_env();
    let (front_host, front_port) = config.transport.frontend_host_port();
    let (back_host, back_port) = config.transport.backend_host_port();

    let publisher = Arc::new(ZmqPublisher::connect(&Transport::tcp(front_host, front_port)).await?);
    let subscriber = Arc::new(ZmqSubscriber::connect(&Transport::tcp(back_host, back_port)).await?);
    let handler = Arc::new(MessageHandler::initialize(publisher, subscriber, cli.agent_name.clone()).await?);

    for peer in &cli.routes_to {
        if peer != TERMINAL_SINK {
            handler.add_target_mapping(peer, peer).await;
        }
    }

    let next_target = cli.routes_to.first().cloned().unwrap_or_else(|| TERMINAL_SINK.to_string());
    let agent = Arc::new(PassthroughAgent::new(cli.agent_name.clone(), next_target));
    let dispatcher = Dispatcher::new(agent, handler, cli.balancer_url)
        .health_interval(std::time::Duration::from_secs(cli.health_interval));

    let shutdown = Arc::new(Notify::new());
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_shutdown.notify_waiters();
        }
    });

    info!(agent = %cli.agent_name, "dispatcher-worker starting");
    dispatcher.run(shutdown).await?;
    info!("dispatcher-worker exited cleanly");

    Ok(())
}
