//! broker — the PUB/SUB proxy process every other binary in this fleet
//! connects to as a client (spec §5): publishers bind nothing and dial the
//! frontend address, subscribers dial the backend address, and this process
//! is the only one that binds either. Without it running, `ZmqPublisher`/
//! `ZmqSubscriber::connect` in every other binary has nothing to connect to.

use clap::Parser;
use tracing::info;

use kairos_core::{load_dotenv, FabricConfig};
use kairos_transport::broker::{BrokerConfig, EventBroker};

#[derive(Parser, Debug)]
#[command(name = "broker", version, about)]
struct Cli {}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    kairos_core::init_tracing("info");

    load_dotenv();
    let _cli = Cli::parse();

    let config = FabricConfig::from_env();
    config.log_summary();

    let (front_host, front_port) = config.transport.frontend_host_port();
    let (_, back_port) = config.transport.backend_host_port();
    let (_, health_port) = config.transport.health_host_port();

    let broker_config = BrokerConfig::tcp(&front_host, front_port, back_port, health_port);
    let broker = EventBroker::new(broker_config);

    info!("broker starting");
    broker.run().await?;
    info!("broker stopped");

    Ok(())
}
